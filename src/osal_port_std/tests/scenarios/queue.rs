//! Message queues
use std::{thread, time::Duration};

use osal::{
    osal_core::error::{CreateError, QueueError},
    Timeout,
};

use crate::new_osal;

#[test]
fn parameters_are_validated() {
    let osal = new_osal();
    assert_eq!(osal.queue_create("Q", 0, 4), Err(CreateError::BadParam));
    assert_eq!(osal.queue_create("Q", 51, 4), Err(CreateError::BadParam));
    assert_eq!(osal.queue_create("Q", 4, 0), Err(CreateError::BadParam));

    let queue = osal.queue_create("Q", 4, 4).unwrap();
    assert_eq!(
        osal.queue_put(queue, b"too long", Timeout::NoWait),
        Err(QueueError::BadSize)
    );
    let mut short = [0u8; 2];
    assert_eq!(
        osal.queue_get(queue, &mut short, Timeout::NoWait),
        Err(QueueError::BadSize)
    );
}

#[test]
fn full_queue_times_out() {
    let osal = new_osal();
    let queue = osal.queue_create("Q", 1, 4).unwrap();
    osal.queue_put(queue, b"one", Timeout::NoWait).unwrap();
    assert_eq!(
        osal.queue_put(queue, b"two", Timeout::NoWait),
        Err(QueueError::Timeout)
    );
    assert_eq!(
        osal.queue_put(queue, b"two", Duration::from_millis(20)),
        Err(QueueError::Timeout)
    );

    let info = osal.queue_get_info(queue).unwrap();
    assert_eq!((info.depth, info.msg_size, info.len), (1, 4, 1));

    let mut buf = [0u8; 4];
    assert_eq!(osal.queue_get(queue, &mut buf, Timeout::NoWait), Ok(3));
    assert_eq!(&buf[..3], b"one");
    assert_eq!(
        osal.queue_get(queue, &mut buf, Timeout::NoWait),
        Err(QueueError::Timeout)
    );
    osal.queue_put(queue, b"two", Timeout::NoWait).unwrap();
}

#[test]
fn messages_are_fifo() {
    let osal = new_osal();
    let queue = osal.queue_create("Q", 8, 1).unwrap();
    for i in 0..8u8 {
        osal.queue_put(queue, &[i], Timeout::NoWait).unwrap();
    }
    let mut buf = [0u8; 1];
    for i in 0..8u8 {
        assert_eq!(osal.queue_get(queue, &mut buf, Timeout::NoWait), Ok(1));
        assert_eq!(buf[0], i);
    }
}

#[test]
fn blocked_receiver_gets_message() {
    let osal = new_osal();
    let queue = osal.queue_create("Q", 2, 8).unwrap();
    thread::scope(|s| {
        let receiver = s.spawn(|| {
            let mut buf = [0u8; 8];
            let len = osal.queue_get(queue, &mut buf, Timeout::Forever)?;
            Ok::<_, QueueError>(buf[..len].to_vec())
        });
        thread::sleep(Duration::from_millis(50));
        osal.queue_put(queue, b"hello", Timeout::NoWait).unwrap();
        assert_eq!(receiver.join().unwrap(), Ok(b"hello".to_vec()));
    });
}

#[test]
fn delete_wakes_receiver() {
    let osal = new_osal();
    let queue = osal.queue_create("Q", 2, 8).unwrap();
    thread::scope(|s| {
        let receiver = s.spawn(|| {
            let mut buf = [0u8; 8];
            osal.queue_get(queue, &mut buf, Timeout::Forever)
        });
        thread::sleep(Duration::from_millis(50));
        osal.queue_delete(queue).unwrap();
        assert_eq!(receiver.join().unwrap(), Err(QueueError::InvalidHandle));
    });
}
