//! Timebases and timers
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use osal::{
    osal_core::{
        config::Config,
        error::{CreateError, DeleteError, SetTimerError},
    },
    ObjectClass, Registration,
};
use osal_port_std::Options;

use crate::{new_osal, new_osal_with, wait_for};

fn counter() -> (Arc<AtomicUsize>, impl FnMut(osal::Handle) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = Arc::clone(&count);
    (count, move |_| {
        count2.fetch_add(1, Ordering::Relaxed);
    })
}

#[test]
fn periodic_timer_rate() {
    let osal = new_osal();
    let (count, callback) = counter();
    let timer = osal.timer_create("TIMER", callback).unwrap();
    osal.timer_set(timer, 100_000, 100_000).unwrap();
    thread::sleep(Duration::from_millis(550));
    osal.timer_delete(timer).unwrap();

    let count = count.load(Ordering::Relaxed);
    assert!((4..=6).contains(&count), "count = {count}");
}

#[test]
fn one_shot_timer_fires_once() {
    let osal = new_osal();
    let (count, callback) = counter();
    let timer = osal.timer_create("TIMER", callback).unwrap();
    osal.timer_set(timer, 30_000, 0).unwrap();
    assert!(wait_for(Duration::from_secs(5), || count.load(Ordering::Relaxed) > 0));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

#[test]
fn short_start_is_not_lost() {
    let osal = new_osal();
    for i in 0..10 {
        let (count, callback) = counter();
        let timer = osal.timer_create(&format!("TIMER{i}"), callback).unwrap();
        osal.timer_set(timer, 1, 0).unwrap();
        assert!(
            wait_for(Duration::from_secs(2), || count.load(Ordering::Relaxed) > 0),
            "iteration {i}: the timer never fired"
        );
        osal.timer_delete(timer).unwrap();
    }
}

#[test]
fn overrun_collapses_expirations() {
    let osal = new_osal();
    let count = Arc::new(AtomicUsize::new(0));
    let timer = {
        let count = Arc::clone(&count);
        osal.timer_create("SLOW", move |_| {
            count.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(120));
        })
        .unwrap()
    };
    osal.timer_set(timer, 20_000, 20_000).unwrap();
    thread::sleep(Duration::from_millis(1000));
    osal.timer_delete(timer).unwrap();

    // Roughly one firing per callback duration, not one per interval
    let count = count.load(Ordering::Relaxed);
    assert!((4..=12).contains(&count), "count = {count}");
}

#[test]
fn timer_faster_than_tick_resets_backlog() {
    let osal = new_osal();
    let tb = osal.timebase_create("TB", None).unwrap();
    let (count, callback) = counter();
    let timer = osal.timer_add("FAST", tb, callback).unwrap();
    osal.timer_set(timer, 2_000, 2_000).unwrap();
    osal.timebase_set(tb, 10_000, 10_000).unwrap();

    assert!(wait_for(Duration::from_secs(5), || {
        osal.timer_get_info(timer).unwrap().backlog_resets >= 3
    }));
    osal.timebase_set(tb, 0, 0).unwrap();
    assert!(count.load(Ordering::Relaxed) > 0);

    osal.timer_delete(timer).unwrap();
    osal.timebase_delete(tb).unwrap();
}

#[test]
fn shared_timebase() {
    let osal = new_osal();
    let tb = osal.timebase_create("TB", None).unwrap();
    let (fast_count, fast) = counter();
    let (slow_count, slow) = counter();
    let fast = osal.timer_add("FAST", tb, fast).unwrap();
    let slow = osal.timer_add("SLOW", tb, slow).unwrap();
    osal.timer_set(fast, 20_000, 20_000).unwrap();
    osal.timer_set(slow, 100_000, 100_000).unwrap();
    osal.timebase_set(tb, 10_000, 10_000).unwrap();

    thread::sleep(Duration::from_millis(420));
    osal.timebase_set(tb, 0, 0).unwrap();

    let (fast_count, slow_count) = (
        fast_count.load(Ordering::Relaxed),
        slow_count.load(Ordering::Relaxed),
    );
    assert!(fast_count > slow_count, "{fast_count} <= {slow_count}");
    assert!((2..=5).contains(&slow_count), "slow = {slow_count}");

    let info = osal.timer_get_info(fast).unwrap();
    assert_eq!((info.timebase, info.start, info.interval), (tb, 20_000, 20_000));
    assert_eq!(info.accuracy, 1_000);
    let info = osal.timebase_get_info(tb).unwrap();
    assert_eq!(info.registration, Registration::Success);
    assert_eq!(info.nominal_interval, 0);
    assert!(osal.timebase_get_free_run(tb).unwrap() >= 300_000);

    osal.timer_delete(slow).unwrap();
    osal.timer_delete(fast).unwrap();
    osal.timebase_delete(tb).unwrap();
}

#[test]
fn timebase_in_use_cannot_be_deleted() {
    let osal = new_osal();
    let tb = osal.timebase_create("TB", None).unwrap();
    let timer = osal.timer_add("TIMER", tb, |_| {}).unwrap();
    assert_eq!(osal.timebase_delete(tb), Err(DeleteError::ObjectInUse));
    osal.timer_delete(timer).unwrap();
    osal.timebase_delete(tb).unwrap();
    assert_eq!(
        osal.timer_add("TIMER", tb, |_| {}),
        Err(CreateError::InvalidHandle)
    );
}

#[test]
fn parameters_are_validated() {
    let osal = new_osal();
    let timer = osal.timer_create("TIMER", |_| {}).unwrap();
    assert_eq!(osal.timer_set(timer, 0, 0), Err(SetTimerError::BadParam));
    assert_eq!(
        osal.timer_set(timer, 1_000_000_001, 0),
        Err(SetTimerError::BadParam)
    );
    // Deleting the timer also deletes its dedicated timebase
    let tb = osal.timer_get_info(timer).unwrap().timebase;
    osal.timer_delete(timer).unwrap();
    assert!(osal.timebase_get_info(tb).is_err());
}

#[test]
fn failed_create_releases_the_timer_slot() {
    let osal = new_osal_with(
        Options::default(),
        Config::default()
            .with_capacity(ObjectClass::TimeBase, 1)
            .with_capacity(ObjectClass::Timer, 1),
    );
    let tb = osal.timebase_create("TB", None).unwrap();
    // No timebase is left for the dedicated one
    assert_eq!(
        osal.timer_create("TIMER", |_| {}),
        Err(CreateError::TableFull)
    );
    // The reserved timer slot and name were given back
    let timer = osal.timer_add("TIMER", tb, |_| {}).unwrap();
    osal.timer_delete(timer).unwrap();
    osal.timebase_delete(tb).unwrap();
}

#[test]
fn callbacks_cannot_manage_timers() {
    let osal = Arc::new(new_osal());
    let (send, recv) = mpsc::channel();
    let timer = {
        let osal2 = Arc::clone(&osal);
        osal.timer_create("TIMER", move |timer| {
            let _ = send.send(osal2.timer_set(timer, 10_000, 0));
        })
        .unwrap()
    };
    osal.timer_set(timer, 10_000, 0).unwrap();
    assert_eq!(
        recv.recv_timeout(Duration::from_secs(5)),
        Ok(Err(SetTimerError::BadContext))
    );
    // Drop the callback, which owns a reference to `osal`
    osal.teardown();
}

#[test]
fn software_fallback() {
    let osal = new_osal_with(
        Options {
            timer_signals: 0,
            ..Default::default()
        },
        Default::default(),
    );
    let (count, callback) = counter();
    let timer = osal.timer_create("TIMER", callback).unwrap();
    let tb = osal.timer_get_info(timer).unwrap().timebase;
    assert!(wait_for(Duration::from_secs(5), || {
        osal.timebase_get_info(tb).unwrap().registration == Registration::Error
    }));

    osal.timer_set(timer, 50_000, 50_000).unwrap();
    thread::sleep(Duration::from_millis(280));
    osal.timer_delete(timer).unwrap();

    let count = count.load(Ordering::Relaxed);
    assert!((3..=6).contains(&count), "count = {count}");
}

#[test]
fn external_sync() {
    let osal = new_osal();
    let tb = osal
        .timebase_create(
            "TB",
            Some(Box::new(|| {
                thread::sleep(Duration::from_millis(10));
                10_000
            })),
        )
        .unwrap();
    let (count, callback) = counter();
    let timer = osal.timer_add("TIMER", tb, callback).unwrap();
    osal.timer_set(timer, 20_000, 20_000).unwrap();

    assert!(wait_for(Duration::from_secs(5), || count.load(Ordering::Relaxed) >= 3));
    assert!(osal.timebase_get_free_run(tb).unwrap() >= 60_000);
    assert_eq!(
        osal.timebase_get_info(tb).unwrap().registration,
        Registration::Success
    );

    osal.timer_delete(timer).unwrap();
    osal.timebase_delete(tb).unwrap();
}
