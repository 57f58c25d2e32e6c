//! Semaphores, mutexes and the object table
use std::{thread, time::Duration};

use osal::{
    osal_core::{
        config::{Config, MAX_COUNT_SEM_VALUE},
        error::{CreateError, DeleteError, GetIdError, GiveError, MutexGiveError, TakeError},
    },
    ObjectClass, Timeout,
};
use osal_port_std::Options;

use crate::{new_osal, new_osal_with};

#[test]
fn table_full_then_slot_reuse() {
    let osal = new_osal_with(
        Options::default(),
        Config::default().with_capacity(ObjectClass::BinSem, 2),
    );
    let a = osal.bin_sem_create("A", 0).unwrap();
    osal.bin_sem_create("B", 0).unwrap();
    assert_eq!(osal.bin_sem_create("C", 0), Err(CreateError::TableFull));

    osal.bin_sem_delete(a).unwrap();
    let c = osal.bin_sem_create("C", 0).unwrap();
    assert_ne!(c, a);
    assert_eq!(osal.convert_to_array_index(c), osal.convert_to_array_index(a));
}

#[test]
fn names_are_unique_per_class() {
    let osal = new_osal();
    osal.bin_sem_create("SEM", 0).unwrap();
    assert_eq!(osal.bin_sem_create("SEM", 0), Err(CreateError::AlreadyExists));
    // Another class may use the same name
    osal.count_sem_create("SEM", 0).unwrap();

    assert_eq!(
        osal.bin_sem_create("A_NAME_THAT_IS_FAR_TOO_LONG", 0),
        Err(CreateError::NameTooLong)
    );
    assert_eq!(
        osal.bin_sem_get_id_by_name("A_NAME_THAT_IS_FAR_TOO_LONG"),
        Err(GetIdError::NameTooLong)
    );
    assert_eq!(osal.bin_sem_get_id_by_name("NONE"), Err(GetIdError::NotFound));
}

#[test]
fn stale_handle_is_rejected() {
    let osal = new_osal();
    let old = osal.bin_sem_create("SEM", 1).unwrap();
    osal.bin_sem_delete(old).unwrap();
    let new = osal.bin_sem_create("SEM", 1).unwrap();

    assert_ne!(old, new);
    assert_eq!(osal.bin_sem_take(old), Err(TakeError::InvalidHandle));
    assert_eq!(osal.bin_sem_delete(old), Err(DeleteError::InvalidHandle));
    assert_eq!(osal.bin_sem_get_id_by_name("SEM"), Ok(new));
}

#[test]
fn wrong_class_is_rejected() {
    let osal = new_osal();
    let sem = osal.count_sem_create("SEM", 1).unwrap();
    assert_eq!(osal.bin_sem_take(sem), Err(TakeError::InvalidHandle));
    assert_eq!(osal.mut_sem_take(sem), Err(TakeError::InvalidHandle));
}

#[test]
fn bin_sem_give_is_idempotent() {
    let osal = new_osal();
    let sem = osal.bin_sem_create("SEM", 0).unwrap();
    osal.bin_sem_give(sem).unwrap();
    osal.bin_sem_give(sem).unwrap();
    assert!(osal.bin_sem_get_info(sem).unwrap().value);

    osal.bin_sem_timed_wait(sem, Timeout::NoWait).unwrap();
    assert_eq!(
        osal.bin_sem_timed_wait(sem, Duration::from_millis(20)),
        Err(TakeError::Timeout)
    );
}

#[test]
fn bin_sem_flush_wakes_all_waiters() {
    let osal = new_osal();
    let sem = osal.bin_sem_create("SEM", 0).unwrap();
    thread::scope(|s| {
        let waiters: Vec<_> = (0..3)
            .map(|_| s.spawn(|| osal.bin_sem_timed_wait(sem, Duration::from_secs(5))))
            .collect();
        thread::sleep(Duration::from_millis(100));
        osal.bin_sem_flush(sem).unwrap();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
    });
    // A flush does not change the value
    assert!(!osal.bin_sem_get_info(sem).unwrap().value);
}

#[test]
fn delete_wakes_waiters() {
    let osal = new_osal();
    let sem = osal.bin_sem_create("SEM", 0).unwrap();
    thread::scope(|s| {
        let waiter = s.spawn(|| osal.bin_sem_take(sem));
        thread::sleep(Duration::from_millis(50));
        osal.bin_sem_delete(sem).unwrap();
        assert_eq!(waiter.join().unwrap(), Err(TakeError::InvalidHandle));
    });
}

#[test]
fn count_sem_values() {
    let osal = new_osal();
    assert_eq!(
        osal.count_sem_create("BAD", MAX_COUNT_SEM_VALUE + 1),
        Err(CreateError::BadSemValue)
    );

    let sem = osal.count_sem_create("SEM", 2).unwrap();
    osal.count_sem_take(sem).unwrap();
    osal.count_sem_take(sem).unwrap();
    assert_eq!(
        osal.count_sem_timed_wait(sem, Timeout::NoWait),
        Err(TakeError::Timeout)
    );
    osal.count_sem_give(sem).unwrap();
    let info = osal.count_sem_get_info(sem).unwrap();
    assert_eq!((&*info.name, info.value), ("SEM", 1));

    let full = osal.count_sem_create("FULL", MAX_COUNT_SEM_VALUE).unwrap();
    assert_eq!(osal.count_sem_give(full), Err(GiveError::BadSemValue));
}

#[test]
fn mutex_ownership() {
    let osal = new_osal();
    let mutex = osal.mut_sem_create("MUTEX").unwrap();
    osal.mut_sem_take(mutex).unwrap();
    osal.mut_sem_take(mutex).unwrap();

    thread::scope(|s| {
        let other = s
            .spawn(|| {
                (
                    osal.mut_sem_give(mutex),
                    osal.mut_sem_timed_wait(mutex, Duration::from_millis(20)),
                )
            })
            .join()
            .unwrap();
        assert_eq!(
            other,
            (Err(MutexGiveError::NotOwner), Err(TakeError::Timeout))
        );
    });

    let info = osal.mut_sem_get_info(mutex).unwrap();
    assert_eq!(info.owner, Some(thread::current().id()));
    osal.mut_sem_give(mutex).unwrap();
    osal.mut_sem_give(mutex).unwrap();
    assert_eq!(osal.mut_sem_get_info(mutex).unwrap().owner, None);
    assert_eq!(osal.mut_sem_give(mutex), Err(MutexGiveError::NotOwner));
}
