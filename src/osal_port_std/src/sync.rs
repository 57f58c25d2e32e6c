//! Semaphores, mutexes and message queues on `Mutex` + `Condvar`
use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard},
    thread::{self, ThreadId},
    time::Instant,
};

use osal_core::{
    backend::{
        BackendError, BinSemOps, CountSemOps, MutexOps, PendError, PostError, QueueOps,
        ReleaseError,
    },
    time::Timeout,
};

use crate::StdBackend;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Block on `cond` until `poll` produces an outcome or `timeout` expires.
///
/// `poll` is called with the state locked, first before blocking and then
/// after every wake-up.
fn pend<T, R>(
    state: &Mutex<T>,
    cond: &Condvar,
    timeout: Timeout,
    mut poll: impl FnMut(&mut T) -> Option<Result<R, PendError>>,
) -> Result<R, PendError> {
    let deadline = timeout.deadline();
    let mut guard = lock(state);
    loop {
        if let Some(outcome) = poll(&mut guard) {
            return outcome;
        }
        guard = match deadline {
            None => cond.wait(guard).unwrap_or_else(|e| e.into_inner()),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PendError::Timeout);
                }
                cond.wait_timeout(guard, deadline - now)
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
    }
}

/// A binary semaphore.
#[derive(Debug, Default)]
pub struct BinSem {
    state: Mutex<BinSemState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct BinSemState {
    value: bool,
    /// Incremented by every flush. A waiter that observes a change is
    /// released.
    flush_epoch: u64,
    deleted: bool,
}

impl BinSemOps for StdBackend {
    type BinSem = BinSem;

    fn bin_sem_create(&self, initial: bool) -> Result<BinSem, BackendError> {
        let sem = BinSem::default();
        lock(&sem.state).value = initial;
        Ok(sem)
    }

    fn bin_sem_delete(&self, sem: &BinSem) -> Result<(), BackendError> {
        lock(&sem.state).deleted = true;
        sem.cond.notify_all();
        Ok(())
    }

    fn bin_sem_give(&self, sem: &BinSem) -> Result<(), BackendError> {
        lock(&sem.state).value = true;
        sem.cond.notify_one();
        Ok(())
    }

    fn bin_sem_flush(&self, sem: &BinSem) -> Result<(), BackendError> {
        let mut state = lock(&sem.state);
        state.flush_epoch = state.flush_epoch.wrapping_add(1);
        drop(state);
        sem.cond.notify_all();
        Ok(())
    }

    fn bin_sem_take(&self, sem: &BinSem, timeout: Timeout) -> Result<(), PendError> {
        let mut epoch = None;
        pend(&sem.state, &sem.cond, timeout, |state| {
            let epoch = *epoch.get_or_insert(state.flush_epoch);
            if state.deleted {
                Some(Err(PendError::Deleted))
            } else if state.value {
                state.value = false;
                Some(Ok(()))
            } else if state.flush_epoch != epoch {
                Some(Ok(()))
            } else {
                None
            }
        })
    }

    fn bin_sem_value(&self, sem: &BinSem) -> bool {
        lock(&sem.state).value
    }
}

/// A counting semaphore.
#[derive(Debug)]
pub struct CountSem {
    state: Mutex<CountSemState>,
    cond: Condvar,
}

#[derive(Debug)]
struct CountSemState {
    value: u32,
    max: u32,
    deleted: bool,
}

impl CountSemOps for StdBackend {
    type CountSem = CountSem;

    fn count_sem_create(&self, initial: u32, max: u32) -> Result<CountSem, BackendError> {
        Ok(CountSem {
            state: Mutex::new(CountSemState {
                value: initial,
                max,
                deleted: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn count_sem_delete(&self, sem: &CountSem) -> Result<(), BackendError> {
        lock(&sem.state).deleted = true;
        sem.cond.notify_all();
        Ok(())
    }

    fn count_sem_give(&self, sem: &CountSem) -> Result<(), PostError> {
        let mut state = lock(&sem.state);
        if state.value >= state.max {
            return Err(PostError::Overflow);
        }
        state.value += 1;
        drop(state);
        sem.cond.notify_one();
        Ok(())
    }

    fn count_sem_take(&self, sem: &CountSem, timeout: Timeout) -> Result<(), PendError> {
        pend(&sem.state, &sem.cond, timeout, |state| {
            if state.deleted {
                Some(Err(PendError::Deleted))
            } else if state.value > 0 {
                state.value -= 1;
                Some(Ok(()))
            } else {
                None
            }
        })
    }

    fn count_sem_value(&self, sem: &CountSem) -> u32 {
        lock(&sem.state).value
    }
}

/// A recursive mutex that tracks its owning thread.
#[derive(Debug, Default)]
pub struct RecursiveMutex {
    state: Mutex<MutexState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct MutexState {
    owner: Option<ThreadId>,
    depth: usize,
    deleted: bool,
}

impl MutexOps for StdBackend {
    type Mutex = RecursiveMutex;

    fn mutex_create(&self) -> Result<RecursiveMutex, BackendError> {
        Ok(RecursiveMutex::default())
    }

    fn mutex_delete(&self, mutex: &RecursiveMutex) -> Result<(), BackendError> {
        lock(&mutex.state).deleted = true;
        mutex.cond.notify_all();
        Ok(())
    }

    fn mutex_take(&self, mutex: &RecursiveMutex, timeout: Timeout) -> Result<(), PendError> {
        let me = thread::current().id();
        pend(&mutex.state, &mutex.cond, timeout, |state| {
            if state.deleted {
                return Some(Err(PendError::Deleted));
            }
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    Some(Ok(()))
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    Some(Ok(()))
                }
                Some(_) => None,
            }
        })
    }

    fn mutex_give(&self, mutex: &RecursiveMutex) -> Result<(), ReleaseError> {
        let mut state = lock(&mutex.state);
        if state.owner != Some(thread::current().id()) {
            return Err(ReleaseError::NotOwner);
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            mutex.cond.notify_one();
        }
        Ok(())
    }

    fn mutex_owner(&self, mutex: &RecursiveMutex) -> Option<ThreadId> {
        lock(&mutex.state).owner
    }
}

/// A bounded FIFO of byte messages.
#[derive(Debug)]
pub struct Queue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct QueueState {
    messages: VecDeque<Vec<u8>>,
    depth: usize,
    deleted: bool,
}

impl QueueOps for StdBackend {
    type Queue = Queue;

    fn queue_create(&self, depth: usize, _msg_size: usize) -> Result<Queue, BackendError> {
        Ok(Queue {
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(depth),
                depth,
                deleted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    fn queue_delete(&self, queue: &Queue) -> Result<(), BackendError> {
        lock(&queue.state).deleted = true;
        queue.not_empty.notify_all();
        queue.not_full.notify_all();
        Ok(())
    }

    fn queue_send(&self, queue: &Queue, msg: &[u8], timeout: Timeout) -> Result<(), PendError> {
        pend(&queue.state, &queue.not_full, timeout, |state| {
            if state.deleted {
                Some(Err(PendError::Deleted))
            } else if state.messages.len() < state.depth {
                state.messages.push_back(msg.to_vec());
                Some(Ok(()))
            } else {
                None
            }
        })?;
        queue.not_empty.notify_one();
        Ok(())
    }

    fn queue_receive(
        &self,
        queue: &Queue,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> Result<usize, PendError> {
        let len = pend(&queue.state, &queue.not_empty, timeout, |state| {
            if state.deleted {
                return Some(Err(PendError::Deleted));
            }
            let msg = state.messages.pop_front()?;
            let len = msg.len().min(buf.len());
            buf[..len].copy_from_slice(&msg[..len]);
            Some(Ok(len))
        })?;
        queue.not_full.notify_one();
        Ok(len)
    }

    fn queue_len(&self, queue: &Queue) -> usize {
        lock(&queue.state).messages.len()
    }
}
