//! Native timers
//!
//! Each native timer owns a thread that sleeps until the next expiry and
//! raises the timebase's wake signal. Timers draw from a finite pool of
//! slots, the way a POSIX implementation draws from the real-time signal
//! range; an exhausted pool makes `timebase_create` fail.
//!
//! Every programming of a timer has a sequence number. The thread raises
//! the signal only while holding the sequence lock and only if its
//! programming is still current, so once `timebase_set` returns, the
//! previous programming can no longer raise anything.
use core::time::Duration;
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::Instant,
};

use osal_core::{
    backend::{BackendError, TimeBaseOps},
    signal::WakeSignal,
};

use crate::{StdBackend, UNKNOWN_ERROR};

/// The allocator of native timer slots.
#[derive(Debug)]
pub(crate) struct TimerPool {
    slots: SpinMutex<Slab<()>>,
    limit: usize,
}

impl TimerPool {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            slots: SpinMutex::new(Slab::with_capacity(limit)),
            limit,
        }
    }

    fn allocate(&self) -> Option<usize> {
        let mut slots = self.slots.lock();
        if slots.len() >= self.limit {
            None
        } else {
            Some(slots.insert(()))
        }
    }

    fn free(&self, slot: usize) {
        self.slots.lock().try_remove(slot);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

enum TimerCmd {
    Set {
        start: Duration,
        interval: Duration,
        seq: u64,
    },
}

/// A native timer.
#[derive(Debug)]
pub struct NativeTimer {
    slot: usize,
    control: Arc<SpinMutex<TimerControl>>,
    join_handle: SpinMutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct TimerControl {
    /// `None` after deletion. Dropping the sender stops the thread.
    sender: Option<mpsc::Sender<TimerCmd>>,
    /// The sequence number of the latest programming.
    seq: u64,
}

fn timer_thread(
    signal: Arc<WakeSignal>,
    control: Arc<SpinMutex<TimerControl>>,
    cmd_recv: mpsc::Receiver<TimerCmd>,
) {
    let mut next_deadline: Option<Instant> = None;
    let mut interval = Duration::ZERO;
    let mut seq = 0;
    loop {
        let recv_result = if let Some(deadline) = next_deadline {
            cmd_recv.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        } else {
            cmd_recv
                .recv()
                .map_err(|_| mpsc::RecvTimeoutError::Disconnected)
        };
        match recv_result {
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                {
                    let current = control.lock();
                    if current.seq != seq {
                        // Superseded by a command we haven't received yet
                        next_deadline = None;
                        continue;
                    }
                    signal.raise();
                }
                next_deadline = match next_deadline {
                    Some(deadline) if !interval.is_zero() => {
                        let now = Instant::now();
                        let next = deadline + interval;
                        // Overrun; the missed expiries collapse into the one
                        // just signaled
                        Some(if next <= now { now + interval } else { next })
                    }
                    _ => None,
                };
            }
            Ok(TimerCmd::Set {
                start,
                interval: new_interval,
                seq: new_seq,
            }) => {
                seq = new_seq;
                interval = new_interval;
                next_deadline = (!start.is_zero()).then(|| Instant::now() + start);
            }
        }
    }
}

impl TimeBaseOps for StdBackend {
    type TimeBase = NativeTimer;

    fn timebase_create(&self, signal: Arc<WakeSignal>) -> Result<NativeTimer, BackendError> {
        let slot = self.timers.allocate().ok_or_else(|| {
            let limit = self.timers.limit;
            log::debug!("no free timer slot (limit = {limit})");
            BackendError(UNKNOWN_ERROR)
        })?;

        let (cmd_send, cmd_recv) = mpsc::channel();
        let control = Arc::new(SpinMutex::new(TimerControl {
            sender: Some(cmd_send),
            seq: 0,
        }));
        log::trace!("starting the timer thread for slot {slot}");
        let thread_control = Arc::clone(&control);
        let join_handle = thread::Builder::new()
            .name(format!("osal-timer:{slot}"))
            .spawn(move || timer_thread(signal, thread_control, cmd_recv))
            .map_err(|e| {
                self.timers.free(slot);
                crate::io_error(e)
            })?;

        Ok(NativeTimer {
            slot,
            control,
            join_handle: SpinMutex::new(Some(join_handle)),
        })
    }

    fn timebase_set(
        &self,
        timer: &NativeTimer,
        start: Duration,
        interval: Duration,
    ) -> Result<(), BackendError> {
        let mut control = timer.control.lock();
        let seq = control.seq + 1;
        control
            .sender
            .as_ref()
            .ok_or(BackendError(UNKNOWN_ERROR))?
            .send(TimerCmd::Set {
                start,
                interval,
                seq,
            })
            .map_err(|_| BackendError(UNKNOWN_ERROR))?;
        control.seq = seq;
        Ok(())
    }

    fn timebase_delete(&self, timer: &NativeTimer) -> Result<(), BackendError> {
        // `cmd_recv.recv` returns `Err(_)` once the sender is dropped
        let slot = timer.slot;
        log::trace!("stopping the timer thread for slot {slot}");
        let cmd_send = timer.control.lock().sender.take();
        drop(cmd_send);
        let join_handle = timer.join_handle.lock().take();
        if let Some(join_handle) = join_handle {
            if join_handle.join().is_err() {
                log::warn!("timer thread for slot {slot} panicked");
            }
        }
        self.timers.free(timer.slot);
        log::trace!("stopped the timer thread for slot {slot}");
        Ok(())
    }

    fn timebase_accuracy(&self) -> Duration {
        self.options.resolution
    }
}
