//! Timebases
//!
//! A timebase is a tick source with a dedicated handler thread. Each tick,
//! the handler distributes the elapsed time to the timers attached to the
//! timebase and calls the callbacks of the timers that expire.
//!
//! The handler waits for ticks in one of three ways:
//!
//!  - On a [`WakeSignal`] raised by a native timer (registration
//!    `Success`).
//!  - On the same signal with a deadline computed from the configured
//!    interval, if the backend could not provide a native timer
//!    (registration `Error`). This is the software-sleep fallback.
//!  - By calling an application-supplied [`SyncFn`].
//!
//! Ticks that arrive while the handler is busy are not queued. The signal
//! holds at most one pending wake, and the fallback clock skips missed
//! deadlines, so an overrun collapses into a single late tick.
use core::{
    cell::Cell,
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    time::Duration,
};
use spin::Mutex as SpinMutex;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Instant,
};

use osal_core::{
    backend::{Backend, TimeBaseOps},
    config::{MAX_TIMER_VALUE, TIMEBASE_SPIN_LIMIT},
    error::{
        BadContextError, CreateError, DeleteError, GetIdError, GetInfoError, SetTimerError,
    },
    handle::Handle,
    name::ObjectName,
    signal::WakeSignal,
};

use crate::{native, timer::TimerCallback, Osal};

thread_local! {
    /// The timebase served by the current thread, if it is a handler thread.
    static CURRENT_TIMEBASE: Cell<Option<Handle>> = Cell::new(None);
}

/// Timer and timebase management must not be done from a timer callback;
/// deleting the timebase would make the handler thread wait for itself.
pub(crate) fn expect_task_context() -> Result<(), BadContextError> {
    if CURRENT_TIMEBASE.with(|c| c.get()).is_some() {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}

/// An external synchronization function for a timebase.
///
/// It is called repeatedly by the handler thread. Each call should block
/// until the next tick and return the number of microseconds elapsed since
/// the previous one. Zero means the elapsed time is unknown; the tick is
/// ignored, and the handler backs off if this happens repeatedly.
pub type SyncFn = Box<dyn FnMut() -> u32 + Send>;

/// The registration state of a timebase's tick source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The handler thread has not started yet.
    Init,
    /// Ticks come from a native timer or an external synchronization
    /// function.
    Success,
    /// No native timer is available. Ticks are generated by the software
    /// sleep fallback.
    Error,
}

/// The programmed start and interval times in microseconds.
#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    start: u32,
    interval: u32,
}

/// *Timebase control block*
pub(crate) struct TimeBaseCb<B: TimeBaseOps> {
    signal: Arc<WakeSignal>,
    /// The native timer. `None` if the backend could not create one or the
    /// timebase uses an external synchronization function.
    native: Option<B::TimeBase>,
    external_sync: bool,
    registration: SpinMutex<Registration>,
    schedule: SpinMutex<Schedule>,
    /// Set by `timebase_set`; tells the handler to reload `schedule`. The
    /// handler clears it and notifies `reset_done`.
    reset: Mutex<bool>,
    reset_done: Condvar,
    /// Tells the handler thread to exit.
    exit: AtomicBool,
    /// The sum of all ticks in microseconds, wrapping around.
    freerun: AtomicU32,
    accuracy: Duration,
    /// The number of timers attached or being attached to this timebase.
    pub(crate) attached: AtomicUsize,
    pub(crate) tick: Mutex<TickState>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

/// The part of a timebase that is only touched while processing a tick or
/// by timer management.
#[derive(Default)]
pub(crate) struct TickState {
    pub(crate) timers: Vec<TimerEntry>,
}

pub(crate) struct TimerEntry {
    pub(crate) timer: Handle,
    /// The time until the next expiration in microseconds.
    pub(crate) wait_time: i64,
    /// The reload value in microseconds. Zero for a one-shot timer.
    pub(crate) interval: i64,
    /// The number of times a backlog of expirations was discarded.
    pub(crate) backlog_resets: u32,
    pub(crate) callback: TimerCallback,
}

/// The properties of a timebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBaseInfo {
    pub name: ObjectName,
    /// The programmed start time in microseconds.
    pub nominal_start: u32,
    /// The programmed interval in microseconds.
    pub nominal_interval: u32,
    pub freerun: u32,
    /// The granularity of the tick source in microseconds.
    pub accuracy: u32,
    pub registration: Registration,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[inline]
fn micros(us: u32) -> Duration {
    Duration::from_micros(us.into())
}

impl<B: TimeBaseOps> TimeBaseCb<B> {
    /// Ask the handler thread to reload `schedule` and wait until it has.
    ///
    /// The native timer must be disarmed while this runs. Any wake still
    /// pending from its previous programming is consumed together with the
    /// reset wake, so the first wake after the timer is rearmed is a genuine
    /// expiry of the new schedule.
    fn request_reset(&self) {
        let mut reset = lock(&self.reset);
        *reset = true;
        self.signal.raise();
        while *reset && !self.exit.load(Ordering::Acquire) {
            reset = self
                .reset_done
                .wait_timeout(reset, Duration::from_millis(10))
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Clear a pending reset request. Returns `true` if there was one.
    fn take_reset(&self) -> bool {
        let mut reset = lock(&self.reset);
        let requested = core::mem::replace(&mut *reset, false);
        if requested {
            self.reset_done.notify_all();
        }
        requested
    }

    /// Block until the next tick and return its length in microseconds, or
    /// zero if the wake did not correspond to a tick.
    fn wait_tick(&self, clock: &mut TickClock) -> u32 {
        let raised = if self.native.is_some() {
            self.signal.wait();
            true
        } else {
            self.signal.wait_until(clock.next)
        };

        if self.take_reset() {
            // Reconfiguration; the next tick is the start time
            let schedule = *self.schedule.lock();
            clock.schedule = schedule;
            clock.first = true;
            clock.next = (schedule.start > 0).then(|| Instant::now() + micros(schedule.start));
            return 0;
        }

        if raised && self.native.is_none() {
            // Not a deadline expiry (e.g., the timebase is being deleted)
            return 0;
        }

        let schedule = clock.schedule;
        let tick = if clock.first {
            schedule.start
        } else {
            schedule.interval
        };
        clock.first = false;

        if self.native.is_none() {
            clock.next = match clock.next {
                Some(deadline) if schedule.interval > 0 => {
                    let interval = micros(schedule.interval);
                    let now = Instant::now();
                    let mut next = deadline + interval;
                    if next <= now {
                        // Overrun; skip the missed periods
                        next = now + interval;
                    }
                    Some(next)
                }
                _ => None,
            };
        }

        tick
    }

    /// Account a tick and run the callbacks of the timers that expire.
    fn process_tick(&self, tick: u32) {
        self.freerun.fetch_add(tick, Ordering::Relaxed);

        let mut state = lock(&self.tick);
        for entry in state.timers.iter_mut() {
            let saved_wait_time = entry.wait_time;
            entry.wait_time -= i64::from(tick);
            while entry.wait_time <= 0 {
                entry.wait_time += entry.interval;

                // Limit the backlog to one interval so that a timer faster
                // than the tick does not accumulate unbounded debt
                if entry.wait_time < -entry.interval {
                    entry.backlog_resets += 1;
                    entry.wait_time = -entry.interval;
                }

                // Only a transition from positive to non-positive fires the
                // timer. A one-shot timer stays non-positive until it is set
                // again.
                if saved_wait_time > 0 {
                    let timer = entry.timer;
                    let callback = &mut entry.callback;
                    if catch_unwind(AssertUnwindSafe(|| callback(timer))).is_err() {
                        log::warn!("{timer:?}: timer callback panicked");
                    }
                }

                if entry.interval <= 0 {
                    break;
                }
            }
        }
    }
}

/// The handler thread's view of the schedule.
#[derive(Debug, Default)]
struct TickClock {
    /// The schedule as of the last reset.
    schedule: Schedule,
    /// The next tick reports the start time rather than the interval.
    first: bool,
    /// The deadline of the next tick in the software-sleep fallback. `None`
    /// while disarmed.
    next: Option<Instant>,
}

fn handler_thread<B: TimeBaseOps>(
    cb: Arc<TimeBaseCb<B>>,
    handle: Handle,
    mut external_sync: Option<SyncFn>,
) {
    CURRENT_TIMEBASE.with(|c| c.set(Some(handle)));

    let registration = if cb.native.is_some() || external_sync.is_some() {
        Registration::Success
    } else {
        log::warn!("{handle:?}: no native timer available, falling back to software sleep");
        Registration::Error
    };
    *cb.registration.lock() = registration;
    log::trace!("{handle:?}: handler thread started ({registration:?})");

    let mut clock = TickClock::default();
    let mut spin_cycles = 0;

    while !cb.exit.load(Ordering::Acquire) {
        let tick = if let Some(sync) = &mut external_sync {
            let tick = sync();
            if tick != 0 {
                spin_cycles = 0;
            } else if spin_cycles < TIMEBASE_SPIN_LIMIT {
                spin_cycles += 1;
            } else {
                // The sync function is not blocking. Don't hog the CPU.
                thread::sleep(Duration::from_millis(10));
                if spin_cycles == TIMEBASE_SPIN_LIMIT {
                    spin_cycles += 1;
                    log::warn!("{handle:?}: timebase sync spin loop detected");
                }
            }
            tick
        } else {
            cb.wait_tick(&mut clock)
        };

        if cb.exit.load(Ordering::Acquire) {
            break;
        }

        if tick != 0 {
            cb.process_tick(tick);
        }
    }

    // Don't leave a concurrent `timebase_set` waiting
    cb.take_reset();
    log::trace!("{handle:?}: handler thread exiting");
}

impl<B: Backend> Osal<B> {
    /// Create a timebase.
    ///
    /// The timebase does not tick until it is programmed by
    /// [`Self::timebase_set`], unless `external_sync` is given, in which case
    /// its ticks are whatever the function reports.
    pub fn timebase_create(
        &self,
        name: &str,
        external_sync: Option<SyncFn>,
    ) -> Result<Handle, CreateError> {
        expect_task_context()?;
        let reservation = self.reserve_named(&self.timebases, name)?;

        let signal = Arc::new(WakeSignal::new());
        let native_timer = if external_sync.is_some() {
            None
        } else {
            // Failure is not fatal; see `Registration::Error`
            native(
                "timebase_create",
                self.backend.timebase_create(Arc::clone(&signal)),
            )
            .ok()
        };

        let cb = reservation.activate(TimeBaseCb {
            signal,
            native: native_timer,
            external_sync: external_sync.is_some(),
            registration: SpinMutex::new(Registration::Init),
            schedule: SpinMutex::new(Schedule::default()),
            reset: Mutex::new(false),
            reset_done: Condvar::new(),
            exit: AtomicBool::new(false),
            freerun: AtomicU32::new(0),
            accuracy: self.backend.timebase_accuracy(),
            attached: AtomicUsize::new(0),
            tick: Mutex::new(TickState::default()),
            handler: Mutex::new(None),
        });
        let handle = cb.handle();

        let thread_cb = Arc::clone(cb.payload());
        let spawned = thread::Builder::new()
            .name(format!("osal-tb:{name}"))
            .spawn(move || handler_thread(thread_cb, handle, external_sync));

        match spawned {
            Ok(join_handle) => {
                *lock(&cb.handler) = Some(join_handle);
                Ok(handle)
            }
            Err(e) => {
                log::debug!("{handle:?}: failed to spawn the handler thread: {e}");
                cb.exit.store(true, Ordering::Release);
                if self.timebases.release(handle).is_ok() {
                    if let Some(native_timer) = &cb.native {
                        let _ = native(
                            "timebase_delete",
                            self.backend.timebase_delete(native_timer),
                        );
                    }
                }
                Err(CreateError::BackendFailure)
            }
        }
    }

    /// Program a timebase. The first tick occurs `start` microseconds from
    /// now, then one every `interval` microseconds. A zero `start` stops the
    /// timebase; a zero `interval` makes it tick only once.
    pub fn timebase_set(
        &self,
        handle: Handle,
        start: u32,
        interval: u32,
    ) -> Result<(), SetTimerError> {
        expect_task_context()?;
        if start > MAX_TIMER_VALUE || interval > MAX_TIMER_VALUE {
            return Err(SetTimerError::BadParam);
        }
        let cb = self.timebases.get(handle)?;

        if cb.external_sync {
            *cb.schedule.lock() = Schedule { start, interval };
            return Ok(());
        }

        // Disarm, hand the new schedule to the handler thread, then rearm.
        // Every wake after the reset is an expiry of the new schedule.
        if let Some(native_timer) = &cb.native {
            native(
                "timebase_set",
                self.backend
                    .timebase_set(native_timer, Duration::ZERO, Duration::ZERO),
            )?;
        }
        *cb.schedule.lock() = Schedule { start, interval };
        cb.request_reset();

        if let Some(native_timer) = &cb.native {
            native(
                "timebase_set",
                self.backend
                    .timebase_set(native_timer, micros(start), micros(interval)),
            )?;
        }
        Ok(())
    }

    /// Delete a timebase and stop its handler thread.
    ///
    /// Fails with `ObjectInUse` while timers are attached.
    pub fn timebase_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        expect_task_context()?;
        let cb = self.timebases.release_with(handle, |cb| {
            if cb.attached.load(Ordering::Acquire) > 0 {
                Err(DeleteError::ObjectInUse)
            } else {
                Ok(())
            }
        })?;

        cb.exit.store(true, Ordering::Release);
        cb.signal.raise();

        let result = match &cb.native {
            Some(native_timer) => native(
                "timebase_delete",
                self.backend.timebase_delete(native_timer),
            ),
            None => Ok(()),
        };

        // A handler blocked in an external sync function can't be woken up;
        // it notices `exit` on its next tick.
        let join_handle = lock(&cb.handler).take();
        if let (Some(join_handle), false) = (join_handle, cb.external_sync) {
            if join_handle.join().is_err() {
                log::warn!("{handle:?}: handler thread panicked");
            }
        }

        result?;
        Ok(())
    }

    pub fn timebase_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        expect_task_context()?;
        ObjectName::new(name)?;
        self.timebases.find_by_name(name).ok_or(GetIdError::NotFound)
    }

    pub fn timebase_get_info(&self, handle: Handle) -> Result<TimeBaseInfo, GetInfoError> {
        expect_task_context()?;
        let cb = self.timebases.get(handle)?;
        let schedule = *cb.schedule.lock();
        let registration = *cb.registration.lock();
        Ok(TimeBaseInfo {
            name: cb.name().unwrap_or_default(),
            nominal_start: schedule.start,
            nominal_interval: schedule.interval,
            freerun: cb.freerun.load(Ordering::Relaxed),
            accuracy: u32::try_from(cb.accuracy.as_micros()).unwrap_or(u32::MAX),
            registration,
        })
    }

    /// Get the free-running time of a timebase: the sum of all its ticks in
    /// microseconds, wrapping around at 2³².
    ///
    /// Unlike the other timebase operations, this can be called from a timer
    /// callback.
    pub fn timebase_get_free_run(&self, handle: Handle) -> Result<u32, GetInfoError> {
        let cb = self.timebases.get(handle)?;
        Ok(cb.freerun.load(Ordering::Relaxed))
    }
}
