//! Timers
//!
//! A timer is a callback attached to a timebase. Its expiration time is
//! counted down by the timebase's ticks.
use core::sync::atomic::Ordering;
use spin::Mutex as SpinMutex;

use osal_core::{
    backend::{Backend, TimeBaseOps},
    config::MAX_TIMER_VALUE,
    error::{CreateError, DeleteError, GetIdError, GetInfoError, SetTimerError},
    handle::Handle,
    name::ObjectName,
};

use crate::{
    idmap::{ObjectRef, Reservation},
    timebase::{expect_task_context, lock, TimeBaseCb, TimerEntry},
    Osal,
};

/// A timer callback. It receives the handle of the expired timer and runs
/// on the handler thread of the timer's timebase.
pub type TimerCallback = Box<dyn FnMut(Handle) + Send>;

/// *Timer control block*
pub(crate) struct TimerCb<B: TimeBaseOps> {
    timebase: ObjectRef<TimeBaseCb<B>>,
    /// The timebase was created for this timer and is deleted with it.
    dedicated: bool,
    /// The programmed start and interval times in microseconds.
    schedule: SpinMutex<(u32, u32)>,
}

/// The properties of a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub name: ObjectName,
    pub timebase: Handle,
    /// The programmed start time in microseconds.
    pub start: u32,
    /// The programmed interval in microseconds.
    pub interval: u32,
    /// The granularity of the timebase in microseconds.
    pub accuracy: u32,
    /// The number of times expirations were discarded because the timer
    /// fell more than one interval behind.
    pub backlog_resets: u32,
}

impl<B: Backend> Osal<B> {
    /// Create a timer driven by an existing timebase.
    ///
    /// The timer is disarmed until [`Self::timer_set`] is called.
    pub fn timer_add(
        &self,
        name: &str,
        timebase: Handle,
        callback: impl FnMut(Handle) + Send + 'static,
    ) -> Result<Handle, CreateError> {
        expect_task_context()?;
        let timebase = self.timebases.get(timebase)?;
        let reservation = self.reserve_named(&self.timers, name)?;
        self.attach_timer(reservation, timebase, false, Box::new(callback))
    }

    /// Create a timer together with a dedicated timebase of the same name.
    /// The timebase is deleted when the timer is.
    pub fn timer_create(
        &self,
        name: &str,
        callback: impl FnMut(Handle) + Send + 'static,
    ) -> Result<Handle, CreateError> {
        expect_task_context()?;
        let reservation = self.reserve_named(&self.timers, name)?;
        let timebase_handle = self.timebase_create(name, None)?;
        let attached = self
            .timebases
            .get(timebase_handle)
            .map_err(CreateError::from)
            .and_then(|timebase| {
                self.attach_timer(reservation, timebase, true, Box::new(callback))
            });
        if attached.is_err() {
            if let Err(e) = self.timebase_delete(timebase_handle) {
                log::debug!("{timebase_handle:?}: failed to delete the dedicated timebase: {e:?}");
            }
        }
        attached
    }

    fn attach_timer(
        &self,
        reservation: Reservation<'_, TimerCb<B>>,
        timebase: ObjectRef<TimeBaseCb<B>>,
        dedicated: bool,
        callback: TimerCallback,
    ) -> Result<Handle, CreateError> {
        // Count the attachment first, then make sure the timebase was not
        // deleted in the meantime. `timebase_delete` checks the count under
        // the table lock, so one of the two sides always notices the other.
        timebase.attached.fetch_add(1, Ordering::AcqRel);
        if self.timebases.get(timebase.handle()).is_err() {
            timebase.attached.fetch_sub(1, Ordering::AcqRel);
            return Err(CreateError::InvalidHandle);
        }

        let timer = reservation.activate(TimerCb {
            timebase: timebase.clone(),
            dedicated,
            schedule: SpinMutex::new((0, 0)),
        });
        lock(&timebase.tick).timers.push(TimerEntry {
            timer: timer.handle(),
            wait_time: 0,
            interval: 0,
            backlog_resets: 0,
            callback,
        });
        Ok(timer.handle())
    }

    /// Arm a timer. It expires `start` microseconds from now, then every
    /// `interval` microseconds; a zero `interval` makes it a one-shot timer
    /// and a zero `start` means "after one interval".
    pub fn timer_set(&self, handle: Handle, start: u32, interval: u32) -> Result<(), SetTimerError> {
        expect_task_context()?;
        if (start == 0 && interval == 0) || start > MAX_TIMER_VALUE || interval > MAX_TIMER_VALUE {
            return Err(SetTimerError::BadParam);
        }
        let timer = self.timers.get(handle)?;
        let start = if start == 0 { interval } else { start };

        *timer.schedule.lock() = (start, interval);
        {
            let mut tick = lock(&timer.timebase.tick);
            if let Some(entry) = tick.timers.iter_mut().find(|e| e.timer == handle) {
                entry.wait_time = start.into();
                entry.interval = interval.into();
            }
        }

        if timer.dedicated {
            self.timebase_set(timer.timebase.handle(), start, interval)?;
        }
        Ok(())
    }

    /// Delete a timer. Its callback is not running and will not run again
    /// once this returns.
    pub fn timer_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        expect_task_context()?;
        let timer = self.timers.release(handle)?;
        let timebase = &timer.timebase;
        lock(&timebase.tick).timers.retain(|e| e.timer != handle);
        timebase.attached.fetch_sub(1, Ordering::AcqRel);

        if timer.dedicated {
            self.timebase_delete(timebase.handle())?;
        }
        Ok(())
    }

    pub fn timer_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        expect_task_context()?;
        ObjectName::new(name)?;
        self.timers.find_by_name(name).ok_or(GetIdError::NotFound)
    }

    pub fn timer_get_info(&self, handle: Handle) -> Result<TimerInfo, GetInfoError> {
        expect_task_context()?;
        let timer = self.timers.get(handle)?;
        let (start, interval) = *timer.schedule.lock();
        let backlog_resets = lock(&timer.timebase.tick)
            .timers
            .iter()
            .find(|e| e.timer == handle)
            .map_or(0, |e| e.backlog_resets);
        let accuracy = self
            .timebase_get_info(timer.timebase.handle())
            .map_or(0, |info| info.accuracy);
        Ok(TimerInfo {
            name: timer.name().unwrap_or_default(),
            timebase: timer.timebase.handle(),
            start,
            interval,
            accuracy,
            backlog_resets,
        })
    }
}
