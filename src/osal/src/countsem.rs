//! Counting semaphores
use osal_core::{
    backend::{Backend, CountSemOps},
    config::MAX_COUNT_SEM_VALUE,
    error::{CreateError, DeleteError, GetIdError, GetInfoError, GiveError, TakeError},
    handle::Handle,
    name::ObjectName,
    time::Timeout,
};

use crate::{native, Osal};

/// *Counting semaphore control block*
pub(crate) struct CountSemCb<B: CountSemOps> {
    pub(crate) native: B::CountSem,
}

/// The properties of a counting semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSemInfo {
    pub name: ObjectName,
    pub value: u32,
}

impl<B: Backend> Osal<B> {
    pub fn count_sem_create(&self, name: &str, initial: u32) -> Result<Handle, CreateError> {
        if initial > MAX_COUNT_SEM_VALUE {
            return Err(CreateError::BadSemValue);
        }
        let reservation = self.reserve_named(&self.count_sems, name)?;
        let sem = native(
            "count_sem_create",
            self.backend.count_sem_create(initial, MAX_COUNT_SEM_VALUE),
        )?;
        Ok(reservation.activate(CountSemCb { native: sem }).handle())
    }

    /// Delete a counting semaphore. Threads blocked on it return
    /// `InvalidHandle`.
    pub fn count_sem_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        let sem = self.count_sems.release(handle)?;
        native("count_sem_delete", self.backend.count_sem_delete(&sem.native))?;
        Ok(())
    }

    /// Increment the count, releasing a waiter if there is one.
    pub fn count_sem_give(&self, handle: Handle) -> Result<(), GiveError> {
        let sem = self.count_sems.get(handle)?;
        native("count_sem_give", self.backend.count_sem_give(&sem.native))?;
        Ok(())
    }

    /// Wait until the count is nonzero, then decrement it.
    pub fn count_sem_take(&self, handle: Handle) -> Result<(), TakeError> {
        self.count_sem_timed_wait(handle, Timeout::Forever)
    }

    pub fn count_sem_timed_wait(
        &self,
        handle: Handle,
        timeout: impl Into<Timeout>,
    ) -> Result<(), TakeError> {
        let sem = self.count_sems.get(handle)?;
        native(
            "count_sem_take",
            self.backend.count_sem_take(&sem.native, timeout.into()),
        )?;
        Ok(())
    }

    pub fn count_sem_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        ObjectName::new(name)?;
        self.count_sems
            .find_by_name(name)
            .ok_or(GetIdError::NotFound)
    }

    pub fn count_sem_get_info(&self, handle: Handle) -> Result<CountSemInfo, GetInfoError> {
        let sem = self.count_sems.get(handle)?;
        Ok(CountSemInfo {
            name: sem.name().unwrap_or_default(),
            value: self.backend.count_sem_value(&sem.native),
        })
    }
}
