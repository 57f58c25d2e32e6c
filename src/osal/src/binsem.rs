//! Binary semaphores
use osal_core::{
    backend::{Backend, BinSemOps},
    error::{CreateError, DeleteError, GetIdError, GetInfoError, GiveError, TakeError},
    handle::Handle,
    name::ObjectName,
    time::Timeout,
};

use crate::{native, Osal};

/// *Binary semaphore control block* - the payload of a binary semaphore
/// slot.
pub(crate) struct BinSemCb<B: BinSemOps> {
    pub(crate) native: B::BinSem,
}

/// The properties of a binary semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinSemInfo {
    pub name: ObjectName,
    pub value: bool,
}

impl<B: Backend> Osal<B> {
    /// Create a binary semaphore. Initial values above one are treated as
    /// one.
    pub fn bin_sem_create(&self, name: &str, initial: u32) -> Result<Handle, CreateError> {
        let reservation = self.reserve_named(&self.bin_sems, name)?;
        let sem = native(
            "bin_sem_create",
            self.backend.bin_sem_create(initial > 0),
        )?;
        Ok(reservation.activate(BinSemCb { native: sem }).handle())
    }

    /// Delete a binary semaphore. Threads blocked on it return
    /// `InvalidHandle`.
    pub fn bin_sem_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        let sem = self.bin_sems.release(handle)?;
        native("bin_sem_delete", self.backend.bin_sem_delete(&sem.native))?;
        Ok(())
    }

    /// Set the value to one, releasing a waiter if there is one. Giving a
    /// semaphore whose value is already one has no effect.
    pub fn bin_sem_give(&self, handle: Handle) -> Result<(), GiveError> {
        let sem = self.bin_sems.get(handle)?;
        native("bin_sem_give", self.backend.bin_sem_give(&sem.native))?;
        Ok(())
    }

    /// Release all threads currently blocked on the semaphore. The value is
    /// not changed.
    pub fn bin_sem_flush(&self, handle: Handle) -> Result<(), GiveError> {
        let sem = self.bin_sems.get(handle)?;
        native("bin_sem_flush", self.backend.bin_sem_flush(&sem.native))?;
        Ok(())
    }

    /// Wait until the value is one, then set it to zero.
    ///
    /// Also returns successfully, without consuming the value, if the
    /// semaphore is flushed while the caller is waiting.
    pub fn bin_sem_take(&self, handle: Handle) -> Result<(), TakeError> {
        self.bin_sem_timed_wait(handle, Timeout::Forever)
    }

    /// [`Self::bin_sem_take`] with a wait bound.
    pub fn bin_sem_timed_wait(
        &self,
        handle: Handle,
        timeout: impl Into<Timeout>,
    ) -> Result<(), TakeError> {
        let sem = self.bin_sems.get(handle)?;
        native(
            "bin_sem_take",
            self.backend.bin_sem_take(&sem.native, timeout.into()),
        )?;
        Ok(())
    }

    pub fn bin_sem_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        ObjectName::new(name)?;
        self.bin_sems.find_by_name(name).ok_or(GetIdError::NotFound)
    }

    pub fn bin_sem_get_info(&self, handle: Handle) -> Result<BinSemInfo, GetInfoError> {
        let sem = self.bin_sems.get(handle)?;
        Ok(BinSemInfo {
            name: sem.name().unwrap_or_default(),
            value: self.backend.bin_sem_value(&sem.native),
        })
    }
}
