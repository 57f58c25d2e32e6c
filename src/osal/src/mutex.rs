//! Mutex semaphores
use std::thread::ThreadId;

use osal_core::{
    backend::{Backend, MutexOps},
    error::{CreateError, DeleteError, GetIdError, GetInfoError, MutexGiveError, TakeError},
    handle::Handle,
    name::ObjectName,
    time::Timeout,
};

use crate::{native, Osal};

/// *Mutex control block*
pub(crate) struct MutexCb<B: MutexOps> {
    pub(crate) native: B::Mutex,
    creator: ThreadId,
}

/// The properties of a mutex semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexInfo {
    pub name: ObjectName,
    pub creator: ThreadId,
    /// The thread currently holding the mutex.
    pub owner: Option<ThreadId>,
}

impl<B: Backend> Osal<B> {
    /// Create a recursive mutex.
    pub fn mut_sem_create(&self, name: &str) -> Result<Handle, CreateError> {
        let reservation = self.reserve_named(&self.mutexes, name)?;
        let mutex = native("mutex_create", self.backend.mutex_create())?;
        Ok(reservation
            .activate(MutexCb {
                native: mutex,
                creator: std::thread::current().id(),
            })
            .handle())
    }

    pub fn mut_sem_delete(&self, handle: Handle) -> Result<(), DeleteError> {
        let mutex = self.mutexes.release(handle)?;
        native("mutex_delete", self.backend.mutex_delete(&mutex.native))?;
        Ok(())
    }

    /// Acquire the mutex, blocking while another thread holds it. The owner
    /// may acquire it again; each acquisition needs a matching
    /// [`Self::mut_sem_give`].
    pub fn mut_sem_take(&self, handle: Handle) -> Result<(), TakeError> {
        self.mut_sem_timed_wait(handle, Timeout::Forever)
    }

    pub fn mut_sem_timed_wait(
        &self,
        handle: Handle,
        timeout: impl Into<Timeout>,
    ) -> Result<(), TakeError> {
        let mutex = self.mutexes.get(handle)?;
        native(
            "mutex_take",
            self.backend.mutex_take(&mutex.native, timeout.into()),
        )?;
        Ok(())
    }

    /// Release the mutex. Fails with `NotOwner` if the calling thread does
    /// not hold it.
    pub fn mut_sem_give(&self, handle: Handle) -> Result<(), MutexGiveError> {
        let mutex = self.mutexes.get(handle)?;
        native("mutex_give", self.backend.mutex_give(&mutex.native))?;
        Ok(())
    }

    pub fn mut_sem_get_id_by_name(&self, name: &str) -> Result<Handle, GetIdError> {
        ObjectName::new(name)?;
        self.mutexes.find_by_name(name).ok_or(GetIdError::NotFound)
    }

    pub fn mut_sem_get_info(&self, handle: Handle) -> Result<MutexInfo, GetInfoError> {
        let mutex = self.mutexes.get(handle)?;
        Ok(MutexInfo {
            name: mutex.name().unwrap_or_default(),
            creator: mutex.creator,
            owner: self.backend.mutex_owner(&mutex.native),
        })
    }
}
