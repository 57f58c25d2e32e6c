//! The backend-independent layer of the OSAL.
//!
//! All state lives in an [`Osal`] context, which owns one object table per
//! object class and the backend selected by its type parameter. Every API
//! call decodes the caller's [`Handle`], validates it against the table of
//! the expected class, and forwards to the backend's operation table
//! ([`osal_core::backend`]) with a reference to the object's native state.
//!
//! ```rust,ignore
//! let osal = Osal::new(backend, Config::default())?;
//! let sem = osal.bin_sem_create("SEM", 0)?;
//! osal.bin_sem_give(sem)?;
//! osal.bin_sem_take(sem)?;
//! osal.bin_sem_delete(sem)?;
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::sync::Mutex;

use osal_core::{
    backend::Backend,
    config::Config,
    error::{AllocError, CreateError, DeleteError, InitError, InvalidHandleError},
    name::ObjectName,
};

mod binsem;
mod countsem;
mod dir;
mod file;
mod filesys;
mod idmap;
mod mutex;
mod queue;
mod timebase;
mod timer;

pub use self::{
    binsem::BinSemInfo,
    countsem::CountSemInfo,
    file::FileInfo,
    filesys::{FileSysFlags, FileSysInfo, FsInfo},
    mutex::MutexInfo,
    queue::QueueInfo,
    timebase::{Registration, SyncFn, TimeBaseInfo},
    timer::{TimerCallback, TimerInfo},
};
pub use osal_core::{self, prelude::*};

use self::idmap::{AnyTable, ObjectTable, Reservation};

/// The number of attempts [`Osal::delete_all_objects`] makes before giving
/// up on objects that refuse to be deleted.
const DELETE_ALL_PASSES: usize = 5;

/// The order in which [`Osal::delete_all_objects`] deletes objects.
/// Dependents come before the objects they depend on.
const DELETE_ORDER: [ObjectClass; ObjectClass::COUNT] = [
    ObjectClass::Timer,
    ObjectClass::TimeBase,
    ObjectClass::File,
    ObjectClass::Dir,
    ObjectClass::Queue,
    ObjectClass::BinSem,
    ObjectClass::CountSem,
    ObjectClass::Mutex,
    ObjectClass::FileSys,
];

/// An OSAL instance.
///
/// Dropping an `Osal` tears it down (see [`Self::teardown`]).
pub struct Osal<B: Backend> {
    backend: B,
    config: Config,
    /// Set by `teardown`. No objects can be created after this.
    shutdown: AtomicBool,
    /// Serializes changes to the virtual mount points.
    mount_lock: Mutex<()>,
    bin_sems: ObjectTable<binsem::BinSemCb<B>>,
    count_sems: ObjectTable<countsem::CountSemCb<B>>,
    mutexes: ObjectTable<mutex::MutexCb<B>>,
    queues: ObjectTable<queue::QueueCb<B>>,
    timebases: ObjectTable<timebase::TimeBaseCb<B>>,
    timers: ObjectTable<timer::TimerCb<B>>,
    files: ObjectTable<file::FileCb<B>>,
    dirs: ObjectTable<dir::DirCb<B>>,
    filesystems: ObjectTable<filesys::FileSysCb>,
}

impl<B: Backend> fmt::Debug for Osal<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Osal")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Osal<B> {
    /// Initialize an OSAL instance on top of `backend`.
    pub fn new(backend: B, config: Config) -> Result<Self, InitError> {
        if !config.is_valid() {
            return Err(InitError::BadParam);
        }
        native("init", backend.init())?;

        fn table<P>(config: &Config, class: ObjectClass) -> ObjectTable<P> {
            ObjectTable::new(class, config.capacity(class))
        }
        let this = Self {
            bin_sems: table(&config, ObjectClass::BinSem),
            count_sems: table(&config, ObjectClass::CountSem),
            mutexes: table(&config, ObjectClass::Mutex),
            queues: table(&config, ObjectClass::Queue),
            timebases: table(&config, ObjectClass::TimeBase),
            timers: table(&config, ObjectClass::Timer),
            files: table(&config, ObjectClass::File),
            dirs: table(&config, ObjectClass::Dir),
            filesystems: table(&config, ObjectClass::FileSys),
            backend,
            config,
            shutdown: AtomicBool::new(false),
            mount_lock: Mutex::new(()),
        };
        log::trace!("initialized with {:?}", this.config);
        Ok(this)
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn table(&self, class: ObjectClass) -> &dyn AnyTable {
        match class {
            ObjectClass::BinSem => &self.bin_sems,
            ObjectClass::CountSem => &self.count_sems,
            ObjectClass::Mutex => &self.mutexes,
            ObjectClass::Queue => &self.queues,
            ObjectClass::TimeBase => &self.timebases,
            ObjectClass::Timer => &self.timers,
            ObjectClass::File => &self.files,
            ObjectClass::Dir => &self.dirs,
            ObjectClass::FileSys => &self.filesystems,
        }
    }

    /// Reserve a slot in `table`, unless the instance is shutting down.
    fn reserve<'a, P>(
        &self,
        table: &'a ObjectTable<P>,
        name: Option<ObjectName>,
    ) -> Result<Reservation<'a, P>, AllocError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(AllocError::BadObjectState);
        }
        table.reserve(name)
    }

    /// Reserve a slot for a named object.
    fn reserve_named<'a, P>(
        &self,
        table: &'a ObjectTable<P>,
        name: &str,
    ) -> Result<Reservation<'a, P>, CreateError> {
        let name = ObjectName::new(name)?;
        Ok(self.reserve(table, Some(name))?)
    }

    /// Get the class of the object identified by `handle`.
    ///
    /// This only decodes the handle; the object does not have to exist.
    pub fn identify_object(&self, handle: Handle) -> Result<ObjectClass, InvalidHandleError> {
        handle.decode().map(|(class, _, _)| class)
    }

    /// Get the zero-based table index of the object identified by `handle`,
    /// suitable for indexing application-side arrays sized by the class's
    /// capacity.
    pub fn convert_to_array_index(&self, handle: Handle) -> Result<usize, InvalidHandleError> {
        let (class, index, _) = handle.decode()?;
        if index < self.table(class).capacity() {
            Ok(index)
        } else {
            Err(InvalidHandleError::InvalidHandle)
        }
    }

    /// Get the name of an object. Files and directories have no name.
    pub fn get_resource_name(
        &self,
        handle: Handle,
    ) -> Result<Option<ObjectName>, InvalidHandleError> {
        let class = self.identify_object(handle)?;
        self.table(class).name_of(handle)
    }

    /// Call `visitor` for every Active object of every class.
    ///
    /// Objects created or deleted while this runs may or may not be visited.
    pub fn for_each_object(&self, mut visitor: impl FnMut(Handle)) {
        for &class in ObjectClass::ALL {
            for handle in self.table(class).active_handles() {
                visitor(handle);
            }
        }
    }

    /// Delete the object identified by `handle`, whatever its class.
    pub fn delete_object(&self, handle: Handle) -> Result<(), DeleteError> {
        match self.identify_object(handle)? {
            ObjectClass::BinSem => self.bin_sem_delete(handle),
            ObjectClass::CountSem => self.count_sem_delete(handle),
            ObjectClass::Mutex => self.mut_sem_delete(handle),
            ObjectClass::Queue => self.queue_delete(handle),
            ObjectClass::TimeBase => self.timebase_delete(handle),
            ObjectClass::Timer => self.timer_delete(handle),
            ObjectClass::File => self.close(handle),
            ObjectClass::Dir => self.directory_close(handle),
            ObjectClass::FileSys => self.filesys_delete(handle),
        }
    }

    /// Delete every object, dependents first.
    ///
    /// Objects that cannot be deleted in one pass (e.g., a timebase whose
    /// timer is being created concurrently) are retried a few times.
    pub fn delete_all_objects(&self) {
        for pass in 1..=DELETE_ALL_PASSES {
            let mut remaining = 0;
            for &class in DELETE_ORDER.iter() {
                for handle in self.table(class).active_handles() {
                    match self.delete_object(handle) {
                        // Deleted together with another object
                        Ok(()) | Err(DeleteError::InvalidHandle) => {}
                        Err(e) => {
                            log::debug!("{handle:?}: deletion failed: {e:?}");
                            remaining += 1;
                        }
                    }
                }
            }
            if remaining == 0 {
                return;
            }
            log::warn!(
                "{remaining} object(s) could not be deleted (pass {pass}/{DELETE_ALL_PASSES})"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Shut down the instance: refuse new objects, delete every existing one,
    /// and release the backend.
    ///
    /// Calling this more than once has no further effect.
    pub fn teardown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::trace!("tearing down");
        self.delete_all_objects();
        self.backend.shutdown();
    }

    /// Get a flag indicating whether [`Self::teardown`] has started.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl<B: Backend> Drop for Osal<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Log a failed backend primitive. The native outcome is passed through so
/// that `?` can fold it into the operation's error type.
#[inline]
fn native<T, E: fmt::Debug>(op: &'static str, result: Result<T, E>) -> Result<T, E> {
    if let Err(e) = &result {
        log::debug!("{op}: {e:?}");
    }
    result
}
