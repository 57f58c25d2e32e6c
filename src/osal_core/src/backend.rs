//! The operation tables a backend implements.
//!
//! Every object class has one trait. The generic layer validates handles and
//! parameters, keeps the native object in the slot's payload, and passes a
//! reference to it into the trait methods; backends never see handles.
//!
//! Native objects are shared between threads (a thread may be blocked in
//! `bin_sem_take` while another calls `bin_sem_give` on the same object), so
//! every native type must be `Send + Sync`.
use core::{fmt, time::Duration};
use std::{path::Path, path::PathBuf, sync::Arc};

use crate::{
    fs::{AccessMode, DirEntry, FileStat, FsStat, OpenFlags, SeekWhence, SelectFlags, VolumeSpec},
    signal::WakeSignal,
    time::Timeout,
};

/// An opaque failure code reported by a backend primitive.
///
/// The generic layer logs the value and reports `BackendFailure`; it never
/// interprets it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendError(pub i32);

impl fmt::Debug for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BackendError({})", self.0)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "native error {}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// The outcome of a failed blocking primitive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PendError {
    /// The wait bound expired.
    Timeout,
    /// The object was deleted while the caller was waiting.
    Deleted,
    Failure(BackendError),
}

impl From<BackendError> for PendError {
    #[inline]
    fn from(x: BackendError) -> Self {
        Self::Failure(x)
    }
}

/// The outcome of a failed counting semaphore post.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PostError {
    /// The count is already at its maximum.
    Overflow,
    Failure(BackendError),
}

/// The outcome of a failed mutex release.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReleaseError {
    /// The calling thread does not hold the mutex.
    NotOwner,
    Failure(BackendError),
}

/// The outcome of a failed volume operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VolumeError {
    /// The volume kind or the operation is not available on this backend.
    NotSupported,
    /// No host storage could be provided for the volume.
    DriveNotCreated,
    Failure(BackendError),
}

impl From<BackendError> for VolumeError {
    #[inline]
    fn from(x: BackendError) -> Self {
        Self::Failure(x)
    }
}

/// Binary semaphore primitives.
pub trait BinSemOps {
    type BinSem: Send + Sync + 'static;

    fn bin_sem_create(&self, initial: bool) -> Result<Self::BinSem, BackendError>;

    /// Destroy the semaphore. Threads blocked in [`Self::bin_sem_take`]
    /// must return [`PendError::Deleted`].
    fn bin_sem_delete(&self, sem: &Self::BinSem) -> Result<(), BackendError>;

    /// Set the value to one and release at least one waiter.
    fn bin_sem_give(&self, sem: &Self::BinSem) -> Result<(), BackendError>;

    /// Release every current waiter without changing the value.
    fn bin_sem_flush(&self, sem: &Self::BinSem) -> Result<(), BackendError>;

    /// Wait until the value is one (and consume it) or a flush occurs.
    fn bin_sem_take(&self, sem: &Self::BinSem, timeout: Timeout) -> Result<(), PendError>;

    fn bin_sem_value(&self, sem: &Self::BinSem) -> bool;
}

/// Counting semaphore primitives.
pub trait CountSemOps {
    type CountSem: Send + Sync + 'static;

    fn count_sem_create(&self, initial: u32, max: u32) -> Result<Self::CountSem, BackendError>;

    /// Destroy the semaphore. Threads blocked in [`Self::count_sem_take`]
    /// must return [`PendError::Deleted`].
    fn count_sem_delete(&self, sem: &Self::CountSem) -> Result<(), BackendError>;

    fn count_sem_give(&self, sem: &Self::CountSem) -> Result<(), PostError>;

    fn count_sem_take(&self, sem: &Self::CountSem, timeout: Timeout) -> Result<(), PendError>;

    fn count_sem_value(&self, sem: &Self::CountSem) -> u32;
}

/// Recursive mutex primitives.
pub trait MutexOps {
    type Mutex: Send + Sync + 'static;

    fn mutex_create(&self) -> Result<Self::Mutex, BackendError>;

    fn mutex_delete(&self, mutex: &Self::Mutex) -> Result<(), BackendError>;

    /// Acquire the mutex. A thread that already holds it acquires it again.
    fn mutex_take(&self, mutex: &Self::Mutex, timeout: Timeout) -> Result<(), PendError>;

    fn mutex_give(&self, mutex: &Self::Mutex) -> Result<(), ReleaseError>;

    fn mutex_owner(&self, mutex: &Self::Mutex) -> Option<std::thread::ThreadId>;
}

/// Message queue primitives.
pub trait QueueOps {
    type Queue: Send + Sync + 'static;

    fn queue_create(&self, depth: usize, msg_size: usize) -> Result<Self::Queue, BackendError>;

    /// Destroy the queue. Blocked senders and receivers must return
    /// [`PendError::Deleted`].
    fn queue_delete(&self, queue: &Self::Queue) -> Result<(), BackendError>;

    /// Enqueue a copy of `msg`. The generic layer has already checked that
    /// `msg` fits the message size.
    fn queue_send(&self, queue: &Self::Queue, msg: &[u8], timeout: Timeout)
        -> Result<(), PendError>;

    /// Dequeue one message into `buf` and return its length. The generic
    /// layer has already checked that `buf` can hold a full message.
    fn queue_receive(
        &self,
        queue: &Self::Queue,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> Result<usize, PendError>;

    /// Get the number of messages currently in the queue.
    fn queue_len(&self, queue: &Self::Queue) -> usize;
}

/// Native timer primitives backing a timebase.
pub trait TimeBaseOps {
    type TimeBase: Send + Sync + 'static;

    /// Create a native timer which raises `signal` every time it expires.
    ///
    /// Failure is not fatal; the generic layer falls back to a software
    /// sleep loop.
    fn timebase_create(&self, signal: Arc<WakeSignal>) -> Result<Self::TimeBase, BackendError>;

    /// Program the timer. The first expiry occurs after `start`, then every
    /// `interval`. A zero `start` disarms the timer; a zero `interval` makes
    /// it one-shot.
    ///
    /// Once this returns, the previous programming must not raise the
    /// signal anymore.
    fn timebase_set(
        &self,
        timebase: &Self::TimeBase,
        start: Duration,
        interval: Duration,
    ) -> Result<(), BackendError>;

    fn timebase_delete(&self, timebase: &Self::TimeBase) -> Result<(), BackendError>;

    /// The granularity of the native timer.
    fn timebase_accuracy(&self) -> Duration;
}

/// Open file primitives. Paths are host paths, already translated by the
/// generic layer.
pub trait FileOps {
    type File: Send + Sync + 'static;

    fn file_open(
        &self,
        path: &Path,
        flags: OpenFlags,
        access: AccessMode,
    ) -> Result<Self::File, BackendError>;

    fn file_close(&self, file: &Self::File) -> Result<(), BackendError>;

    fn file_read(&self, file: &Self::File, buf: &mut [u8]) -> Result<usize, BackendError>;

    fn file_write(&self, file: &Self::File, buf: &[u8]) -> Result<usize, BackendError>;

    /// Move the file position and return the new position.
    fn file_seek(
        &self,
        file: &Self::File,
        offset: i64,
        whence: SeekWhence,
    ) -> Result<u64, BackendError>;

    /// Whether [`Self::file_select`] can be used on the file. Evaluated once
    /// when the file is opened.
    fn file_is_selectable(&self, file: &Self::File) -> bool;

    /// Wait until the file satisfies at least one condition in `flags` and
    /// return the satisfied conditions.
    fn file_select(
        &self,
        file: &Self::File,
        flags: SelectFlags,
        timeout: Timeout,
    ) -> Result<SelectFlags, PendError>;

    fn file_stat(&self, path: &Path) -> Result<FileStat, BackendError>;

    fn file_remove(&self, path: &Path) -> Result<(), BackendError>;

    fn file_rename(&self, from: &Path, to: &Path) -> Result<(), BackendError>;
}

/// Directory primitives.
pub trait DirOps {
    type Dir: Send + Sync + 'static;

    fn dir_open(&self, path: &Path) -> Result<Self::Dir, BackendError>;

    fn dir_close(&self, dir: &Self::Dir) -> Result<(), BackendError>;

    /// Read the next entry, or `None` at the end of the directory.
    fn dir_read(&self, dir: &Self::Dir) -> Result<Option<DirEntry>, BackendError>;

    fn dir_rewind(&self, dir: &Self::Dir) -> Result<(), BackendError>;

    fn dir_create(&self, path: &Path) -> Result<(), BackendError>;

    fn dir_remove(&self, path: &Path) -> Result<(), BackendError>;
}

/// Volume primitives.
pub trait FileSysOps {
    /// Prepare a volume for use and return the host directory backing it.
    fn volume_start(&self, spec: &VolumeSpec) -> Result<PathBuf, VolumeError>;

    fn volume_stop(&self, spec: &VolumeSpec) -> Result<(), VolumeError>;

    /// Create an empty filesystem on a started volume.
    fn volume_format(&self, spec: &VolumeSpec) -> Result<(), VolumeError>;

    fn volume_mount(&self, spec: &VolumeSpec) -> Result<(), VolumeError>;

    fn volume_unmount(&self, spec: &VolumeSpec) -> Result<(), VolumeError>;

    fn volume_stat(&self, spec: &VolumeSpec) -> Result<FsStat, VolumeError>;

    fn volume_check(&self, spec: &VolumeSpec, repair: bool) -> Result<(), VolumeError>;
}

/// The complete operation table of a backend.
///
/// A backend is chosen by instantiating `osal::Osal` with it; there is no
/// run-time registry.
pub trait Backend:
    BinSemOps + CountSemOps + MutexOps + QueueOps + TimeBaseOps + FileOps + DirOps + FileSysOps
    + Send
    + Sync
    + 'static
{
    /// Called once when a context is created.
    fn init(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Called once when a context is torn down, after every object has been
    /// deleted.
    fn shutdown(&self) {}
}
