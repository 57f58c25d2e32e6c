//! Simulator backend for running OSAL applications on a hosted environment.
//!
//! Every native object is built on `std`: semaphores, mutexes and queues on
//! `Mutex` + `Condvar`, native timers on one thread each, and files,
//! directories and volumes on `std::fs`. Volatile volumes (RAM disks) are
//! directories under [`Options::volatile_root`].
//!
//! ```rust,ignore
//! use osal::{osal_core::config::Config, Osal};
//! let osal = Osal::new(osal_port_std::StdBackend::new(), Config::default())?;
//! ```
use core::time::Duration;
use std::path::PathBuf;

use osal_core::backend::{Backend, BackendError};

mod fs;
mod sync;
mod timer;

pub use self::{
    fs::{Dir, File},
    sync::{BinSem, CountSem, Queue, RecursiveMutex},
    timer::NativeTimer,
};

/// The native error code reported when a primitive fails without an OS
/// error number.
const UNKNOWN_ERROR: i32 = -1;

/// Backend options.
#[derive(Debug, Clone)]
pub struct Options {
    /// The number of native timers that can exist at once. Creating more
    /// makes the affected timebases fall back to software sleeping.
    pub timer_signals: usize,
    /// The directory under which volatile volumes are created.
    pub volatile_root: PathBuf,
    /// The timer granularity reported as timebase accuracy.
    pub resolution: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timer_signals: 32,
            volatile_root: std::env::temp_dir(),
            resolution: Duration::from_millis(1),
        }
    }
}

/// The hosted backend.
#[derive(Debug)]
pub struct StdBackend {
    options: Options,
    timers: timer::TimerPool,
}

impl Default for StdBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StdBackend {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            timers: timer::TimerPool::new(options.timer_signals),
            options,
        }
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl Backend for StdBackend {
    fn init(&self) -> Result<(), BackendError> {
        log::trace!("init({:?})", self.options);
        Ok(())
    }

    fn shutdown(&self) {
        log::trace!("shutdown ({} native timer(s) left)", self.timers.len());
    }
}

/// Convert an I/O error into an opaque native code.
fn io_error(e: std::io::Error) -> BackendError {
    log::trace!("I/O error: {e}");
    BackendError(e.raw_os_error().unwrap_or(UNKNOWN_ERROR))
}
