//! Configuration constants and per-context capacities
use crate::handle::{ObjectClass, MAX_OBJECTS_PER_CLASS};

pub const MAX_BIN_SEMAPHORES: usize = 20;
pub const MAX_COUNT_SEMAPHORES: usize = 20;
pub const MAX_MUTEXES: usize = 20;
pub const MAX_QUEUES: usize = 64;
pub const MAX_TIMEBASES: usize = 5;
pub const MAX_TIMERS: usize = 5;
pub const MAX_NUM_OPEN_FILES: usize = 50;
pub const MAX_NUM_OPEN_DIRS: usize = 4;
pub const MAX_FILE_SYSTEMS: usize = 14;

/// The storage size of an object name, including the terminator of the
/// classic API. A name must be strictly shorter than this.
pub const MAX_API_NAME: usize = 20;

/// The maximum length (exclusive) of a virtual path.
pub const MAX_PATH_LEN: usize = 64;

/// The maximum length (exclusive) of the final component of a virtual path.
pub const MAX_FILE_NAME: usize = 20;

/// The maximum length (exclusive) of a translated, host-side path.
pub const MAX_LOCAL_PATH_LEN: usize = MAX_PATH_LEN + 64;

/// The maximum depth of a message queue.
pub const MAX_QUEUE_DEPTH: usize = 50;

/// The maximum value of a counting semaphore.
pub const MAX_COUNT_SEM_VALUE: u32 = i32::MAX as u32;

/// The maximum start or interval time of a timebase or timer, in
/// microseconds.
pub const MAX_TIMER_VALUE: u32 = 1_000_000_000;

/// The number of consecutive zero-length ticks an external synchronization
/// function may return before the timebase backs off.
pub const TIMEBASE_SPIN_LIMIT: u32 = 4;

/// Per-class table capacities of a context.
///
/// # Examples
///
/// ```
/// use osal_core::{config::Config, handle::ObjectClass};
/// let config = Config::default().with_capacity(ObjectClass::BinSem, 2);
/// assert_eq!(config.capacity(ObjectClass::BinSem), 2);
/// assert_eq!(config.capacity(ObjectClass::Queue), 64);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Config {
    capacities: [usize; ObjectClass::COUNT],
}

impl Default for Config {
    fn default() -> Self {
        let mut this = Self {
            capacities: [0; ObjectClass::COUNT],
        };
        for &class in ObjectClass::ALL {
            this.capacities[class.ordinal()] = default_capacity(class);
        }
        this
    }
}

impl Config {
    /// Override the capacity of one class. Zero leaves the class out of the
    /// configuration.
    pub fn with_capacity(mut self, class: ObjectClass, capacity: usize) -> Self {
        self.capacities[class.ordinal()] = capacity;
        self
    }

    /// Get the capacity of a class.
    #[inline]
    pub fn capacity(&self, class: ObjectClass) -> usize {
        self.capacities[class.ordinal()]
    }

    /// Check that every capacity can be addressed by a handle.
    pub fn is_valid(&self) -> bool {
        self.capacities.iter().all(|&n| n <= MAX_OBJECTS_PER_CLASS)
    }
}

const fn default_capacity(class: ObjectClass) -> usize {
    match class {
        ObjectClass::BinSem => MAX_BIN_SEMAPHORES,
        ObjectClass::CountSem => MAX_COUNT_SEMAPHORES,
        ObjectClass::Mutex => MAX_MUTEXES,
        ObjectClass::Queue => MAX_QUEUES,
        ObjectClass::TimeBase => MAX_TIMEBASES,
        ObjectClass::Timer => MAX_TIMERS,
        ObjectClass::File => MAX_NUM_OPEN_FILES,
        ObjectClass::Dir => MAX_NUM_OPEN_DIRS,
        ObjectClass::FileSys => MAX_FILE_SYSTEMS,
    }
}
