//! Wait bounds
use core::time::Duration;
use std::time::Instant;

/// The wait bound of a blocking operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Timeout {
    /// Fail immediately with `Timeout` if the operation cannot complete.
    NoWait,
    /// Block until the operation completes.
    Forever,
    /// Block for at most the specified duration.
    After(Duration),
}

impl Timeout {
    /// Construct a `Timeout` from a millisecond count using the classic
    /// convention: zero means no wait, a negative value means wait forever.
    pub const fn from_millis(msecs: i32) -> Self {
        if msecs == 0 {
            Self::NoWait
        } else if msecs < 0 {
            Self::Forever
        } else {
            Self::After(Duration::from_millis(msecs as u64))
        }
    }

    /// Compute the absolute deadline for a wait starting now.
    ///
    /// Returns `None` for [`Timeout::Forever`]. [`Timeout::NoWait`]
    /// produces a deadline that has already passed.
    pub fn deadline(self) -> Option<Instant> {
        let now = Instant::now();
        match self {
            Self::NoWait => Some(now),
            Self::Forever => None,
            // A duration too large to represent is as good as forever
            Self::After(d) => now.checked_add(d),
        }
    }
}

impl From<i32> for Timeout {
    #[inline]
    fn from(msecs: i32) -> Self {
        Self::from_millis(msecs)
    }
}

impl From<Duration> for Timeout {
    #[inline]
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::NoWait
        } else {
            Self::After(d)
        }
    }
}
