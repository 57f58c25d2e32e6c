//! Bounded object names
use arrayvec::ArrayString;
use core::{borrow::Borrow, fmt, ops::Deref};

use crate::{config::MAX_API_NAME, error::NameTooLongError};

/// An object name stored inline.
///
/// Names are limited to `MAX_API_NAME - 1` bytes, which is what fits in a
/// classic fixed-size name buffer together with its terminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectName(ArrayString<MAX_API_NAME>);

impl ObjectName {
    /// Construct an `ObjectName`.
    ///
    /// # Examples
    ///
    /// ```
    /// use osal_core::name::ObjectName;
    /// assert!(ObjectName::new("QUEUE_A").is_ok());
    /// assert!(ObjectName::new("a-name-that-is-far-too-long").is_err());
    /// ```
    pub fn new(name: &str) -> Result<Self, NameTooLongError> {
        if name.len() >= MAX_API_NAME {
            return Err(NameTooLongError::NameTooLong);
        }
        ArrayString::from(name)
            .map(Self)
            .map_err(|_| NameTooLongError::NameTooLong)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for ObjectName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for ObjectName {
    #[inline]
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for ObjectName {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_limit() {
        let longest = "x".repeat(MAX_API_NAME - 1);
        assert_eq!(ObjectName::new(&longest).unwrap().len(), MAX_API_NAME - 1);
        let too_long = "x".repeat(MAX_API_NAME);
        assert_eq!(
            ObjectName::new(&too_long),
            Err(NameTooLongError::NameTooLong)
        );
    }

    #[test]
    fn compares_with_str() {
        let name = ObjectName::new("SEM").unwrap();
        assert!(name == *"SEM");
        assert_eq!(name.to_string(), "SEM");
    }
}
