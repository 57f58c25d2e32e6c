//! Result codes and the per-operation error types
use core::fmt;

use crate::backend::{BackendError, PendError, PostError, ReleaseError, VolumeError};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use osal_core::error::ResultCode;
            /// assert_eq!(ResultCode::TableFull.as_str(), "TableFull");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            /// Convert a raw code back into a `ResultCode`.
            pub fn from_raw(raw: i16) -> Option<Self> {
                match raw {
                    $(
                        x if x == Self::$vname as i16 => Some(Self::$vname),
                    )*
                    _ => None,
                }
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Display for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the OSAL API can report.
    ///
    /// The numeric values match the classic OSAL status codes so that they
    /// can be handed to telemetry or C callers unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i16)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// A native primitive of the backend failed. The backend-specific
        /// code is logged but not interpreted.
        BackendFailure = -1,
        /// A blocking operation did not complete within its wait bound.
        ///
        /// This is a normal outcome of a bounded wait and not a fault.
        Timeout = -4,
        /// A message or a receive buffer does not fit the queue's message
        /// size.
        BadSize = -11,
        /// An object name is too long to be stored.
        NameTooLong = -13,
        /// The object table of the class has no free slot.
        TableFull = -14,
        /// An Active object of the same class already uses the name.
        AlreadyExists = -15,
        /// The handle is malformed, of the wrong class, or stale.
        InvalidHandle = -16,
        /// No Active object of the class has the given name.
        NotFound = -17,
        /// A semaphore value is out of range.
        BadSemValue = -20,
        /// The object class or operation is not supported by this
        /// configuration or backend.
        NotSupported = -28,
        /// A parameter is invalid in a way that is not covered by any other
        /// error code.
        BadParam = -29,
        /// The object is referenced by another object and cannot be deleted.
        ObjectInUse = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -35,
        /// The current context disallows the operation (e.g., a timer API
        /// called from a timer callback).
        BadContext = -36,
        /// The caller does not own the mutex.
        NotOwner = -39,
        /// A filesystem path is too long.
        PathTooLong = -103,
        /// A filesystem name is too long.
        NameTooLongFs = -104,
        /// The backend could not provide storage for a volume.
        DriveNotCreated = -106,
        /// No filesystem record can be allocated for the device.
        DeviceNotFree = -107,
        /// A filesystem path is malformed or does not map to a mounted
        /// volume.
        PathInvalid = -108,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i16) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i16)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` so that the
                // conversion is a plain relabeling
                $vname = ResultCode::$vname as i16
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&ResultCode::from(*self), f)
            }
        }

        impl std::error::Error for $name {}

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $(
                        $name::$vname => Self::$vname,
                    )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                    assert_eq!(
                        ResultCode::$vname as i16,
                        $name::$vname as i16,
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

// Sub-errors come first so that their `impl From<_>` macros are in scope for
// the wider error types below.

define_error! {
    mod invalid_handle_error {}
    /// The handle does not refer to an Active object of the expected class.
    pub enum InvalidHandleError {
        InvalidHandle,
    }
}

define_error! {
    mod name_too_long_error {}
    /// The object name does not fit the name storage.
    pub enum NameTooLongError {
        NameTooLong,
    }
}

define_error! {
    mod bad_context_error {}
    /// The operation was requested from a context that must not perform it.
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod alloc_error {}
    /// Error type for reserving a slot in an object table.
    pub enum AllocError {
        /// An Active or Reserved object of the class already uses the name.
        AlreadyExists,
        /// The table has no free slot.
        TableFull,
        /// The class has no table in this configuration.
        NotSupported,
        /// The context is shutting down.
        BadObjectState,
    }
}

define_error! {
    mod create_error {}
    /// Error type for object creation operations such as
    /// `Osal::bin_sem_create`.
    pub enum CreateError: AllocError, NameTooLongError, BadContextError, InvalidHandleError {
        NameTooLong,
        AlreadyExists,
        TableFull,
        NotSupported,
        BadObjectState,
        /// An initial value or a size is out of range.
        BadParam,
        /// The initial value of a counting semaphore is out of range.
        BadSemValue,
        /// A timer API was called from a timer callback.
        BadContext,
        /// The timebase referenced by a new timer is not valid.
        InvalidHandle,
        BackendFailure,
    }
}

define_error! {
    mod delete_error {}
    /// Error type for object deletion operations.
    pub enum DeleteError: InvalidHandleError, BadContextError {
        InvalidHandle,
        BadContext,
        /// Other objects still refer to this object.
        ObjectInUse,
        BackendFailure,
    }
}

define_error! {
    mod get_id_error {}
    /// Error type for `*_get_id_by_name` operations.
    pub enum GetIdError: NameTooLongError, BadContextError {
        NameTooLong,
        NotFound,
        BadContext,
    }
}

define_error! {
    mod get_info_error {}
    /// Error type for `*_get_info` operations.
    pub enum GetInfoError: InvalidHandleError, BadContextError {
        InvalidHandle,
        BadContext,
        BackendFailure,
    }
}

define_error! {
    mod give_error {}
    /// Error type for semaphore give and flush operations.
    pub enum GiveError: InvalidHandleError {
        InvalidHandle,
        /// The counting semaphore is already at its maximum value.
        BadSemValue,
        BackendFailure,
    }
}

define_error! {
    mod take_error {}
    /// Error type for semaphore and mutex take operations.
    pub enum TakeError: InvalidHandleError {
        /// The handle is invalid, or the object was deleted while the caller
        /// was blocked on it.
        InvalidHandle,
        Timeout,
        BackendFailure,
    }
}

define_error! {
    mod mutex_give_error {}
    /// Error type for `Osal::mut_sem_give`.
    pub enum MutexGiveError: InvalidHandleError {
        InvalidHandle,
        NotOwner,
        BackendFailure,
    }
}

define_error! {
    mod queue_error {}
    /// Error type for message queue send and receive operations.
    pub enum QueueError: InvalidHandleError {
        /// The handle is invalid, or the queue was deleted while the caller
        /// was blocked on it.
        InvalidHandle,
        /// The message is longer than the queue's message size, or the
        /// receive buffer is shorter than it.
        BadSize,
        /// The queue stayed full (send) or empty (receive) for the whole
        /// wait bound.
        Timeout,
        BackendFailure,
    }
}

define_error! {
    mod set_timer_error {}
    /// Error type for `Osal::timebase_set` and `Osal::timer_set`.
    pub enum SetTimerError: InvalidHandleError, BadContextError {
        InvalidHandle,
        BadParam,
        BadContext,
        BackendFailure,
    }
}

define_error! {
    mod path_error {}
    /// Error type for virtual path validation and translation.
    pub enum PathError {
        PathTooLong,
        PathInvalid,
        NameTooLongFs,
    }
}

define_error! {
    mod open_error {}
    /// Error type for opening files and directories.
    pub enum OpenError: PathError, AllocError {
        PathTooLong,
        PathInvalid,
        NameTooLongFs,
        AlreadyExists,
        TableFull,
        NotSupported,
        BadObjectState,
        BackendFailure,
    }
}

define_error! {
    mod io_error {}
    /// Error type for operations on an open file or directory.
    pub enum IoError: InvalidHandleError {
        InvalidHandle,
        /// The readiness wait expired.
        Timeout,
        /// The descriptor is not selectable.
        NotSupported,
        BadParam,
        BackendFailure,
    }
}

define_error! {
    mod fs_op_error {}
    /// Error type for path-based filesystem operations (stat, remove,
    /// rename, mkdir, rmdir).
    pub enum FsOpError: PathError {
        PathTooLong,
        PathInvalid,
        NameTooLongFs,
        /// No open file matches the path.
        NotFound,
        BackendFailure,
    }
}

define_error! {
    mod filesys_error {}
    /// Error type for filesystem (volume) management operations.
    pub enum FileSysError: PathError, AllocError {
        PathTooLong,
        PathInvalid,
        NameTooLongFs,
        /// No filesystem record can be allocated for the device.
        DeviceNotFree,
        AlreadyExists,
        TableFull,
        NotSupported,
        BadObjectState,
        BadParam,
        NotFound,
        DriveNotCreated,
        BackendFailure,
    }
}

define_error! {
    mod init_error {}
    /// Error type for `Osal::new`.
    pub enum InitError {
        /// A configured capacity exceeds what a handle can address.
        BadParam,
        BackendFailure,
    }
}

// Conversions from backend outcomes. Native codes are opaque and collapse
// into `BackendFailure`.

macro_rules! impl_from_backend_error {
    ($($ty:ident),* $(,)?) => {$(
        impl From<BackendError> for $ty {
            #[inline]
            fn from(_: BackendError) -> Self {
                Self::BackendFailure
            }
        }
    )*};
}

impl_from_backend_error!(
    CreateError,
    DeleteError,
    GetInfoError,
    GiveError,
    TakeError,
    MutexGiveError,
    QueueError,
    SetTimerError,
    OpenError,
    IoError,
    FsOpError,
    FileSysError,
    InitError,
);

macro_rules! impl_from_pend_error {
    ($($ty:ident),* $(,)?) => {$(
        impl From<PendError> for $ty {
            #[inline]
            fn from(x: PendError) -> Self {
                match x {
                    PendError::Timeout => Self::Timeout,
                    // The object is gone, so is the caller's handle
                    PendError::Deleted => Self::InvalidHandle,
                    PendError::Failure(_) => Self::BackendFailure,
                }
            }
        }
    )*};
}

impl_from_pend_error!(TakeError, QueueError, IoError);

impl From<PostError> for GiveError {
    #[inline]
    fn from(x: PostError) -> Self {
        match x {
            PostError::Overflow => Self::BadSemValue,
            PostError::Failure(_) => Self::BackendFailure,
        }
    }
}

impl From<ReleaseError> for MutexGiveError {
    #[inline]
    fn from(x: ReleaseError) -> Self {
        match x {
            ReleaseError::NotOwner => Self::NotOwner,
            ReleaseError::Failure(_) => Self::BackendFailure,
        }
    }
}

impl From<VolumeError> for FileSysError {
    #[inline]
    fn from(x: VolumeError) -> Self {
        match x {
            VolumeError::NotSupported => Self::NotSupported,
            VolumeError::DriveNotCreated => Self::DriveNotCreated,
            VolumeError::Failure(_) => Self::BackendFailure,
        }
    }
}
