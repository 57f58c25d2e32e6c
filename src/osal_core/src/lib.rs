//! The API definition of the OSAL.
//!
//! This crate defines what every other crate of the workspace agrees on:
//!
//!  - [`handle`]: the opaque object identifier and its encoding.
//!  - [`error`]: the result codes and the narrow per-operation error types.
//!  - [`backend`]: the operation tables a backend implements.
//!  - [`config`]: the compile-time limits and per-context capacities.
//!
//! The object manager itself lives in the `osal` crate, and a hosted
//! backend in `osal_port_std`.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod config;
pub mod error;
pub mod fs;
pub mod handle;
pub mod name;
pub mod signal;
pub mod time;

/// The prelude module.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        error::ResultCode,
        handle::{Handle, ObjectClass},
        time::Timeout,
    };
}
