//! This module implements the error type used throughout this crate.

use crate::regset::{Plane, RegisterClass};
use thiserror::Error;

/// The error type.
#[derive(Debug, Error)]
pub enum Error {
    /// There is no process with the given process ID to attach to.
    #[error("no process with ID {0}")]
    NoSuchProcess(i32),

    /// Attaching to the process was denied.
    #[error("permission to trace process {0} denied")]
    PermissionDenied(i32),

    /// The target terminated instead of entering the stopped state.
    #[error("process {0} terminated before it could be inspected")]
    Terminated(i32),

    /// The register class does not provide the requested plane at all.
    #[error("register class {class:?} has no {plane:?} plane")]
    UnsupportedClass {
        /// The register class that was requested.
        class: RegisterClass,
        /// The plane that was requested.
        plane: Plane,
    },

    /// The plane exists, but the target currently has no data for it. This is
    /// the case for the checkpoint plane while the target has no open or
    /// just-aborted transaction.
    #[error("the {plane:?} plane of {class:?} holds no data in the target")]
    Unavailable {
        /// The register class that was requested.
        class: RegisterClass,
        /// The plane that was requested.
        plane: Plane,
    },

    /// The supplied register image does not match the fixed payload size of
    /// the register class.
    #[error("register class {class:?} holds {expected} words, image has {actual}")]
    SizeMismatch {
        /// The register class that was being written.
        class: RegisterClass,
        /// The fixed number of words in the class payload.
        expected: usize,
        /// The number of words in the supplied image.
        actual: usize,
    },

    /// A transaction operation was issued in a state that does not permit it.
    #[error("{op} is not valid in the {state} state")]
    BadState {
        /// The operation that was attempted.
        op: &'static str,
        /// The name of the state the context was in.
        state: &'static str,
    },

    /// The host CPU does not provide transactional execution.
    #[error("transactional execution is not supported on this CPU")]
    CpuUnsupported,

    /// Represents [`std::io::Error`].
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(unix)]
    /// Represents [`nix::Error`].
    #[error(transparent)]
    Nix(#[from] nix::Error),
}
