pub mod arch;
pub mod context;
pub mod error;
pub mod harness;
pub mod hwcap;
pub mod regset;
pub mod texasr;

#[cfg(target_os = "linux")]
pub mod tracee;

pub use context::{BufferId, BufferSet, Outcome, TxContext, TxState};
pub use error::Error;
pub use regset::{Plane, RegisterClass, RegisterImage};

#[cfg(target_os = "linux")]
pub use tracee::Tracee;
