//! This module provides architecture-specific code.
//!
//! The transactional-execution instructions and the fused register
//! verification sequences are exposed behind the [`TxPrimitives`] trait with
//! one concrete implementation per supported CPU family. [`native`] selects
//! the implementation for the host, consulting the feature gate once.

use crate::error::Error;
#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
use crate::hwcap;
use crate::regset::RegisterClass;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
pub mod powerpc64;

/// A pair of words in shared memory through which a fused sequence parks
/// while suspended: the parked side stores 1 to `arrived` and spins until
/// `released` reads 1, performing no syscalls. A syscall in the suspended
/// state would doom the transaction.
#[derive(Clone, Copy, Debug)]
pub struct Park<'a> {
    arrived: &'a AtomicU32,
    released: &'a AtomicU32,
}

impl<'a> Park<'a> {
    /// Builds a park point over the given announce/release flags.
    pub fn new(arrived: &'a AtomicU32, released: &'a AtomicU32) -> Self {
        Self { arrived, released }
    }

    /// The flag the parked side sets to announce its arrival.
    pub fn arrived(&self) -> &'a AtomicU32 {
        self.arrived
    }

    /// The flag the other side sets to release the parked side.
    pub fn released(&self) -> &'a AtomicU32 {
        self.released
    }

    /// Runs the park protocol in compiled code. The hardware sequences emit
    /// the equivalent store-and-spin pair themselves.
    pub fn reach(&self) {
        self.arrived.store(1, Ordering::Release);

        while self.released.load(Ordering::Acquire) == 0 {
            std::hint::spin_loop();
        }
    }
}

/// The opaque primitive operations of a transactional-execution facility,
/// together with the fused register verification sequences the scenarios
/// drive.
///
/// The register sequences are fused into single operations because loaded
/// register values cannot survive a return from a compiled function: the ABI
/// restores every callee-saved register a function clobbers, and any
/// intermediate frame is free to use them. The stepwise operations remain
/// valid for transactions whose correctness does not depend on register
/// payloads.
pub trait TxPrimitives {
    /// Enters transactional execution. Returns false on the abort path.
    ///
    /// On hardware, a rollback anywhere in the transaction resumes execution
    /// at this call with all registers restored to the checkpoint, so the
    /// caller observes a second, false-returning completion of the same call.
    fn begin(&mut self) -> bool;

    /// Suspends the open transaction without exiting it. Stack writes made
    /// while suspended persist through a later rollback.
    fn suspend(&mut self);

    /// Resumes a suspended transaction.
    fn resume(&mut self);

    /// Attempts to commit. Returns true if the transaction committed; a
    /// doomed transaction rolls back to the [`TxPrimitives::begin`] site
    /// instead of completing this call.
    fn end(&mut self) -> bool;

    /// Triggers a self-induced abort. On hardware this never completes; the
    /// rollback resumes at the [`TxPrimitives::begin`] site.
    fn force_abort(&mut self);

    /// Reads the abort-status register (TEXASR). Meaningful only immediately
    /// after an abort.
    fn abort_status(&self) -> u64;

    /// Reads the failure-instruction-address register (TFIAR). Meaningful
    /// only immediately after an abort.
    fn failure_address(&self) -> u64;

    /// Runs the suspended-abort verification sequence as one unit: a
    /// checkpoint load, entry, an in-transaction load, suspension, the park
    /// protocol, resumption, a deliberate abort, and a capture of the
    /// restored values into `live`. All slices must match
    /// [`RegisterClass::load_slots`]. Returns the TEXASR and TFIAR values
    /// recorded for the abort.
    fn abort_while_suspended(
        &mut self,
        class: RegisterClass,
        checkpoint: &[u64],
        transactional: &[u64],
        park: Park<'_>,
        live: &mut [u64],
    ) -> Result<(u64, u64), Error>;

    /// Runs the commit counterpart: a checkpoint load, entry, an
    /// in-transaction load, suspension, a third load while suspended,
    /// resumption, commit, and a capture of the final values into `live`.
    /// Returns `None` if the transaction committed, or the recorded TEXASR
    /// and TFIAR values if the hardware discarded it.
    fn commit_with_suspended_load(
        &mut self,
        class: RegisterClass,
        checkpoint: &[u64],
        transactional: &[u64],
        suspended: &[u64],
        live: &mut [u64],
    ) -> Result<Option<(u64, u64)>, Error>;
}

/// Placeholder implementation for hosts without a transactional-execution
/// facility. It cannot be constructed; [`native`] refuses before this point.
#[derive(Debug)]
pub enum Unsupported {}

impl TxPrimitives for Unsupported {
    fn begin(&mut self) -> bool {
        match *self {}
    }

    fn suspend(&mut self) {
        match *self {}
    }

    fn resume(&mut self) {
        match *self {}
    }

    fn end(&mut self) -> bool {
        match *self {}
    }

    fn force_abort(&mut self) {
        match *self {}
    }

    fn abort_status(&self) -> u64 {
        match *self {}
    }

    fn failure_address(&self) -> u64 {
        match *self {}
    }

    fn abort_while_suspended(
        &mut self,
        _class: RegisterClass,
        _checkpoint: &[u64],
        _transactional: &[u64],
        _park: Park<'_>,
        _live: &mut [u64],
    ) -> Result<(u64, u64), Error> {
        match *self {}
    }

    fn commit_with_suspended_load(
        &mut self,
        _class: RegisterClass,
        _checkpoint: &[u64],
        _transactional: &[u64],
        _suspended: &[u64],
        _live: &mut [u64],
    ) -> Result<Option<(u64, u64)>, Error> {
        match *self {}
    }
}

/// The primitives implementation for the host CPU family.
#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
pub type Native = powerpc64::Htm;

/// The primitives implementation for the host CPU family.
#[cfg(not(all(target_arch = "powerpc64", target_os = "linux")))]
pub type Native = Unsupported;

/// Selects the transactional-execution primitives for the host, or
/// [`Error::CpuUnsupported`] if the CPU lacks the facility.
#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
pub fn native() -> Result<Native, Error> {
    if hwcap::has_htm() {
        Ok(powerpc64::Htm::new())
    } else {
        Err(Error::CpuUnsupported)
    }
}

/// Selects the transactional-execution primitives for the host, or
/// [`Error::CpuUnsupported`] if the CPU lacks the facility.
#[cfg(not(all(target_arch = "powerpc64", target_os = "linux")))]
pub fn native() -> Result<Native, Error> {
    Err(Error::CpuUnsupported)
}

/// Programs the Data Stream Control Register of the current thread. No-op on
/// CPUs without the facility; callers gate on [`crate::hwcap::has_dscr`].
pub fn set_dscr(value: u64) {
    #[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
    powerpc64::set_dscr(value);

    #[cfg(not(all(target_arch = "powerpc64", target_os = "linux")))]
    let _ = value;
}

/// Drops the thread priority to low (PPR). No-op off powerpc64.
pub fn set_priority_low() {
    #[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
    powerpc64::set_priority_low();
}

/// Drops the thread priority to very low (PPR). No-op off powerpc64.
pub fn set_priority_very_low() {
    #[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
    powerpc64::set_priority_very_low();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_arch = "powerpc64"))]
    fn native_refuses_without_the_facility() {
        assert!(matches!(native(), Err(Error::CpuUnsupported)));
    }
}
