//! This module provides the scaffolding shared by the scenario drivers:
//! pass/fail/skip reporting with the kselftest exit-code convention, value
//! comparison helpers, and the shared-memory handshake through which the
//! subject process parks at its breakpoints.

use crate::arch::Park;
use crate::error::Error;
use std::process::exit;
use std::sync::atomic::{AtomicU32, Ordering};

/// All expected outcomes matched.
pub const PASS: i32 = 0;
/// An outcome mismatch or a failed introspection call.
pub const FAIL: i32 = 1;
/// The feature gate reported the facility missing.
pub const SKIP: i32 = 4;

/// Exits with the skip status if the condition holds.
pub fn skip_if(cond: bool, why: &str) {
    if cond {
        println!("[SKIP] {why}");
        exit(SKIP);
    }
}

/// Reports success and exits.
pub fn pass(msg: &str) -> ! {
    println!("[PASS] {msg}");
    exit(PASS);
}

/// Reports a test failure and exits.
pub fn fail(msg: &str) -> ! {
    eprintln!("[FAIL] {msg}");
    exit(FAIL);
}

/// Reports a failed operation with its underlying error and exits.
pub fn fail_on(op: &str, err: &Error) -> ! {
    eprintln!("[FAIL] {op}: {err}");
    exit(FAIL);
}

/// Compares two value sequences slot by slot, printing every mismatch.
/// Returns true if they are equal.
pub fn check_words(label: &str, actual: &[u64], expected: &[u64]) -> bool {
    if actual.len() != expected.len() {
        eprintln!(
            "{label}: length mismatch, expected {} got {}",
            expected.len(),
            actual.len()
        );
        return false;
    }

    let mut ok = true;

    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            eprintln!("{label}[{i}]: expected {e:#x} got {a:#x}");
            ok = false;
        }
    }

    ok
}

/// A set of breakpoint flags in a `MAP_SHARED` anonymous page, usable across
/// a fork.
///
/// The subject announces each breakpoint and then spins until released. The
/// spin performs no syscalls: the breakpoints sit inside a suspended
/// transaction, and a syscall there would doom it.
#[derive(Debug)]
pub struct Handshake {
    base: *mut AtomicU32,
    rounds: usize,
}

impl Handshake {
    /// Maps the flag page for the given number of breakpoint rounds. Must be
    /// called before forking so both sides share the mapping.
    pub fn new(rounds: usize) -> Result<Self, Error> {
        let len = rounds * 2 * std::mem::size_of::<AtomicU32>();

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(Self {
            base: base.cast(),
            rounds,
        })
    }

    fn flag(&self, index: usize) -> &AtomicU32 {
        assert!(index < self.rounds * 2);

        unsafe { &*self.base.add(index) }
    }

    fn arrived(&self, round: usize) -> &AtomicU32 {
        self.flag(round * 2)
    }

    fn released(&self, round: usize) -> &AtomicU32 {
        self.flag(round * 2 + 1)
    }

    /// Subject side: announce the breakpoint and spin until the observer
    /// releases it.
    pub fn reach(&self, round: usize) {
        self.arrived(round).store(1, Ordering::Release);

        while self.released(round).load(Ordering::Acquire) == 0 {
            std::hint::spin_loop();
        }
    }

    /// Returns the park point for the given breakpoint round, for handing to
    /// a fused transaction sequence.
    pub fn park(&self, round: usize) -> Park<'_> {
        Park::new(self.arrived(round), self.released(round))
    }

    /// Observer side: spin until the subject announces the breakpoint.
    pub fn wait(&self, round: usize) {
        while self.arrived(round).load(Ordering::Acquire) == 0 {
            std::hint::spin_loop();
        }
    }

    /// Observer side: release the subject past the breakpoint.
    pub fn release(&self, round: usize) {
        self.released(round).store(1, Ordering::Release);
    }
}

impl Drop for Handshake {
    fn drop(&mut self) {
        let len = self.rounds * 2 * std::mem::size_of::<AtomicU32>();

        unsafe {
            libc::munmap(self.base.cast(), len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let hs = Handshake::new(2).unwrap();

        // Release first so the subject side does not spin.
        hs.release(0);
        hs.reach(0);
        hs.wait(0);

        hs.release(1);
        hs.park(1).reach();
        hs.wait(1);
    }

    #[test]
    fn check_words_reports_mismatches() {
        assert!(check_words("eq", &[1, 2, 3], &[1, 2, 3]));
        assert!(!check_words("ne", &[1, 2, 4], &[1, 2, 3]));
        assert!(!check_words("len", &[1], &[1, 2]));
    }
}
