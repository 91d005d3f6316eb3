//! This module implements the feature-gate collaborator: a one-shot query of
//! the auxiliary vector for the hardware facilities the scenarios depend on.

/// Hardware transactional memory.
pub const PPC_FEATURE2_HTM: u64 = 0x4000_0000;
/// Data Stream Control Register access from problem state.
pub const PPC_FEATURE2_DSCR: u64 = 0x2000_0000;

#[cfg(all(target_arch = "powerpc64", target_os = "linux"))]
fn hwcap2() -> u64 {
    unsafe { libc::getauxval(libc::AT_HWCAP2) }
}

#[cfg(not(all(target_arch = "powerpc64", target_os = "linux")))]
fn hwcap2() -> u64 {
    0
}

/// Returns true if the host CPU supports transactional execution.
pub fn has_htm() -> bool {
    hwcap2() & PPC_FEATURE2_HTM != 0
}

/// Returns true if the host CPU exposes the DSCR to user mode.
pub fn has_dscr() -> bool {
    hwcap2() & PPC_FEATURE2_DSCR != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_arch = "powerpc64"))]
    fn foreign_hosts_report_no_facilities() {
        assert!(!has_htm());
        assert!(!has_dscr());
    }
}
