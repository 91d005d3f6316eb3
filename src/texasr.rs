//! This module decodes the TEXASR abort-status register into named failure
//! causes.
//!
//! TEXASR summarizes why the most recent transaction was discarded. Each
//! cause below corresponds to one bit (or one disjoint bit group) of the
//! register; decoding is total and unknown or reserved bits are simply left
//! out of the result.

use std::fmt;

/// Multi-bit failure code field, set by `tabort.` and by the kernel.
pub const TEXASR_FC: u64 = 0xFE00_0000_0000_0000;
/// Failure is persistent; retrying the transaction will not help.
pub const TEXASR_FP: u64 = 0x0100_0000_0000_0000;
/// A disallowed instruction caused the abort.
pub const TEXASR_DA: u64 = 0x0080_0000_0000_0000;
/// The nesting limit was exceeded.
pub const TEXASR_NO: u64 = 0x0040_0000_0000_0000;
/// The transactional footprint overflowed.
pub const TEXASR_FO: u64 = 0x0020_0000_0000_0000;
/// A self-induced conflict occurred in suspended state.
pub const TEXASR_SIC: u64 = 0x0010_0000_0000_0000;
/// A conflict with a non-transactional access occurred.
pub const TEXASR_NTC: u64 = 0x0008_0000_0000_0000;
/// A conflict with another transaction occurred.
pub const TEXASR_TC: u64 = 0x0004_0000_0000_0000;
/// A translation invalidation conflict occurred.
pub const TEXASR_TIC: u64 = 0x0002_0000_0000_0000;
/// An implementation-specific condition caused the abort.
pub const TEXASR_IC: u64 = 0x0001_0000_0000_0000;
/// An instruction fetch conflict occurred.
pub const TEXASR_IFC: u64 = 0x0000_8000_0000_0000;
/// The abort was self-induced (`tabort.`).
pub const TEXASR_ABT: u64 = 0x0000_0001_0000_0000;
/// The failure was recorded in suspended state.
pub const TEXASR_SPD: u64 = 0x0000_0000_8000_0000;
/// The failure was recorded in hypervisor state.
pub const TEXASR_HV: u64 = 0x0000_0000_2000_0000;
/// The failure was recorded in problem (user) state.
pub const TEXASR_PR: u64 = 0x0000_0000_1000_0000;
/// Failure summary: an abort has been recorded.
pub const TEXASR_FS: u64 = 0x0000_0000_0800_0000;
/// TFIAR holds the exact address of the failing instruction.
pub const TEXASR_TE: u64 = 0x0000_0000_0400_0000;
/// The transactional state has been rolled back.
pub const TEXASR_ROT: u64 = 0x0000_0000_0200_0000;

/// A named cause of a transaction abort.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Cause {
    /// The failure is persistent.
    FailurePersistent,
    /// A disallowed instruction was executed.
    DisallowedInstruction,
    /// Transaction nesting overflowed.
    NestingOverflow,
    /// The transactional footprint overflowed.
    FootprintOverflow,
    /// A self-induced conflict in suspended state.
    SelfInducedConflict,
    /// A conflict with a non-transactional access.
    NonTransactionalConflict,
    /// A conflict with another transaction.
    TransactionConflict,
    /// A translation invalidation conflict.
    TranslationConflict,
    /// An implementation-specific condition.
    ImplementationSpecific,
    /// An instruction fetch conflict.
    InstructionFetchConflict,
    /// A self-induced abort (`tabort.`).
    SelfInduced,
    /// The failure was recorded in suspended state.
    Suspended,
    /// The failure was recorded in hypervisor state.
    Hypervisor,
    /// The failure was recorded in problem state.
    ProblemState,
    /// An abort has been recorded.
    FailureSummary,
    /// The failure address in TFIAR is exact.
    ExactAddress,
    /// The transactional state was rolled back.
    RolledBack,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cause::FailurePersistent => "TEXASR_FP",
            Cause::DisallowedInstruction => "TEXASR_DA",
            Cause::NestingOverflow => "TEXASR_NO",
            Cause::FootprintOverflow => "TEXASR_FO",
            Cause::SelfInducedConflict => "TEXASR_SIC",
            Cause::NonTransactionalConflict => "TEXASR_NTC",
            Cause::TransactionConflict => "TEXASR_TC",
            Cause::TranslationConflict => "TEXASR_TIC",
            Cause::ImplementationSpecific => "TEXASR_IC",
            Cause::InstructionFetchConflict => "TEXASR_IFC",
            Cause::SelfInduced => "TEXASR_ABT",
            Cause::Suspended => "TEXASR_SPD",
            Cause::Hypervisor => "TEXASR_HV",
            Cause::ProblemState => "TEXASR_PR",
            Cause::FailureSummary => "TEXASR_FS",
            Cause::ExactAddress => "TEXASR_TE",
            Cause::RolledBack => "TEXASR_ROT",
        };

        f.write_str(name)
    }
}

/// The (mask, cause) table. Masks are disjoint by construction, so the table
/// may be evaluated in any order.
const CAUSES: &[(u64, Cause)] = &[
    (TEXASR_FP, Cause::FailurePersistent),
    (TEXASR_DA, Cause::DisallowedInstruction),
    (TEXASR_NO, Cause::NestingOverflow),
    (TEXASR_FO, Cause::FootprintOverflow),
    (TEXASR_SIC, Cause::SelfInducedConflict),
    (TEXASR_NTC, Cause::NonTransactionalConflict),
    (TEXASR_TC, Cause::TransactionConflict),
    (TEXASR_TIC, Cause::TranslationConflict),
    (TEXASR_IC, Cause::ImplementationSpecific),
    (TEXASR_IFC, Cause::InstructionFetchConflict),
    (TEXASR_ABT, Cause::SelfInduced),
    (TEXASR_SPD, Cause::Suspended),
    (TEXASR_HV, Cause::Hypervisor),
    (TEXASR_PR, Cause::ProblemState),
    (TEXASR_FS, Cause::FailureSummary),
    (TEXASR_TE, Cause::ExactAddress),
    (TEXASR_ROT, Cause::RolledBack),
];

/// Decodes a TEXASR value into the set of causes whose bits are set.
pub fn decode(texasr: u64) -> Vec<Cause> {
    CAUSES
        .iter()
        .filter(|(mask, _)| texasr & mask != 0)
        .map(|&(_, cause)| cause)
        .collect()
}

/// Returns the failure code field, the software abort code supplied to
/// `tabort.`.
pub fn failure_code(texasr: u64) -> u8 {
    ((texasr & TEXASR_FC) >> 57) as u8
}

/// Renders the diagnostic line reported after an abort: the raw TEXASR value
/// followed by the decoded causes.
pub fn describe(texasr: u64) -> String {
    let mut line = format!("TEXASR: {texasr:#018x}");

    for cause in decode(texasr) {
        line.push_str("  ");
        line.push_str(&cause.to_string());
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_decodes_to_nothing() {
        assert!(decode(0).is_empty());
    }

    #[test]
    fn self_induced_bit_decodes_alone() {
        assert_eq!(decode(TEXASR_ABT), vec![Cause::SelfInduced]);
    }

    #[test]
    fn masks_are_disjoint() {
        let mut seen = 0u64;

        for &(mask, _) in CAUSES {
            assert_eq!(seen & mask, 0, "mask {mask:#x} overlaps");
            seen |= mask;
        }
    }

    #[test]
    fn combined_bits_decode_independently() {
        let causes = decode(TEXASR_ABT | TEXASR_SPD | TEXASR_FS | TEXASR_ROT);

        assert_eq!(causes.len(), 4);
        assert!(causes.contains(&Cause::SelfInduced));
        assert!(causes.contains(&Cause::Suspended));
        assert!(causes.contains(&Cause::FailureSummary));
        assert!(causes.contains(&Cause::RolledBack));
    }

    #[test]
    fn failure_code_field_is_extracted() {
        assert_eq!(failure_code(0), 0);
        assert_eq!(failure_code(1u64 << 57), 1);
        assert_eq!(failure_code(TEXASR_FC), 0x7f);
    }

    #[test]
    fn describe_includes_raw_value_and_causes() {
        let line = describe(TEXASR_ABT);

        assert!(line.contains("0x0000000100000000"));
        assert!(line.contains("TEXASR_ABT"));
    }
}
