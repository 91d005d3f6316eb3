//! This module models the ptrace register sets of the PowerPC architecture,
//! including the checkpointed shadow sets that exist while a transaction is
//! open.

use crate::error::Error;

/// ELF core note tags addressing the individual register sets.
pub mod notes {
    pub const NT_PRSTATUS: i32 = 0x1;
    pub const NT_PRFPREG: i32 = 0x2;
    pub const NT_PPC_VMX: i32 = 0x100;
    pub const NT_PPC_VSX: i32 = 0x102;
    /// Target Address Register.
    pub const NT_PPC_TAR: i32 = 0x103;
    /// Program Priority Register.
    pub const NT_PPC_PPR: i32 = 0x104;
    /// Data Stream Control Register.
    pub const NT_PPC_DSCR: i32 = 0x105;
    /// Event Based Branch registers.
    pub const NT_PPC_EBB: i32 = 0x106;
    /// TM checkpointed GPR registers.
    pub const NT_PPC_TM_CGPR: i32 = 0x107;
    /// TM checkpointed FPR registers.
    pub const NT_PPC_TM_CFPR: i32 = 0x108;
    /// TM checkpointed VMX registers.
    pub const NT_PPC_TM_CVMX: i32 = 0x109;
    /// TM checkpointed VSX registers.
    pub const NT_PPC_TM_CVSX: i32 = 0x10a;
    /// TM special purpose registers (TFHAR, TEXASR, TFIAR).
    pub const NT_PPC_TM_SPR: i32 = 0x10b;
    /// TM checkpointed Target Address Register.
    pub const NT_PPC_TM_CTAR: i32 = 0x10c;
    /// TM checkpointed Program Priority Register.
    pub const NT_PPC_TM_CPPR: i32 = 0x10d;
    /// TM checkpointed Data Stream Control Register.
    pub const NT_PPC_TM_CDSCR: i32 = 0x10e;
}

/// Slot indices into the GPR (`pt_regs`) payload.
pub mod slots {
    /// First of the 32 general-purpose registers.
    pub const GPR0: usize = 0;
    /// Next instruction address.
    pub const NIP: usize = 32;
    /// Machine state register.
    pub const MSR: usize = 33;
    /// Count register.
    pub const CTR: usize = 35;
    /// Link register.
    pub const LINK: usize = 36;
    /// First general-purpose register driven by the test loaders. The loaders
    /// restrict themselves to the callee-saved window r14..r31 so that the
    /// surrounding code keeps functioning with arbitrary values loaded.
    pub const GPR_WINDOW: usize = 14;
}

/// The named register-set classes of the introspection channel.
///
/// Element count and width are fixed per class and known at compile time; no
/// class is ever partially sized.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RegisterClass {
    /// General-purpose registers, exposed as the full `pt_regs` layout.
    Gpr,
    /// Floating-point registers plus the FPSCR status word.
    Fpr,
    /// VMX (AltiVec) registers: 32 vector registers of two 64-bit lanes each,
    /// followed by VSCR and VRSAVE.
    Vmx,
    /// VSX registers: the second doubleword of VSR0..VSR31 (the half that is
    /// not aliased onto the FPRs).
    Vsx,
    /// Event Based Branch registers.
    Ebb,
    /// The TAR/PPR/DSCR special-purpose-register group, read and written as a
    /// composite of three single-word register sets.
    Spr,
    /// The transactional-memory special purpose registers TFHAR, TEXASR and
    /// TFIAR.
    TmSpr,
}

/// The plane of a register image: the current architectural state or the
/// hardware-preserved pre-transaction snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Plane {
    /// The current architectural register state.
    Live,
    /// The checkpointed register state, valid only while a transaction is
    /// open in the target or immediately after an abort.
    Checkpoint,
}

impl RegisterClass {
    /// All register-set classes.
    pub const ALL: [RegisterClass; 7] = [
        RegisterClass::Gpr,
        RegisterClass::Fpr,
        RegisterClass::Vmx,
        RegisterClass::Vsx,
        RegisterClass::Ebb,
        RegisterClass::Spr,
        RegisterClass::TmSpr,
    ];

    /// Returns the fixed number of 64-bit words in this class's ptrace
    /// payload.
    pub fn words(self) -> usize {
        match self {
            // pt_regs: gpr[32] followed by nip, msr, orig_gpr3, ctr, link,
            // xer, ccr, softe, trap, dar, dsisr, result.
            RegisterClass::Gpr => 44,
            RegisterClass::Fpr => 33,
            RegisterClass::Vmx => 68,
            RegisterClass::Vsx => 32,
            RegisterClass::Ebb => 8,
            RegisterClass::Spr => 3,
            RegisterClass::TmSpr => 3,
        }
    }

    /// Returns the number of values the in-process loaders consume for this
    /// class, or `None` if the class has no loader (it is only inspected).
    ///
    /// The VSX loader drives both doublewords of VSR0..VSR31. The VMX file
    /// has no loader; it is read through the introspection channel only.
    pub fn load_slots(self) -> Option<usize> {
        match self {
            RegisterClass::Gpr => Some(18),
            RegisterClass::Fpr => Some(32),
            RegisterClass::Vsx => Some(64),
            RegisterClass::Vmx
            | RegisterClass::Ebb
            | RegisterClass::Spr
            | RegisterClass::TmSpr => None,
        }
    }

    /// Returns the note tag addressing the given plane of this class, or an
    /// error if the hardware does not preserve this class across a
    /// transaction.
    ///
    /// The `Spr` composite is addressed through three per-register notes and
    /// is handled separately; this returns its TAR note as a representative.
    pub fn note(self, plane: Plane) -> Result<i32, Error> {
        use notes::*;

        let note = match (self, plane) {
            (RegisterClass::Gpr, Plane::Live) => NT_PRSTATUS,
            (RegisterClass::Gpr, Plane::Checkpoint) => NT_PPC_TM_CGPR,
            (RegisterClass::Fpr, Plane::Live) => NT_PRFPREG,
            (RegisterClass::Fpr, Plane::Checkpoint) => NT_PPC_TM_CFPR,
            (RegisterClass::Vmx, Plane::Live) => NT_PPC_VMX,
            (RegisterClass::Vmx, Plane::Checkpoint) => NT_PPC_TM_CVMX,
            (RegisterClass::Vsx, Plane::Live) => NT_PPC_VSX,
            (RegisterClass::Vsx, Plane::Checkpoint) => NT_PPC_TM_CVSX,
            (RegisterClass::Ebb, Plane::Live) => NT_PPC_EBB,
            (RegisterClass::Spr, Plane::Live) => NT_PPC_TAR,
            (RegisterClass::Spr, Plane::Checkpoint) => NT_PPC_TM_CTAR,
            (RegisterClass::TmSpr, Plane::Live) => NT_PPC_TM_SPR,
            (RegisterClass::Ebb | RegisterClass::TmSpr, Plane::Checkpoint) => {
                return Err(Error::UnsupportedClass { class: self, plane })
            }
        };

        Ok(note)
    }

    /// Returns the three per-register notes making up the `Spr` composite for
    /// the given plane, in TAR, PPR, DSCR order.
    pub fn spr_notes(plane: Plane) -> [i32; 3] {
        use notes::*;

        match plane {
            Plane::Live => [NT_PPC_TAR, NT_PPC_PPR, NT_PPC_DSCR],
            Plane::Checkpoint => [NT_PPC_TM_CTAR, NT_PPC_TM_CPPR, NT_PPC_TM_CDSCR],
        }
    }
}

/// An owned copy of one plane of one register-set class.
///
/// Images are independent snapshots; mutating an image never affects the
/// traced process until it is written back explicitly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisterImage {
    class: RegisterClass,
    values: Vec<u64>,
}

impl RegisterImage {
    /// Creates a zero-filled image for the given class.
    pub fn zeroed(class: RegisterClass) -> Self {
        Self {
            class,
            values: vec![0; class.words()],
        }
    }

    /// Wraps existing values, checking them against the class's fixed size.
    pub fn new(class: RegisterClass, values: Vec<u64>) -> Result<Self, Error> {
        if values.len() != class.words() {
            return Err(Error::SizeMismatch {
                class,
                expected: class.words(),
                actual: values.len(),
            });
        }

        Ok(Self { class, values })
    }

    /// Returns the register class this image belongs to.
    pub fn class(&self) -> RegisterClass {
        self.class
    }

    /// Returns the raw payload words.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Returns the raw payload words for modification.
    pub fn values_mut(&mut self) -> &mut [u64] {
        &mut self.values
    }

    /// Returns the r14..r31 window of a GPR image, the subset the test
    /// loaders drive.
    pub fn gpr_window(&self) -> Option<&[u64]> {
        match self.class {
            RegisterClass::Gpr => Some(&self.values[slots::GPR_WINDOW..32]),
            _ => None,
        }
    }

    /// Returns the floating-point registers of an FPR image, without the
    /// trailing FPSCR word.
    pub fn fprs(&self) -> Option<&[u64]> {
        match self.class {
            RegisterClass::Fpr => Some(&self.values[..32]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_sizes_are_fixed() {
        assert_eq!(RegisterClass::Gpr.words(), 44);
        assert_eq!(RegisterClass::Fpr.words(), 33);
        assert_eq!(RegisterClass::Vmx.words(), 68);
        assert_eq!(RegisterClass::Vsx.words(), 32);
        assert_eq!(RegisterClass::Ebb.words(), 8);
        assert_eq!(RegisterClass::Spr.words(), 3);
        assert_eq!(RegisterClass::TmSpr.words(), 3);
    }

    #[test]
    fn loader_widths_exist_only_for_driven_classes() {
        assert_eq!(RegisterClass::Gpr.load_slots(), Some(18));
        assert_eq!(RegisterClass::Fpr.load_slots(), Some(32));
        assert_eq!(RegisterClass::Vsx.load_slots(), Some(64));
        assert_eq!(RegisterClass::Vmx.load_slots(), None);
    }

    #[test]
    fn checkpoint_notes_exist_for_preserved_classes() {
        for class in [
            RegisterClass::Gpr,
            RegisterClass::Fpr,
            RegisterClass::Vmx,
            RegisterClass::Vsx,
            RegisterClass::Spr,
        ] {
            assert!(class.note(Plane::Checkpoint).is_ok(), "{class:?}");
        }
    }

    #[test]
    fn checkpoint_plane_rejected_for_unpreserved_classes() {
        for class in [RegisterClass::Ebb, RegisterClass::TmSpr] {
            assert!(matches!(
                class.note(Plane::Checkpoint),
                Err(Error::UnsupportedClass { .. })
            ));
        }
    }

    #[test]
    fn every_class_has_a_live_note() {
        for class in RegisterClass::ALL {
            assert!(class.note(Plane::Live).is_ok(), "{class:?}");
        }
    }

    #[test]
    fn image_size_is_enforced() {
        let err = RegisterImage::new(RegisterClass::Fpr, vec![0; 7]).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                class: RegisterClass::Fpr,
                expected: 33,
                actual: 7,
            }
        ));
    }

    #[test]
    fn gpr_window_spans_r14_to_r31() {
        let mut image = RegisterImage::zeroed(RegisterClass::Gpr);

        for (i, slot) in image.values_mut()[slots::GPR_WINDOW..32]
            .iter_mut()
            .enumerate()
        {
            *slot = i as u64 + 1;
        }

        let window = image.gpr_window().unwrap();
        assert_eq!(window.len(), 18);
        assert_eq!(window[0], 1);
        assert_eq!(window[17], 18);
        assert!(RegisterImage::zeroed(RegisterClass::Fpr).gpr_window().is_none());
    }
}
