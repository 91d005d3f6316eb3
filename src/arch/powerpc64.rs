//! This module provides code specific to the 64-bit PowerPC architecture:
//! the hardware-transactional-memory instruction primitives, the bare
//! register-file routines, and the fused verification sequences built from
//! them.
//!
//! The TM instructions are emitted as raw words so that no special target
//! feature is required of the assembler; the encodings are those of the
//! Power ISA v2.07 `tbegin.`/`tend.`/`tsuspend.`/`tresume.`/`tabort.`.
//!
//! The register-file routines are defined with `global_asm!` rather than as
//! Rust functions: a compiled function restores every callee-saved register
//! it clobbers before returning, which would undo the very loads these
//! routines exist to perform. They follow no calling convention beyond
//! "buffer address in r3" and are reached with `bl` from inside a single
//! `asm!` block per verification sequence, so no compiled frame ever runs
//! between loading the register file and entering or leaving the
//! transaction.

use super::{Park, TxPrimitives};
use crate::error::Error;
use crate::regset::{Plane, RegisterClass};
use core::arch::{asm, global_asm};

/// SPR number of the transaction failure instruction address register.
const SPRN_TFIAR: u32 = 129;
/// SPR number of the transaction exception and summary register.
const SPRN_TEXASR: u32 = 130;

// Register-file routines: buffer address in r3; the GPR forms touch r14..r31,
// the FPR forms f0..f31, the VSX forms vs0..vs31 and r4 as an offset scratch.

global_asm!(
    ".text",
    ".globl tmtrace_load_gprs",
    ".hidden tmtrace_load_gprs",
    "tmtrace_load_gprs:",
    "ld 14, 0(3)",
    "ld 15, 8(3)",
    "ld 16, 16(3)",
    "ld 17, 24(3)",
    "ld 18, 32(3)",
    "ld 19, 40(3)",
    "ld 20, 48(3)",
    "ld 21, 56(3)",
    "ld 22, 64(3)",
    "ld 23, 72(3)",
    "ld 24, 80(3)",
    "ld 25, 88(3)",
    "ld 26, 96(3)",
    "ld 27, 104(3)",
    "ld 28, 112(3)",
    "ld 29, 120(3)",
    "ld 30, 128(3)",
    "ld 31, 136(3)",
    "blr",
    ".globl tmtrace_store_gprs",
    ".hidden tmtrace_store_gprs",
    "tmtrace_store_gprs:",
    "std 14, 0(3)",
    "std 15, 8(3)",
    "std 16, 16(3)",
    "std 17, 24(3)",
    "std 18, 32(3)",
    "std 19, 40(3)",
    "std 20, 48(3)",
    "std 21, 56(3)",
    "std 22, 64(3)",
    "std 23, 72(3)",
    "std 24, 80(3)",
    "std 25, 88(3)",
    "std 26, 96(3)",
    "std 27, 104(3)",
    "std 28, 112(3)",
    "std 29, 120(3)",
    "std 30, 128(3)",
    "std 31, 136(3)",
    "blr",
);

global_asm!(
    ".text",
    ".globl tmtrace_load_fprs",
    ".hidden tmtrace_load_fprs",
    "tmtrace_load_fprs:",
    "lfd 0, 0(3)",
    "lfd 1, 8(3)",
    "lfd 2, 16(3)",
    "lfd 3, 24(3)",
    "lfd 4, 32(3)",
    "lfd 5, 40(3)",
    "lfd 6, 48(3)",
    "lfd 7, 56(3)",
    "lfd 8, 64(3)",
    "lfd 9, 72(3)",
    "lfd 10, 80(3)",
    "lfd 11, 88(3)",
    "lfd 12, 96(3)",
    "lfd 13, 104(3)",
    "lfd 14, 112(3)",
    "lfd 15, 120(3)",
    "lfd 16, 128(3)",
    "lfd 17, 136(3)",
    "lfd 18, 144(3)",
    "lfd 19, 152(3)",
    "lfd 20, 160(3)",
    "lfd 21, 168(3)",
    "lfd 22, 176(3)",
    "lfd 23, 184(3)",
    "lfd 24, 192(3)",
    "lfd 25, 200(3)",
    "lfd 26, 208(3)",
    "lfd 27, 216(3)",
    "lfd 28, 224(3)",
    "lfd 29, 232(3)",
    "lfd 30, 240(3)",
    "lfd 31, 248(3)",
    "blr",
    ".globl tmtrace_store_fprs",
    ".hidden tmtrace_store_fprs",
    "tmtrace_store_fprs:",
    "stfd 0, 0(3)",
    "stfd 1, 8(3)",
    "stfd 2, 16(3)",
    "stfd 3, 24(3)",
    "stfd 4, 32(3)",
    "stfd 5, 40(3)",
    "stfd 6, 48(3)",
    "stfd 7, 56(3)",
    "stfd 8, 64(3)",
    "stfd 9, 72(3)",
    "stfd 10, 80(3)",
    "stfd 11, 88(3)",
    "stfd 12, 96(3)",
    "stfd 13, 104(3)",
    "stfd 14, 112(3)",
    "stfd 15, 120(3)",
    "stfd 16, 128(3)",
    "stfd 17, 136(3)",
    "stfd 18, 144(3)",
    "stfd 19, 152(3)",
    "stfd 20, 160(3)",
    "stfd 21, 168(3)",
    "stfd 22, 176(3)",
    "stfd 23, 184(3)",
    "stfd 24, 192(3)",
    "stfd 25, 200(3)",
    "stfd 26, 208(3)",
    "stfd 27, 216(3)",
    "stfd 28, 224(3)",
    "stfd 29, 232(3)",
    "stfd 30, 240(3)",
    "stfd 31, 248(3)",
    "blr",
);

global_asm!(
    ".text",
    ".globl tmtrace_load_vsx",
    ".hidden tmtrace_load_vsx",
    "tmtrace_load_vsx:",
    "li 4, 0",
    "lxvd2x 0, 4, 3",
    "li 4, 16",
    "lxvd2x 1, 4, 3",
    "li 4, 32",
    "lxvd2x 2, 4, 3",
    "li 4, 48",
    "lxvd2x 3, 4, 3",
    "li 4, 64",
    "lxvd2x 4, 4, 3",
    "li 4, 80",
    "lxvd2x 5, 4, 3",
    "li 4, 96",
    "lxvd2x 6, 4, 3",
    "li 4, 112",
    "lxvd2x 7, 4, 3",
    "li 4, 128",
    "lxvd2x 8, 4, 3",
    "li 4, 144",
    "lxvd2x 9, 4, 3",
    "li 4, 160",
    "lxvd2x 10, 4, 3",
    "li 4, 176",
    "lxvd2x 11, 4, 3",
    "li 4, 192",
    "lxvd2x 12, 4, 3",
    "li 4, 208",
    "lxvd2x 13, 4, 3",
    "li 4, 224",
    "lxvd2x 14, 4, 3",
    "li 4, 240",
    "lxvd2x 15, 4, 3",
    "li 4, 256",
    "lxvd2x 16, 4, 3",
    "li 4, 272",
    "lxvd2x 17, 4, 3",
    "li 4, 288",
    "lxvd2x 18, 4, 3",
    "li 4, 304",
    "lxvd2x 19, 4, 3",
    "li 4, 320",
    "lxvd2x 20, 4, 3",
    "li 4, 336",
    "lxvd2x 21, 4, 3",
    "li 4, 352",
    "lxvd2x 22, 4, 3",
    "li 4, 368",
    "lxvd2x 23, 4, 3",
    "li 4, 384",
    "lxvd2x 24, 4, 3",
    "li 4, 400",
    "lxvd2x 25, 4, 3",
    "li 4, 416",
    "lxvd2x 26, 4, 3",
    "li 4, 432",
    "lxvd2x 27, 4, 3",
    "li 4, 448",
    "lxvd2x 28, 4, 3",
    "li 4, 464",
    "lxvd2x 29, 4, 3",
    "li 4, 480",
    "lxvd2x 30, 4, 3",
    "li 4, 496",
    "lxvd2x 31, 4, 3",
    "blr",
    ".globl tmtrace_store_vsx",
    ".hidden tmtrace_store_vsx",
    "tmtrace_store_vsx:",
    "li 4, 0",
    "stxvd2x 0, 4, 3",
    "li 4, 16",
    "stxvd2x 1, 4, 3",
    "li 4, 32",
    "stxvd2x 2, 4, 3",
    "li 4, 48",
    "stxvd2x 3, 4, 3",
    "li 4, 64",
    "stxvd2x 4, 4, 3",
    "li 4, 80",
    "stxvd2x 5, 4, 3",
    "li 4, 96",
    "stxvd2x 6, 4, 3",
    "li 4, 112",
    "stxvd2x 7, 4, 3",
    "li 4, 128",
    "stxvd2x 8, 4, 3",
    "li 4, 144",
    "stxvd2x 9, 4, 3",
    "li 4, 160",
    "stxvd2x 10, 4, 3",
    "li 4, 176",
    "stxvd2x 11, 4, 3",
    "li 4, 192",
    "stxvd2x 12, 4, 3",
    "li 4, 208",
    "stxvd2x 13, 4, 3",
    "li 4, 224",
    "stxvd2x 14, 4, 3",
    "li 4, 240",
    "stxvd2x 15, 4, 3",
    "li 4, 256",
    "stxvd2x 16, 4, 3",
    "li 4, 272",
    "stxvd2x 17, 4, 3",
    "li 4, 288",
    "stxvd2x 18, 4, 3",
    "li 4, 304",
    "stxvd2x 19, 4, 3",
    "li 4, 320",
    "stxvd2x 20, 4, 3",
    "li 4, 336",
    "stxvd2x 21, 4, 3",
    "li 4, 352",
    "stxvd2x 22, 4, 3",
    "li 4, 368",
    "stxvd2x 23, 4, 3",
    "li 4, 384",
    "stxvd2x 24, 4, 3",
    "li 4, 400",
    "stxvd2x 25, 4, 3",
    "li 4, 416",
    "stxvd2x 26, 4, 3",
    "li 4, 432",
    "stxvd2x 27, 4, 3",
    "li 4, 448",
    "stxvd2x 28, 4, 3",
    "li 4, 464",
    "stxvd2x 29, 4, 3",
    "li 4, 480",
    "stxvd2x 30, 4, 3",
    "li 4, 496",
    "stxvd2x 31, 4, 3",
    "blr",
);

/// One fused load/begin/load/suspend/park/resume/abort/capture run over a
/// single register file. The pointer operands sit in volatile registers the
/// routines leave alone, so the rollback finds them intact; the captured
/// values leave the block through memory before any compiled epilogue can
/// touch the register file. Returns the recorded TEXASR and TFIAR values.
macro_rules! abort_sequence {
    ($name:ident, $load:literal, $store:literal, $($clobbers:tt)*) => {
        unsafe fn $name(
            checkpoint: *const u64,
            transactional: *const u64,
            arrived: *mut u32,
            released: *const u32,
            live: *mut u64,
        ) -> (u64, u64) {
            let texasr: u64;
            let tfiar: u64;

            asm!(
                "mflr {lr}",
                "mr 3, {ckpt}",
                concat!("bl ", $load),
                ".long 0x7c00051d", // tbegin.
                "beq 2f",
                "mr 3, {tx}",
                concat!("bl ", $load),
                ".long 0x7c0005dd", // tsuspend.
                "li 5, 1",
                "stw 5, 0({arrived})",
                "3:",
                "lwz 5, 0({released})",
                "cmpwi 5, 1",
                "bne 3b",
                ".long 0x7c2005dd", // tresume.
                "li 3, 1",
                ".long 0x7c03071d", // tabort. 3
                // The rollback lands on the beq above; from here on every
                // register holds its checkpointed value.
                "2:",
                "mr 3, {live}",
                concat!("bl ", $store),
                "mfspr {ckpt}, {sprn_texasr}", // the pointer is dead past entry
                "mfspr {tx}, {sprn_tfiar}",
                "mtlr {lr}",
                lr = out(reg_nonzero) _,
                ckpt = inout(reg_nonzero) checkpoint => texasr,
                tx = inout(reg_nonzero) transactional => tfiar,
                arrived = in(reg_nonzero) arrived,
                released = in(reg_nonzero) released,
                live = in(reg_nonzero) live,
                sprn_texasr = const SPRN_TEXASR,
                sprn_tfiar = const SPRN_TFIAR,
                out("r3") _,
                out("r5") _,
                out("cr0") _,
                $($clobbers)*
            );

            (texasr, tfiar)
        }
    };
}

/// One fused load/begin/load/suspend/load/resume/commit/capture run. Returns
/// (committed, TEXASR, TFIAR); the status pair is zero when the transaction
/// committed.
macro_rules! commit_sequence {
    ($name:ident, $load:literal, $store:literal, $($clobbers:tt)*) => {
        unsafe fn $name(
            checkpoint: *const u64,
            transactional: *const u64,
            suspended: *const u64,
            live: *mut u64,
        ) -> (u64, u64, u64) {
            let committed: u64;
            let texasr: u64;
            let tfiar: u64;

            asm!(
                "mflr {lr}",
                "mr 3, {ckpt}",
                concat!("bl ", $load),
                ".long 0x7c00051d", // tbegin.
                "beq 2f",
                "mr 3, {tx}",
                concat!("bl ", $load),
                ".long 0x7c0005dd", // tsuspend.
                "mr 3, {pre}",
                concat!("bl ", $load),
                ".long 0x7c2005dd", // tresume.
                ".long 0x7c00055d", // tend.
                "li {ckpt}, 1",
                "li {tx}, 0",
                "li {pre}, 0",
                "b 3f",
                // A doomed transaction rolls back to the beq above instead of
                // completing the tend.
                "2:",
                "li {ckpt}, 0",
                "mfspr {tx}, {sprn_texasr}",
                "mfspr {pre}, {sprn_tfiar}",
                "3:",
                "mr 3, {live}",
                concat!("bl ", $store),
                "mtlr {lr}",
                lr = out(reg_nonzero) _,
                ckpt = inout(reg_nonzero) checkpoint => committed,
                tx = inout(reg_nonzero) transactional => texasr,
                pre = inout(reg_nonzero) suspended => tfiar,
                live = in(reg_nonzero) live,
                sprn_texasr = const SPRN_TEXASR,
                sprn_tfiar = const SPRN_TFIAR,
                out("r3") _,
                out("cr0") _,
                $($clobbers)*
            );

            (committed, texasr, tfiar)
        }
    };
}

abort_sequence!(
    seq_abort_gprs, "tmtrace_load_gprs", "tmtrace_store_gprs",
    out("r14") _, out("r15") _, out("r16") _, out("r17") _,
    out("r18") _, out("r19") _, out("r20") _, out("r21") _,
    out("r22") _, out("r23") _, out("r24") _, out("r25") _,
    out("r26") _, out("r27") _, out("r28") _, out("r29") _,
    out("r30") _, out("r31") _,
);

abort_sequence!(
    seq_abort_fprs, "tmtrace_load_fprs", "tmtrace_store_fprs",
    out("f0") _, out("f1") _, out("f2") _, out("f3") _,
    out("f4") _, out("f5") _, out("f6") _, out("f7") _,
    out("f8") _, out("f9") _, out("f10") _, out("f11") _,
    out("f12") _, out("f13") _, out("f14") _, out("f15") _,
    out("f16") _, out("f17") _, out("f18") _, out("f19") _,
    out("f20") _, out("f21") _, out("f22") _, out("f23") _,
    out("f24") _, out("f25") _, out("f26") _, out("f27") _,
    out("f28") _, out("f29") _, out("f30") _, out("f31") _,
);

abort_sequence!(
    seq_abort_vsx, "tmtrace_load_vsx", "tmtrace_store_vsx",
    out("r4") _,
    out("f0") _, out("f1") _, out("f2") _, out("f3") _,
    out("f4") _, out("f5") _, out("f6") _, out("f7") _,
    out("f8") _, out("f9") _, out("f10") _, out("f11") _,
    out("f12") _, out("f13") _, out("f14") _, out("f15") _,
    out("f16") _, out("f17") _, out("f18") _, out("f19") _,
    out("f20") _, out("f21") _, out("f22") _, out("f23") _,
    out("f24") _, out("f25") _, out("f26") _, out("f27") _,
    out("f28") _, out("f29") _, out("f30") _, out("f31") _,
);

commit_sequence!(
    seq_commit_gprs, "tmtrace_load_gprs", "tmtrace_store_gprs",
    out("r14") _, out("r15") _, out("r16") _, out("r17") _,
    out("r18") _, out("r19") _, out("r20") _, out("r21") _,
    out("r22") _, out("r23") _, out("r24") _, out("r25") _,
    out("r26") _, out("r27") _, out("r28") _, out("r29") _,
    out("r30") _, out("r31") _,
);

commit_sequence!(
    seq_commit_fprs, "tmtrace_load_fprs", "tmtrace_store_fprs",
    out("f0") _, out("f1") _, out("f2") _, out("f3") _,
    out("f4") _, out("f5") _, out("f6") _, out("f7") _,
    out("f8") _, out("f9") _, out("f10") _, out("f11") _,
    out("f12") _, out("f13") _, out("f14") _, out("f15") _,
    out("f16") _, out("f17") _, out("f18") _, out("f19") _,
    out("f20") _, out("f21") _, out("f22") _, out("f23") _,
    out("f24") _, out("f25") _, out("f26") _, out("f27") _,
    out("f28") _, out("f29") _, out("f30") _, out("f31") _,
);

commit_sequence!(
    seq_commit_vsx, "tmtrace_load_vsx", "tmtrace_store_vsx",
    out("r4") _,
    out("f0") _, out("f1") _, out("f2") _, out("f3") _,
    out("f4") _, out("f5") _, out("f6") _, out("f7") _,
    out("f8") _, out("f9") _, out("f10") _, out("f11") _,
    out("f12") _, out("f13") _, out("f14") _, out("f15") _,
    out("f16") _, out("f17") _, out("f18") _, out("f19") _,
    out("f20") _, out("f21") _, out("f22") _, out("f23") _,
    out("f24") _, out("f25") _, out("f26") _, out("f27") _,
    out("f28") _, out("f29") _, out("f30") _, out("f31") _,
);

/// Checks every buffer of a fused sequence against the class's loader width.
fn check_widths(class: RegisterClass, lengths: &[usize]) -> Result<(), Error> {
    let expected = class.load_slots().ok_or(Error::UnsupportedClass {
        class,
        plane: Plane::Live,
    })?;

    for &actual in lengths {
        if actual != expected {
            return Err(Error::SizeMismatch {
                class,
                expected,
                actual,
            });
        }
    }

    Ok(())
}

/// The hardware-transactional-memory primitives of POWER8 and later.
#[derive(Debug)]
pub struct Htm;

impl Htm {
    /// Constructs the primitives. The caller is expected to have consulted
    /// the feature gate; executing any primitive on a CPU without HTM raises
    /// SIGILL.
    pub fn new() -> Self {
        Self
    }
}

impl Default for Htm {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPrimitives for Htm {
    fn begin(&mut self) -> bool {
        let mut entered: u64 = 0;

        // tbegin. sets cr0.eq on the abort path. A later rollback restores
        // the register state as of this instruction (entered = 0) and
        // resumes at the beq, which is how the second, false-returning
        // completion of this call comes about.
        unsafe {
            asm!(
                ".long 0x7c00051d", // tbegin.
                "beq 2f",
                "li {e}, 1",
                "2:",
                e = inout(reg) entered,
                out("cr0") _,
                options(nostack),
            );
        }

        entered != 0
    }

    fn suspend(&mut self) {
        unsafe {
            asm!(".long 0x7c0005dd", options(nostack)); // tsuspend.
        }
    }

    fn resume(&mut self) {
        unsafe {
            asm!(".long 0x7c2005dd", options(nostack)); // tresume.
        }
    }

    fn end(&mut self) -> bool {
        // tend. on a doomed transaction rolls back to the tbegin. site and
        // never completes here.
        unsafe {
            asm!(".long 0x7c00055d", out("cr0") _, options(nostack)); // tend.
        }

        true
    }

    fn force_abort(&mut self) {
        // tabort. 3 with a nonzero code in r3; the hardware records the
        // abort as self-induced (TEXASR_ABT).
        unsafe {
            asm!(
                "li 3, 1",
                ".long 0x7c03071d", // tabort. 3
                out("r3") _,
                out("cr0") _,
                options(nostack),
            );
        }
    }

    fn abort_status(&self) -> u64 {
        let texasr: u64;

        unsafe {
            asm!(
                "mfspr {t}, {sprn}",
                t = out(reg) texasr,
                sprn = const SPRN_TEXASR,
                options(nomem, nostack),
            );
        }

        texasr
    }

    fn failure_address(&self) -> u64 {
        let tfiar: u64;

        unsafe {
            asm!(
                "mfspr {t}, {sprn}",
                t = out(reg) tfiar,
                sprn = const SPRN_TFIAR,
                options(nomem, nostack),
            );
        }

        tfiar
    }

    fn abort_while_suspended(
        &mut self,
        class: RegisterClass,
        checkpoint: &[u64],
        transactional: &[u64],
        park: Park<'_>,
        live: &mut [u64],
    ) -> Result<(u64, u64), Error> {
        check_widths(class, &[checkpoint.len(), transactional.len(), live.len()])?;

        let arrived = park.arrived().as_ptr();
        let released = park.released().as_ptr() as *const u32;

        let status = unsafe {
            match class {
                RegisterClass::Gpr => seq_abort_gprs(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    arrived,
                    released,
                    live.as_mut_ptr(),
                ),
                RegisterClass::Fpr => seq_abort_fprs(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    arrived,
                    released,
                    live.as_mut_ptr(),
                ),
                RegisterClass::Vsx => seq_abort_vsx(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    arrived,
                    released,
                    live.as_mut_ptr(),
                ),
                _ => {
                    return Err(Error::UnsupportedClass {
                        class,
                        plane: Plane::Live,
                    })
                }
            }
        };

        Ok(status)
    }

    fn commit_with_suspended_load(
        &mut self,
        class: RegisterClass,
        checkpoint: &[u64],
        transactional: &[u64],
        suspended: &[u64],
        live: &mut [u64],
    ) -> Result<Option<(u64, u64)>, Error> {
        check_widths(
            class,
            &[
                checkpoint.len(),
                transactional.len(),
                suspended.len(),
                live.len(),
            ],
        )?;

        let (committed, texasr, tfiar) = unsafe {
            match class {
                RegisterClass::Gpr => seq_commit_gprs(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    suspended.as_ptr(),
                    live.as_mut_ptr(),
                ),
                RegisterClass::Fpr => seq_commit_fprs(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    suspended.as_ptr(),
                    live.as_mut_ptr(),
                ),
                RegisterClass::Vsx => seq_commit_vsx(
                    checkpoint.as_ptr(),
                    transactional.as_ptr(),
                    suspended.as_ptr(),
                    live.as_mut_ptr(),
                ),
                _ => {
                    return Err(Error::UnsupportedClass {
                        class,
                        plane: Plane::Live,
                    })
                }
            }
        };

        Ok(if committed != 0 {
            None
        } else {
            Some((texasr, tfiar))
        })
    }
}

/// SPR number of the Data Stream Control Register, user access.
const SPRN_DSCR: u32 = 3;

/// Programs the DSCR of the current thread.
pub fn set_dscr(value: u64) {
    unsafe {
        asm!(
            "mtspr {sprn}, {v}",
            sprn = const SPRN_DSCR,
            v = in(reg) value,
            options(nomem, nostack),
        );
    }
}

/// Drops the thread priority to low: the `or 1,1,1` priority hint.
pub fn set_priority_low() {
    unsafe {
        asm!("or 1, 1, 1", options(nomem, nostack));
    }
}

/// Drops the thread priority to very low: the `or 31,31,31` priority hint.
pub fn set_priority_very_low() {
    unsafe {
        asm!("or 31, 31, 31", options(nomem, nostack));
    }
}
