//! Checkpoint-fidelity scenario over the vector-scalar registers.
//!
//! Both 64-bit lanes of each VSR are seeded to the same doubleword, so the
//! comparison against the 32-word VSX register set (which exposes one
//! doubleword per register) is independent of lane order. The flow matches
//! tm-gpr: breakpoint inside the suspended transaction, external read of
//! both planes, forced abort, restore check.

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::process::exit;
use tmtrace::harness::{self, Handshake};
use tmtrace::texasr::{self, Cause};
use tmtrace::{
    arch, hwcap, BufferId, BufferSet, Error, Outcome, Plane, RegisterClass, Tracee, TxContext,
};

/// 32 VSRs, two lanes each, both lanes holding `base + register index`.
fn lanes(base: u64) -> Vec<u64> {
    (0..32).flat_map(|i| [base + i, base + i]).collect()
}

/// The per-register doublewords the VSX register set is expected to show.
fn expected(base: u64) -> Vec<u64> {
    (0..32).map(|i| base + i).collect()
}

const CKPT_BASE: u64 = 0x1001;
const TX_BASE: u64 = 0x2001;

fn subject(hs: &Handshake) -> ! {
    let prim = match arch::native() {
        Ok(prim) => prim,
        Err(err) => harness::fail_on("selecting primitives", &err),
    };
    let mut buffers = match BufferSet::new(RegisterClass::Vsx) {
        Ok(buffers) => buffers,
        Err(err) => harness::fail_on("allocating buffers", &err),
    };
    buffers
        .get_mut(BufferId::Checkpoint)
        .copy_from_slice(&lanes(CKPT_BASE));
    buffers
        .get_mut(BufferId::InTransaction)
        .copy_from_slice(&lanes(TX_BASE));

    let mut ctx = TxContext::new(prim, buffers);

    match ctx.run_suspended_abort(hs.park(0)) {
        Ok((Outcome::Aborted { texasr, tfiar }, live)) => {
            println!("{}", texasr::describe(texasr));
            println!("TFIAR: {tfiar:#x}");

            if !texasr::decode(texasr).contains(&Cause::SelfInduced) {
                harness::fail("abort was not recorded as self-induced");
            }

            if !harness::check_words("vs0..vs31 after abort", &live, &lanes(CKPT_BASE)) {
                harness::fail("live registers were not restored to the checkpoint");
            }

            harness::pass("registers restored to the checkpoint after abort");
        }
        Ok((outcome, _)) => harness::fail(&format!(
            "transaction finished as {outcome:?}, expected an abort"
        )),
        Err(err) => harness::fail_on("running the transaction", &err),
    }
}

fn observe(hs: &Handshake, child: Pid) -> Result<bool, Error> {
    hs.wait(0);

    let tracee = Tracee::attach(child)?;
    let live = tracee.read(RegisterClass::Vsx, Plane::Live)?;
    let ckpt = tracee.read(RegisterClass::Vsx, Plane::Checkpoint)?;

    let ok = harness::check_words("live VSX at breakpoint", live.values(), &expected(TX_BASE))
        & harness::check_words(
            "checkpointed VSX at breakpoint",
            ckpt.values(),
            &expected(CKPT_BASE),
        );

    hs.release(0);
    tracee.detach()?;

    Ok(ok)
}

fn main() {
    harness::skip_if(!hwcap::has_htm(), "transactional memory not available");

    let hs = match Handshake::new(1) {
        Ok(hs) => hs,
        Err(err) => harness::fail_on("mapping the handshake page", &err),
    };

    match unsafe { fork() } {
        Ok(ForkResult::Child) => subject(&hs),
        Ok(ForkResult::Parent { child }) => {
            let ok = match observe(&hs, child) {
                Ok(ok) => ok,
                Err(err) => {
                    hs.release(0);
                    let _ = kill(child, Signal::SIGKILL);
                    harness::fail_on("observing the subject", &err);
                }
            };

            let status = match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => code,
                other => harness::fail(&format!("subject did not exit cleanly: {other:?}")),
            };

            if !ok {
                harness::fail("observed register images did not match");
            }

            exit(status);
        }
        Err(err) => harness::fail_on("fork", &Error::from(err)),
    }
}
