//! Checkpoint-fidelity scenario over the general-purpose registers.
//!
//! The subject checkpoints r14..r31 = [1, 2, .., 18], loads [2, 4, .., 36]
//! inside the transaction and parks at a breakpoint while suspended. The
//! observer attaches there and verifies both planes, then the subject
//! force-aborts and verifies that the hardware restored the live registers
//! to the checkpoint image.

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::process::exit;
use tmtrace::harness::{self, Handshake};
use tmtrace::texasr::{self, Cause};
use tmtrace::{
    arch, hwcap, BufferId, BufferSet, Error, Outcome, Plane, RegisterClass, Tracee, TxContext,
};

fn checkpoint_values() -> Vec<u64> {
    (1..=18).collect()
}

fn transactional_values() -> Vec<u64> {
    (1..=18).map(|v| 2 * v).collect()
}

fn subject(hs: &Handshake) -> ! {
    let prim = match arch::native() {
        Ok(prim) => prim,
        Err(err) => harness::fail_on("selecting primitives", &err),
    };
    let mut buffers = match BufferSet::new(RegisterClass::Gpr) {
        Ok(buffers) => buffers,
        Err(err) => harness::fail_on("allocating buffers", &err),
    };
    buffers
        .get_mut(BufferId::Checkpoint)
        .copy_from_slice(&checkpoint_values());
    buffers
        .get_mut(BufferId::InTransaction)
        .copy_from_slice(&transactional_values());

    let mut ctx = TxContext::new(prim, buffers);

    // The whole sequence runs as one fused unit; the forced abort rolls the
    // live registers back to the checkpoint image before they are captured.
    match ctx.run_suspended_abort(hs.park(0)) {
        Ok((Outcome::Aborted { texasr, tfiar }, live)) => {
            println!("{}", texasr::describe(texasr));
            println!("TFIAR: {tfiar:#x}");

            if !texasr::decode(texasr).contains(&Cause::SelfInduced) {
                harness::fail("abort was not recorded as self-induced");
            }

            if !harness::check_words("r14..r31 after abort", &live, &checkpoint_values()) {
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
    let live = tracee.read(RegisterClass::Gpr, Plane::Live)?;
    let ckpt = tracee.read(RegisterClass::Gpr, Plane::Checkpoint)?;

    let ok = harness::check_words(
        "live r14..r31 at breakpoint",
        live.gpr_window().unwrap_or(&[]),
        &transactional_values(),
    ) & harness::check_words(
        "checkpointed r14..r31 at breakpoint",
        ckpt.gpr_window().unwrap_or(&[]),
        &checkpoint_values(),
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
