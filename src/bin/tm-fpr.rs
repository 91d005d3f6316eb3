//! Commit-persistence scenario over the floating-point registers.
//!
//! All 32 FPR slots are seeded with the 0.3/0.2/0.1 bit patterns across the
//! checkpoint, in-transaction and pre-transaction buffers. The fused commit
//! sequence loads the checkpoint, enters, loads the in-transaction values,
//! loads the pre-transaction values while suspended and commits with nothing
//! to upset it; the transaction must commit, the last-loaded values must
//! survive the commit, and no abort status may be reported.

use tmtrace::harness;
use tmtrace::texasr;
use tmtrace::{arch, hwcap, BufferId, BufferSet, Outcome, RegisterClass, TxContext};

fn seeded(value: f64) -> Vec<u64> {
    vec![value.to_bits(); 32]
}

fn main() {
    harness::skip_if(!hwcap::has_htm(), "transactional memory not available");

    let prim = match arch::native() {
        Ok(prim) => prim,
        Err(err) => harness::fail_on("selecting primitives", &err),
    };
    let mut buffers = match BufferSet::new(RegisterClass::Fpr) {
        Ok(buffers) => buffers,
        Err(err) => harness::fail_on("allocating buffers", &err),
    };
    buffers
        .get_mut(BufferId::Checkpoint)
        .copy_from_slice(&seeded(0.3));
    buffers
        .get_mut(BufferId::InTransaction)
        .copy_from_slice(&seeded(0.2));
    buffers
        .get_mut(BufferId::PreTransaction)
        .copy_from_slice(&seeded(0.1));

    let mut ctx = TxContext::new(prim, buffers);

    match ctx.run_commit() {
        Ok((Outcome::Committed, live)) => {
            if !harness::check_words("f0..f31 after commit", &live, &seeded(0.1)) {
                harness::fail("committed register values did not persist");
            }

            harness::pass("transaction committed and register values persisted");
        }
        Ok((Outcome::Aborted { texasr, .. }, _)) => {
            println!("{}", texasr::describe(texasr));
            harness::fail("transaction aborted, expected a commit");
        }
        Ok((outcome, _)) => harness::fail(&format!("unexpected outcome {outcome:?}")),
        Err(err) => harness::fail_on("running the transaction", &err),
    }
}
