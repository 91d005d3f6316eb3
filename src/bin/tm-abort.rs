//! Entry-and-abort scenario driven one primitive at a time.
//!
//! No register payload is verified here, so the transaction is driven
//! stepwise rather than as a fused sequence: everything written inside it is
//! rolled back wholesale, and nothing runs while suspended. The abort
//! surfaces as a second, `Aborted` completion of the `begin` call; the
//! recorded cause must be self-induced and the context must end up in the
//! aborted state.

use tmtrace::harness;
use tmtrace::texasr::{self, Cause};
use tmtrace::{arch, hwcap, BufferSet, Error, Outcome, RegisterClass, TxContext, TxState};

fn transact(ctx: &mut TxContext<arch::Native>) -> Result<Outcome, Error> {
    match ctx.begin()? {
        Outcome::Entered => ctx.force_abort(),
        outcome => Ok(outcome),
    }
}

fn main() {
    harness::skip_if(!hwcap::has_htm(), "transactional memory not available");

    let prim = match arch::native() {
        Ok(prim) => prim,
        Err(err) => harness::fail_on("selecting primitives", &err),
    };
    let buffers = match BufferSet::new(RegisterClass::Gpr) {
        Ok(buffers) => buffers,
        Err(err) => harness::fail_on("allocating buffers", &err),
    };

    let mut ctx = TxContext::new(prim, buffers);

    match transact(&mut ctx) {
        Ok(Outcome::Aborted { texasr, tfiar }) => {
            println!("{}", texasr::describe(texasr));
            println!("TFIAR: {tfiar:#x}");

            if !texasr::decode(texasr).contains(&Cause::SelfInduced) {
                harness::fail("abort was not recorded as self-induced");
            }

            if !matches!(ctx.state(), TxState::Aborted { .. }) {
                harness::fail(&format!("context ended up in {:?}", ctx.state()));
            }

            harness::pass("deliberate abort rolled back to the entry point");
        }
        Ok(outcome) => harness::fail(&format!(
            "transaction finished as {outcome:?}, expected an abort"
        )),
        Err(err) => harness::fail_on("running the transaction", &err),
    }
}
