//! Special-purpose-register scenario, no transaction involved.
//!
//! The subject programs the DSCR and the thread priority (PPR) twice, with a
//! breakpoint after each round. The observer attaches once and uses
//! stop/inspect/continue cycles to verify the TAR/PPR/DSCR composite at both
//! breakpoints.

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::process::exit;
use tmtrace::harness::{self, Handshake};
use tmtrace::{arch, hwcap, Error, Plane, RegisterClass, Tracee};

const DSCR1: u64 = 10;
const DSCR2: u64 = 50;
/// PPR value after `or 1,1,1` (low priority).
const PPR_LOW: u64 = 0x0008_0000_0000_0000;
/// PPR value after `or 31,31,31` (very low priority).
const PPR_VERY_LOW: u64 = 0x0004_0000_0000_0000;

fn subject(hs: &Handshake) -> ! {
    arch::set_dscr(DSCR1);
    arch::set_priority_low();
    hs.reach(0);

    arch::set_dscr(DSCR2);
    arch::set_priority_very_low();
    hs.reach(1);

    exit(harness::PASS);
}

fn check_sprs(tracee: &Tracee, round: usize, dscr: u64, ppr: u64) -> Result<bool, Error> {
    let image = tracee.read(RegisterClass::Spr, Plane::Live)?;
    let values = image.values();

    let mut ok = true;

    if values[2] != dscr {
        eprintln!("round {round}: DSCR is {:#x}, expected {dscr:#x}", values[2]);
        ok = false;
    }

    if values[1] != ppr {
        eprintln!("round {round}: PPR is {:#x}, expected {ppr:#x}", values[1]);
        ok = false;
    }

    Ok(ok)
}

fn observe(hs: &Handshake, child: Pid) -> Result<bool, Error> {
    hs.wait(0);
    let tracee = Tracee::attach(child)?;
    let mut ok = check_sprs(&tracee, 0, DSCR1, PPR_LOW)?;
    hs.release(0);
    tracee.cont()?;

    hs.wait(1);
    tracee.stop()?;
    ok &= check_sprs(&tracee, 1, DSCR2, PPR_VERY_LOW)?;
    hs.release(1);
    tracee.detach()?;

    Ok(ok)
}

fn main() {
    harness::skip_if(!hwcap::has_dscr(), "DSCR facility not available");

    let hs = match Handshake::new(2) {
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
                    hs.release(1);
                    let _ = kill(child, Signal::SIGKILL);
                    harness::fail_on("observing the subject", &err);
                }
            };

            let status = match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, code)) => code,
                other => harness::fail(&format!("subject did not exit cleanly: {other:?}")),
            };

            if !ok {
                harness::fail("observed special-purpose registers did not match");
            }

            if status != harness::PASS {
                exit(status);
            }

            harness::pass("special-purpose registers observed at both breakpoints");
        }
        Err(err) => harness::fail_on("fork", &Error::from(err)),
    }
}
