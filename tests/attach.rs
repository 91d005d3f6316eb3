//! Exercises the introspector's handle lifecycle against a real child
//! process: attach blocks until the target stops, stop/continue cycles work
//! repeatedly, and the argument checks fire before anything touches the
//! target.

#![cfg(target_os = "linux")]

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use tmtrace::harness::Handshake;
use tmtrace::{Error, Plane, RegisterClass, Tracee};

#[test]
fn handle_lifecycle_against_a_live_child() {
    let hs = Handshake::new(1).unwrap();

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            hs.reach(0);
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            let mut tracee = Tracee::attach(child).unwrap();
            assert_eq!(tracee.process_id(), child.as_raw() as u32);

            // Repeated stop/inspect/continue rounds within one attachment.
            tracee.cont().unwrap();
            tracee.stop().unwrap();
            tracee.cont().unwrap();
            tracee.stop().unwrap();

            // A short image is rejected before any state is touched.
            let err = tracee
                .write(RegisterClass::Gpr, Plane::Live, &[0; 5])
                .unwrap_err();
            assert!(matches!(
                err,
                Error::SizeMismatch {
                    class: RegisterClass::Gpr,
                    expected: 44,
                    actual: 5,
                }
            ));

            // Classes the hardware does not checkpoint are caller errors.
            let err = tracee
                .read(RegisterClass::TmSpr, Plane::Checkpoint)
                .unwrap_err();
            assert!(matches!(err, Error::UnsupportedClass { .. }));

            tracee.detach().unwrap();

            hs.release(0);
            assert_eq!(
                waitpid(child, None).unwrap(),
                WaitStatus::Exited(child, 0)
            );
        }
    }
}
