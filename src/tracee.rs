//! This module implements the register-set introspector: a handle over an
//! attached process through which typed register sets, including the
//! transactional checkpoint shadows, are read and written.

use crate::error::Error;
use crate::regset::{Plane, RegisterClass, RegisterImage};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// An attached traced process.
///
/// The handle is created by [`Tracee::attach`] and destroyed by
/// [`Tracee::detach`]; no register-set operation exists outside that window.
/// All images read through the handle are independent snapshots.
#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
}

impl Tracee {
    /// Attaches to the process with the given process ID, blocking until it
    /// is confirmed stopped.
    pub fn attach(pid: Pid) -> Result<Self, Error> {
        ptrace::attach(pid).map_err(|errno| match errno {
            Errno::ESRCH => Error::NoSuchProcess(pid.as_raw()),
            Errno::EPERM | Errno::EACCES => Error::PermissionDenied(pid.as_raw()),
            errno => Error::Nix(errno),
        })?;

        Self::confirm_stopped(pid, waitpid(pid, None)?)?;

        Ok(Self { pid })
    }

    /// A wait that reports anything but a stop means the target is gone, not
    /// inspectable.
    fn confirm_stopped(pid: Pid, status: WaitStatus) -> Result<(), Error> {
        match status {
            WaitStatus::Stopped(..) => Ok(()),
            _ => Err(Error::Terminated(pid.as_raw())),
        }
    }

    /// Returns the process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.as_raw() as _
    }

    /// Resumes the stopped target without detaching, allowing repeated
    /// stop/inspect/continue rounds.
    pub fn cont(&self) -> Result<(), Error> {
        ptrace::cont(self.pid, None)?;

        Ok(())
    }

    /// Stops the running target again, blocking until it is confirmed
    /// stopped.
    pub fn stop(&self) -> Result<(), Error> {
        signal::kill(self.pid, Signal::SIGSTOP)?;

        Self::confirm_stopped(self.pid, waitpid(self.pid, None)?)
    }

    /// Releases the binding and resumes the target. The handle is consumed;
    /// no further operation is possible on it.
    pub fn detach(self) -> Result<(), Error> {
        ptrace::detach(self.pid, None)?;

        Ok(())
    }

    /// Reads a private copy of the named plane of the given register class.
    pub fn read(&self, class: RegisterClass, plane: Plane) -> Result<RegisterImage, Error> {
        let mut image = RegisterImage::zeroed(class);

        if class == RegisterClass::Spr {
            for (slot, note) in image
                .values_mut()
                .iter_mut()
                .zip(RegisterClass::spr_notes(plane))
            {
                let mut word = [0u64; 1];
                self.getregset(note, &mut word, class, plane)?;
                *slot = word[0];
            }
        } else {
            let note = class.note(plane)?;
            self.getregset(note, image.values_mut(), class, plane)?;
        }

        Ok(image)
    }

    /// Overwrites the named plane of the given register class with the
    /// supplied values. The value count must match the fixed payload size of
    /// the class; nothing is written on a mismatch.
    pub fn write(
        &mut self,
        class: RegisterClass,
        plane: Plane,
        values: &[u64],
    ) -> Result<(), Error> {
        if values.len() != class.words() {
            return Err(Error::SizeMismatch {
                class,
                expected: class.words(),
                actual: values.len(),
            });
        }

        if class == RegisterClass::Spr {
            for (slot, note) in values.iter().zip(RegisterClass::spr_notes(plane)) {
                let word = [*slot];
                self.setregset(note, &word, class, plane)?;
            }
        } else {
            let note = class.note(plane)?;
            self.setregset(note, values, class, plane)?;
        }

        Ok(())
    }

    fn getregset(
        &self,
        note: i32,
        buf: &mut [u64],
        class: RegisterClass,
        plane: Plane,
    ) -> Result<(), Error> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: std::mem::size_of_val(buf),
        };

        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                self.pid.as_raw(),
                note as usize,
                &mut iov as *mut libc::iovec,
            )
        };

        self.regset_result(ret, class, plane)
    }

    fn setregset(
        &self,
        note: i32,
        buf: &[u64],
        class: RegisterClass,
        plane: Plane,
    ) -> Result<(), Error> {
        let mut iov = libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: std::mem::size_of_val(buf),
        };

        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                self.pid.as_raw(),
                note as usize,
                &mut iov as *mut libc::iovec,
            )
        };

        self.regset_result(ret, class, plane)
    }

    fn regset_result(
        &self,
        ret: libc::c_long,
        class: RegisterClass,
        plane: Plane,
    ) -> Result<(), Error> {
        Errno::result(ret).map(drop).map_err(|errno| match errno {
            // The kernel reports TM register sets this way while the target
            // has no transactional state to expose.
            Errno::EIO | Errno::ENODATA => Error::Unavailable { class, plane },
            Errno::ESRCH => Error::NoSuchProcess(self.pid.as_raw()),
            errno => Error::Nix(errno),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_to_a_missing_process_is_reported() {
        // PID_MAX_LIMIT is 2^22; this one cannot exist.
        let err = Tracee::attach(Pid::from_raw(0x7f_ffff)).unwrap_err();

        assert!(matches!(err, Error::NoSuchProcess(_)));
    }

    #[test]
    fn only_a_stop_confirms_the_target() {
        let pid = Pid::from_raw(4321);

        assert!(Tracee::confirm_stopped(pid, WaitStatus::Stopped(pid, Signal::SIGSTOP)).is_ok());
        assert!(matches!(
            Tracee::confirm_stopped(pid, WaitStatus::Exited(pid, 0)),
            Err(Error::Terminated(4321))
        ));
        assert!(matches!(
            Tracee::confirm_stopped(pid, WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Err(Error::Terminated(4321))
        ));
    }
}
