//! fork/wait helpers.
//!
//! Many checks can only be observed from a second process: a SIGSEGV that
//! must kill somebody, a write that must be visible across fork, an EPERM
//! that only an unprivileged process sees. These helpers keep that
//! boilerplate out of the programs.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use crate::errno::Errno;
use crate::error::Error;

/// Exit code of a child whose closure panicked.
pub const EXIT_PANIC: i32 = 101;

/// Decoded `waitpid` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled { signal: i32, core_dumped: bool },
    Stopped(i32),
    Continued,
}

impl WaitStatus {
    /// Decode the raw status word using the Linux encoding.
    pub fn decode(raw: i32) -> WaitStatus {
        let low = raw & 0x7f;
        if raw == 0xffff {
            WaitStatus::Continued
        } else if low == 0 {
            WaitStatus::Exited((raw >> 8) & 0xff)
        } else if raw & 0xff == 0x7f {
            WaitStatus::Stopped((raw >> 8) & 0xff)
        } else {
            WaitStatus::Signaled {
                signal: low,
                core_dumped: raw & 0x80 != 0,
            }
        }
    }

    pub fn exited_with(self, code: i32) -> bool {
        self == WaitStatus::Exited(code)
    }

    pub fn killed_by(self, sig: i32) -> bool {
        matches!(self, WaitStatus::Signaled { signal, .. } if signal == sig)
    }
}

/// Fork. The child runs `f` and `_exit`s with its return value; the parent
/// gets the child's pid.
pub fn fork_child<F>(f: F) -> Result<libc::pid_t, Error>
where
    F: FnOnce() -> i32,
{
    let _ = std::io::stdout().flush();
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Os {
            call: "fork()".to_string(),
            errno: Errno::last(),
        });
    }
    if pid == 0 {
        let code = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(EXIT_PANIC);
        let _ = std::io::stdout().flush();
        unsafe { libc::_exit(code) };
    }
    Ok(pid)
}

/// Wait for `pid`, retrying on EINTR.
pub fn wait_for(pid: libc::pid_t) -> Result<WaitStatus, Error> {
    wait_with(pid, 0)
}

/// `waitpid` with explicit options (`WUNTRACED`, `__WALL`, ...).
pub fn wait_with(pid: libc::pid_t, options: i32) -> Result<WaitStatus, Error> {
    let mut status = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, options) };
        if ret >= 0 {
            log::debug!("waitpid({}) -> {:#x}", pid, status);
            return Ok(WaitStatus::decode(status));
        }
        let errno = Errno::last();
        if errno != Errno::EINTR {
            return Err(Error::Os {
                call: format!("waitpid({})", pid),
                errno,
            });
        }
    }
}

/// Fork, run `f` in the child and wait for it.
pub fn run_in_child<F>(f: F) -> Result<WaitStatus, Error>
where
    F: FnOnce() -> i32,
{
    let pid = fork_child(f)?;
    wait_for(pid)
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Become `uid`/`gid` with no supplementary groups. Irreversible; call it
/// in a child.
pub fn drop_privileges(uid: libc::uid_t, gid: libc::gid_t) -> Result<(), Error> {
    if unsafe { libc::setgroups(0, std::ptr::null()) } < 0 && is_root() {
        return Err(Error::Os {
            call: "setgroups(0, NULL)".to_string(),
            errno: Errno::last(),
        });
    }
    Error::from_ret("setgid", unsafe { libc::setgid(gid) } as i64)?;
    Error::from_ret("setuid", unsafe { libc::setuid(uid) } as i64)?;
    Ok(())
}

/// The conventional unprivileged identity.
pub const NOBODY: libc::uid_t = 65534;

/// `struct clone_args` as of CLONE_ARGS_SIZE_VER2.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct CloneArgs {
    pub flags: u64,
    pub pidfd: u64,
    pub child_tid: u64,
    pub parent_tid: u64,
    pub exit_signal: u64,
    pub stack: u64,
    pub stack_size: u64,
    pub tls: u64,
    pub set_tid: u64,
    pub set_tid_size: u64,
    pub cgroup: u64,
}

/// Size of the first published `clone_args` layout.
pub const CLONE_ARGS_SIZE_VER0: usize = 64;

impl CloneArgs {
    /// fork-like: shares nothing, reports `SIGCHLD` on exit.
    pub fn fork() -> CloneArgs {
        CloneArgs {
            exit_signal: libc::SIGCHLD as u64,
            ..CloneArgs::default()
        }
    }

    pub fn flags(mut self, flags: u64) -> CloneArgs {
        self.flags |= flags;
        self
    }
}

/// Raw clone3(2). With a zero stack the child continues on a copy of the
/// caller's stack, like fork.
///
/// # Safety
/// Pointers stored in `args` must be valid for the kernel to write.
pub unsafe fn clone3(args: *const CloneArgs, size: usize) -> libc::c_long {
    libc::syscall(libc::SYS_clone3, args, size)
}

/// clone3 counterpart of [`fork_child`].
pub fn clone3_child<F>(args: &CloneArgs, f: F) -> Result<libc::pid_t, Error>
where
    F: FnOnce() -> i32,
{
    let _ = std::io::stdout().flush();
    let ret = unsafe { clone3(args, std::mem::size_of::<CloneArgs>()) };
    if ret < 0 {
        return Err(Error::Os {
            call: format!("clone3(flags={:#x})", args.flags),
            errno: Errno::last(),
        });
    }
    if ret == 0 {
        let code = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(EXIT_PANIC);
        let _ = std::io::stdout().flush();
        unsafe { libc::_exit(code) };
    }
    Ok(ret as libc::pid_t)
}
