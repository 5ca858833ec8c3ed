//! Page size and fault probes.

use std::ptr;

use crate::error::Error;
use crate::process::{run_in_child, WaitStatus};

/// What a probe does to the target byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Exit code of a probe child whose access did not fault.
pub const EXIT_NO_FAULT: i32 = 0;

pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Touch `addr` in a forked child and report how the child ended.
///
/// The child's address space is a copy of ours, so the caller's mappings
/// are left as they were whatever happens.
pub fn probe(addr: *mut u8, access: Access) -> Result<WaitStatus, Error> {
    let addr = addr as usize;
    run_in_child(move || {
        let p = addr as *mut u8;
        unsafe {
            match access {
                Access::Read => {
                    let _ = ptr::read_volatile(p);
                }
                Access::Write => ptr::write_volatile(p, 0xff),
            }
        }
        EXIT_NO_FAULT
    })
}

/// True if the status is death by SIGSEGV or SIGBUS.
pub fn is_fault(status: WaitStatus) -> bool {
    status.killed_by(libc::SIGSEGV) || status.killed_by(libc::SIGBUS)
}
