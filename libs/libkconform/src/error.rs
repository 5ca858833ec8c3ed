//! Unified error type for fixture and helper code.
//!
//! Assertions never produce an `Error`; they are recorded by the harness.
//! `Error` is for the steps that must succeed before anything can be
//! asserted (creating the socket, mapping the page, forking the child).

use crate::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A syscall failed with the given errno.
    #[error("{call} failed: {errno}")]
    Os { call: String, errno: Errno },

    /// A call succeeded but its result did not satisfy the predicate.
    #[error("{expr} returned {ret}, which does not satisfy the check")]
    Check { expr: String, ret: i64 },

    /// The kernel under test does not provide the facility at all.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Convert a libc-style return value (-1 + errno) to `Result`.
    ///
    /// Must be called before anything else can clobber errno.
    #[inline]
    pub fn from_ret(call: &str, ret: i64) -> Result<i64, Error> {
        if ret < 0 {
            Err(Error::Os {
                call: call.to_string(),
                errno: Errno::last(),
            })
        } else {
            Ok(ret)
        }
    }

    /// The errno carried by an `Os` error.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// True when the failure means "this kernel does not have the feature".
    pub fn is_unsupported(&self) -> bool {
        match self {
            Error::Unsupported(_) => true,
            Error::Os { errno, .. } => matches!(
                *errno,
                Errno::ENOSYS | Errno::EAFNOSUPPORT | Errno::EPROTONOSUPPORT | Errno::ENODEV
            ),
            Error::Check { .. } => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(raw) => Error::Os {
                call: "io".to_string(),
                errno: Errno(raw),
            },
            None => Error::Unsupported(e.to_string()),
        }
    }
}
