//! kconform userspace support library
//!
//! Every regression program in the corpus is a single file with its own
//! `main()`. This crate holds the handful of things they would otherwise
//! copy between each other:
//!
//! - [`errno`]: Linux errno values with names, so expectations read like
//!   the man pages (`Errno::ENOTCONN`).
//! - [`harness`]: the setup/test/check recorder that prints `PASS:`/`FAIL:`
//!   lines and the final `<NAME>_TEST_PASSED` marker the runner looks for.
//! - [`process`], [`signal`], [`net`], [`mem`]: fork/wait, sigaction,
//!   sockaddr and fault-probe plumbing over `libc`.
//! - [`logger`]: a stderr backend for the `log` facade.
//!
//! # Usage
//!
//! ```rust,ignore
//! use libkconform::{harness::Suite, test_errno, Errno};
//!
//! fn main() {
//!     let mut suite = Suite::new("dup");
//!     suite.test("bad_fd", |t| {
//!         test_errno!(t, unsafe { libc::dup(999) }, Errno::EBADF);
//!     });
//!     suite.finish();
//! }
//! ```

pub use errno::Errno;
pub use error::Error;

pub mod errno;
pub mod error;
pub mod harness;
pub mod logger;
pub mod mem;
pub mod net;
pub mod process;
pub mod signal;

/// Scratch directory for files the programs create.
///
/// Honours `KCONFORM_TMPDIR`, falling back to `/tmp`.
pub fn scratch_dir() -> std::path::PathBuf {
    std::env::var_os("KCONFORM_TMPDIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"))
}
