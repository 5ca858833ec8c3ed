//! Setup/test/check recorder shared by every regression program.
//!
//! A program is a [`Suite`]: a sequence of fixtures ([`Suite::setup`]) and
//! test cases ([`Suite::test`]). Fixtures must succeed; a failed fixture
//! aborts the program. Inside a test case each assertion is recorded on the
//! [`Case`] and printed as it happens:
//!
//! ```text
//! Test: getpeername
//!   PASS: getpeername(sk_unbound, ...) -> ENOTCONN
//!   FAIL: getpeername(sk_bound, ...) (succeeded with 0, expected ENOTCONN)
//! ```
//!
//! [`Suite::finish`] prints the tally and exactly one marker line, which is
//! what the host runner matches on:
//!
//! ```text
//! # tcp_err_test: 41 passed, 1 failed, 0 skipped
//! TCP_ERR_TEST_FAILED
//! ```

use std::fmt;
use std::process;

use crate::errno::Errno;
use crate::error::Error;

/// Exit code for "facility not present", as used by automake and friends.
pub const EXIT_SKIP: i32 = 77;

/// Final outcome of a program, as spelled in its marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Passed => "PASSED",
            Outcome::Failed => "FAILED",
            Outcome::Skipped => "SKIPPED",
        }
    }
}

/// Marker line for `program` with the given outcome, e.g. `MMAP_TEST_PASSED`.
pub fn marker(program: &str, outcome: Outcome) -> String {
    format!("{}_{}", program.to_ascii_uppercase(), outcome.label())
}

/// Assertion counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// One regression program.
pub struct Suite {
    name: &'static str,
    tally: Tally,
}

impl Suite {
    /// Start a program. `name` is the binary name, e.g. `"tcp_err_test"`.
    pub fn new(name: &'static str) -> Suite {
        crate::logger::init();
        println!("=== {} ===", name);
        log::info!("pid {}", process::id());
        Suite {
            name,
            tally: Tally::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Run a fixture. An unsupported facility skips the whole program as
    /// long as nothing has been asserted yet; any other error, or an
    /// unsupported one after the first assertion, fails it.
    pub fn setup<T>(&mut self, name: &str, f: impl FnOnce() -> Result<T, Error>) -> T {
        println!("\nSetup: {}", name);
        match f() {
            Ok(value) => value,
            Err(e) => match setup_outcome(self.tally, &e) {
                Outcome::Skipped => self.skip_all(&format!("{}: {}", name, e)),
                _ => {
                    println!("  FAIL: setup {}: {}", name, e);
                    self.tally.failed += 1;
                    self.abort()
                }
            },
        }
    }

    /// Run one test case.
    pub fn test(&mut self, name: &str, f: impl FnOnce(&mut Case)) {
        println!("\nTest: {}", name);
        let mut case = Case::new(name);
        f(&mut case);
        log::debug!(
            "{}: {} passed, {} failed, {} skipped",
            name,
            case.tally.passed,
            case.tally.failed,
            case.tally.skipped
        );
        self.tally.merge(case.tally);
    }

    /// Print the tally and marker, then exit 0 on success or 1 on failure.
    pub fn finish(self) -> ! {
        let outcome = self.outcome();
        println!(
            "\n# {}: {} passed, {} failed, {} skipped",
            self.name, self.tally.passed, self.tally.failed, self.tally.skipped
        );
        println!("{}", marker(self.name, outcome));
        process::exit(match outcome {
            Outcome::Failed => 1,
            _ => 0,
        })
    }

    /// The facility under test is absent: report SKIPPED and exit 77.
    /// Failures already recorded still fail the program.
    pub fn skip_all(&self, reason: &str) -> ! {
        println!("  SKIP: {}", reason);
        if self.tally.failed > 0 {
            self.abort()
        }
        println!("{}", marker(self.name, Outcome::Skipped));
        process::exit(EXIT_SKIP)
    }

    fn outcome(&self) -> Outcome {
        if self.tally.failed > 0 {
            Outcome::Failed
        } else {
            Outcome::Passed
        }
    }

    fn abort(&self) -> ! {
        println!("{}", marker(self.name, Outcome::Failed));
        process::exit(1)
    }
}

/// Outcome of a program whose fixture failed with `err` after `tally`.
fn setup_outcome(tally: Tally, err: &Error) -> Outcome {
    if err.is_unsupported() && tally.passed == 0 && tally.failed == 0 {
        Outcome::Skipped
    } else {
        Outcome::Failed
    }
}

/// Assertion recorder for one test case.
pub struct Case<'a> {
    name: &'a str,
    tally: Tally,
}

impl<'a> Case<'a> {
    pub fn new(name: &'a str) -> Case<'a> {
        Case {
            name,
            tally: Tally::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn has_failed(&self) -> bool {
        self.tally.failed > 0
    }

    pub fn pass(&mut self, what: &str) {
        self.tally.passed += 1;
        println!("  PASS: {}", what);
    }

    pub fn fail(&mut self, what: &str, detail: impl fmt::Display) {
        self.tally.failed += 1;
        println!("  FAIL: {} ({})", what, detail);
    }

    pub fn skip(&mut self, reason: &str) {
        self.tally.skipped += 1;
        println!("  SKIP: {}: {}", self.name, reason);
    }

    /// Record a plain boolean check.
    pub fn expect(&mut self, what: &str, cond: bool) -> bool {
        if cond {
            self.pass(what);
        } else {
            self.fail(what, "condition is false");
        }
        cond
    }

    /// Passes iff the call succeeded.
    pub fn succ(&mut self, expr: &str, ret: i64, errno: Errno) -> i64 {
        if ret >= 0 {
            self.pass(expr);
        } else {
            self.fail(expr, format_args!("returned {}, errno {:?}", ret, errno));
        }
        ret
    }

    /// Passes iff the call failed with exactly `expected`.
    pub fn errno(&mut self, expr: &str, ret: i64, errno: Errno, expected: Errno) -> i64 {
        if ret >= 0 {
            self.fail(expr, format_args!("succeeded with {}, expected {:?}", ret, expected));
        } else if errno != expected {
            self.fail(expr, format_args!("errno {:?}, expected {:?}", errno, expected));
        } else {
            self.pass(&format!("{} -> {:?}", expr, expected));
        }
        ret
    }

    /// Passes iff the call succeeded and `cond` holds.
    pub fn res(&mut self, expr: &str, ret: i64, errno: Errno, cond: bool) -> i64 {
        if ret < 0 {
            self.fail(expr, format_args!("returned {}, errno {:?}", ret, errno));
        } else if !cond {
            self.fail(expr, format_args!("returned {}, result check failed", ret));
        } else {
            self.pass(expr);
        }
        ret
    }
}

/// Assert that a call succeeds. Evaluates to the return value.
#[macro_export]
macro_rules! test_succ {
    ($case:expr, $call:expr) => {{
        let ret = ($call) as i64;
        let errno = $crate::Errno::last();
        $case.succ(stringify!($call), ret, errno)
    }};
}

/// Assert that a call fails with the given errno.
#[macro_export]
macro_rules! test_errno {
    ($case:expr, $call:expr, $expected:expr) => {{
        $crate::Errno::clear();
        let ret = ($call) as i64;
        let errno = $crate::Errno::last();
        $case.errno(stringify!($call), ret, errno, $expected)
    }};
}

/// Assert that a call succeeds and its result satisfies a predicate.
///
/// `test_res!(t, getsockname(fd, p, &mut len), |ret| len == 16)`
#[macro_export]
macro_rules! test_res {
    ($case:expr, $call:expr, |$ret:ident| $cond:expr) => {{
        #[allow(unused_variables)]
        let $ret = ($call) as i64;
        let errno = $crate::Errno::last();
        let ok = $ret >= 0 && { $cond };
        $case.res(stringify!($call), $ret, errno, ok)
    }};
}

/// Fixture-side check: the call must succeed. Evaluates to
/// `Result<i64, Error>`.
#[macro_export]
macro_rules! check {
    ($call:expr) => {{
        let ret = ($call) as i64;
        $crate::Error::from_ret(stringify!($call), ret)
    }};
}

/// Fixture-side check with a custom predicate over the return value (and
/// optionally errno, for calls that are expected to "fail" such as a
/// non-blocking connect).
#[macro_export]
macro_rules! check_with {
    ($call:expr, |$ret:ident| $cond:expr) => {{
        let $ret = ($call) as i64;
        let errno = $crate::Errno::last();
        if $cond {
            Ok($ret)
        } else if $ret < 0 {
            Err($crate::Error::Os {
                call: stringify!($call).to_string(),
                errno,
            })
        } else {
            Err($crate::Error::Check {
                expr: stringify!($call).to_string(),
                ret: $ret,
            })
        }
    }};
    ($call:expr, |$ret:ident, $errno:ident| $cond:expr) => {{
        $crate::Errno::clear();
        let $ret = ($call) as i64;
        let $errno = $crate::Errno::last();
        if $cond {
            Ok($ret)
        } else {
            Err($crate::Error::Os {
                call: stringify!($call).to_string(),
                errno: $errno,
            })
        }
    }};
}
