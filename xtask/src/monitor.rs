use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::catalog::Markers;

pub use libkconform::harness::EXIT_SKIP;

/// Panic patterns detected in program output.
const PANIC_PATTERNS: &[&str] = &["panicked at", "PANIC:"];

/// How a program process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramExit {
    Code(i32),
    Signal(i32),
}

impl ProgramExit {
    pub fn from_status(status: ExitStatus) -> Option<ProgramExit> {
        status
            .code()
            .map(ProgramExit::Code)
            .or_else(|| status.signal().map(ProgramExit::Signal))
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ProgramExit::Code(code) => Some(code),
            ProgramExit::Signal(_) => None,
        }
    }
}

/// Verdict for one program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
    Skip(String),
    Timeout,
}

impl Verdict {
    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Fail(_) | Verdict::Timeout)
    }
}

/// Result returned by `ProgramMonitor::monitor()`.
#[derive(Debug)]
pub struct MonitorResult {
    pub verdict: Verdict,
    pub exit: Option<ProgramExit>,
    pub output: String,
    pub duration: Duration,
}

/// Watches a program's log file for its result marker.
///
/// The program is spawned by the caller with stdout and stderr redirected
/// into `log_file`. The monitor returns once the program has exited, or
/// has printed a marker and then exited (or failed to within
/// `exit_grace`), or the timeout elapsed. A program still running when the
/// monitor returns is killed and reaped.
pub struct ProgramMonitor {
    pub log_file: PathBuf,
    pub markers: Markers,
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// How long to wait for exit after a marker shows up.
    pub exit_grace: Duration,
}

impl ProgramMonitor {
    pub fn new(log_file: PathBuf, markers: Markers, timeout: Duration) -> Self {
        Self {
            log_file,
            markers,
            timeout,
            poll_interval: Duration::from_millis(100),
            exit_grace: Duration::from_secs(2),
        }
    }

    pub fn monitor(&self, child: &mut Child) -> Result<MonitorResult> {
        let start = Instant::now();
        let mut marker_seen: Option<Instant> = None;

        loop {
            if let Some(status) = child.try_wait().context("Failed to poll program")? {
                let output = self.read_output();
                let exit = ProgramExit::from_status(status);
                return Ok(MonitorResult {
                    verdict: classify(&output, exit, &self.markers),
                    exit,
                    output,
                    duration: start.elapsed(),
                });
            }

            if marker_seen.is_none() && self.markers.any_in(&self.read_output()) {
                marker_seen = Some(Instant::now());
            }
            if let Some(seen) = marker_seen {
                if seen.elapsed() >= self.exit_grace {
                    // Marker printed but the process hangs on exit.
                    log::warn!("{}: marker printed but process did not exit", self.log_file.display());
                    reap(child)?;
                    let output = self.read_output();
                    return Ok(MonitorResult {
                        verdict: classify(&output, None, &self.markers),
                        exit: None,
                        output,
                        duration: start.elapsed(),
                    });
                }
            }

            if start.elapsed() >= self.timeout {
                reap(child)?;
                return Ok(MonitorResult {
                    verdict: Verdict::Timeout,
                    exit: None,
                    output: self.read_output(),
                    duration: start.elapsed(),
                });
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn read_output(&self) -> String {
        fs::read(&self.log_file)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

fn reap(child: &mut Child) -> Result<()> {
    // kill() fails if the child already exited; wait() still reaps it.
    let _ = child.kill();
    child.wait().context("Failed to reap program")?;
    Ok(())
}

/// Decide the verdict from a finished program's output and exit.
///
/// `exit` is `None` when the program printed a marker but had to be
/// killed; the marker alone then decides.
pub fn classify(output: &str, exit: Option<ProgramExit>, markers: &Markers) -> Verdict {
    if let Some(ProgramExit::Signal(sig)) = exit {
        return Verdict::Fail(format!("killed by signal {}", sig));
    }
    if output.contains(&markers.failed) {
        return Verdict::Fail(format!("{} printed", markers.failed));
    }
    if let Some(line) = output.lines().find(|l| PANIC_PATTERNS.iter().any(|p| l.contains(p))) {
        return Verdict::Fail(format!("panic: {}", line.trim()));
    }
    let code = exit.and_then(ProgramExit::code);
    if output.contains(&markers.skipped) || code == Some(EXIT_SKIP) {
        return Verdict::Skip(skip_reason(output));
    }
    match (output.contains(&markers.passed), code) {
        (true, Some(0) | None) => Verdict::Pass,
        (true, Some(code)) => Verdict::Fail(format!("{} printed but exit code {}", markers.passed, code)),
        (false, Some(0)) => Verdict::Fail("exited 0 without a result marker".to_string()),
        (false, Some(code)) => Verdict::Fail(format!("exit code {}", code)),
        (false, None) => Verdict::Fail("no result marker".to_string()),
    }
}

/// Last `SKIP:` line of the output, without the prefix.
fn skip_reason(output: &str) -> String {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("SKIP:"))
        .last()
        .map(|r| r.trim().to_string())
        .unwrap_or_else(|| "skipped".to_string())
}

/// Assertion failures reported by the harness, one per `FAIL:` line.
pub fn failed_checks(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("FAIL:"))
        .map(|l| l.trim().to_string())
        .collect()
}
