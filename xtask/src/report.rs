//! Result reporting: cargo-test style lines, KTAP v1, and a JSON file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

use crate::monitor::Verdict;

#[derive(Debug, Clone, Serialize)]
pub struct ProgramResult {
    pub name: String,
    #[serde(serialize_with = "verdict_label")]
    pub verdict: Verdict,
    /// Reason for a failure or skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(serialize_with = "seconds")]
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub failed_checks: Vec<String>,
}

impl ProgramResult {
    pub fn new(name: &str, verdict: Verdict, duration: Duration) -> ProgramResult {
        let reason = match &verdict {
            Verdict::Fail(r) | Verdict::Skip(r) => Some(r.clone()),
            Verdict::Timeout => Some(format!("timed out after {:.1}s", duration.as_secs_f64())),
            Verdict::Pass => None,
        };
        ProgramResult {
            name: name.to_string(),
            verdict,
            reason,
            duration,
            exit_code: None,
            failed_checks: Vec::new(),
        }
    }
}

fn verdict_label<S: Serializer>(verdict: &Verdict, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match verdict {
        Verdict::Pass => "pass",
        Verdict::Fail(_) => "fail",
        Verdict::Skip(_) => "skip",
        Verdict::Timeout => "timeout",
    })
}

fn seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
}

impl Summary {
    pub fn of(results: &[ProgramResult]) -> Summary {
        let mut s = Summary::default();
        for r in results {
            match r.verdict {
                Verdict::Pass => s.passed += 1,
                Verdict::Fail(_) => s.failed += 1,
                Verdict::Skip(_) => s.skipped += 1,
                Verdict::Timeout => s.timed_out += 1,
            }
        }
        s
    }

    pub fn ok(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

/// `test mmap_test ... ok`
pub fn human_line(r: &ProgramResult) -> String {
    let status = match &r.verdict {
        Verdict::Pass => "ok".to_string(),
        Verdict::Fail(_) => "FAILED".to_string(),
        Verdict::Skip(reason) => format!("ignored, {}", reason),
        Verdict::Timeout => "TIMEOUT".to_string(),
    };
    format!("test {} ... {}", r.name, status)
}

/// Failure details and the closing `test result:` line.
pub fn human_summary(results: &[ProgramResult], elapsed: Duration) -> String {
    let failures: Vec<&ProgramResult> = results.iter().filter(|r| r.verdict.is_failure()).collect();
    let mut out = String::new();
    if !failures.is_empty() {
        out.push_str("\nfailures:\n");
        for r in &failures {
            out.push_str(&format!("\n---- {} ----\n", r.name));
            if let Some(reason) = &r.reason {
                out.push_str(&format!("{}\n", reason));
            }
            for check in &r.failed_checks {
                out.push_str(&format!("  FAIL: {}\n", check));
            }
        }
        out.push_str("\nfailures:\n");
        for r in &failures {
            out.push_str(&format!("    {}\n", r.name));
        }
    }
    let s = Summary::of(results);
    out.push_str(&format!(
        "\ntest result: {}. {} passed; {} failed; {} ignored; {} timed out; finished in {:.2}s\n",
        if s.ok() { "ok" } else { "FAILED" },
        s.passed,
        s.failed,
        s.skipped,
        s.timed_out,
        elapsed.as_secs_f64()
    ));
    out
}

/// Whole-run KTAP v1 document.
pub fn ktap(results: &[ProgramResult]) -> String {
    let mut out = format!("KTAP version 1\n1..{}\n", results.len());
    for (i, r) in results.iter().enumerate() {
        let n = i + 1;
        match &r.verdict {
            Verdict::Pass => out.push_str(&format!("ok {} {}\n", n, r.name)),
            Verdict::Skip(reason) => out.push_str(&format!("ok {} {} # SKIP {}\n", n, r.name, reason)),
            Verdict::Fail(_) | Verdict::Timeout => {
                for check in &r.failed_checks {
                    out.push_str(&format!("# {}: {}\n", r.name, check));
                }
                let reason = r.reason.as_deref().unwrap_or("failed");
                out.push_str(&format!("not ok {} {} # FAIL {}\n", n, r.name, reason));
            }
        }
    }
    let s = Summary::of(results);
    out.push_str(&format!(
        "# {} passed, {} failed, {} skipped\n",
        s.passed,
        s.failed + s.timed_out,
        s.skipped
    ));
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: Summary,
    results: &'a [ProgramResult],
}

pub fn write_json(path: &Path, results: &[ProgramResult]) -> Result<()> {
    let report = JsonReport {
        summary: Summary::of(results),
        results,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
