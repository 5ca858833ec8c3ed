//! stderr backend for the `log` facade.
//!
//! Test output proper (banner, `PASS:`/`FAIL:` lines, markers) goes to
//! stdout through `println!`. Diagnostics go through `log` to stderr so the
//! runner's marker matching never sees them. The level comes from
//! `KCONFORM_LOG` (`error`..`trace`, or `off`) and defaults to `warn`.

use std::io::Write;
use std::sync::Once;

use log::{LevelFilter, Log, Metadata, Record};

pub const LOG_ENV: &str = "KCONFORM_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;
static INIT: Once = Once::new();

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        // Include the pid: forked children log too.
        let _ = writeln!(
            err,
            "[{:>5}] {}[{}]: {}",
            record.level(),
            record.target(),
            std::process::id(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}

/// Install the logger. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let level = std::env::var(LOG_ENV)
            .ok()
            .and_then(|v| parse_level(&v))
            .unwrap_or(LevelFilter::Warn);
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level);
        }
    });
}
