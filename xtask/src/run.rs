//! Running corpus programs one at a time.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::catalog::{ArchReq, ProgramDef};
use crate::config::{Arch, RunConfig};
use crate::monitor::{failed_checks, ProgramExit, ProgramMonitor, Verdict};
use crate::report::ProgramResult;

pub struct Runner {
    pub config: RunConfig,
    pub bin_dir: PathBuf,
}

impl Runner {
    pub fn new(config: RunConfig, bin_dir: PathBuf) -> Runner {
        Runner { config, bin_dir }
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.config.log_dir.join(format!("{}.log", name))
    }

    /// Command line for one program, with the configured prefix and
    /// environment. Output is redirected by `run`.
    pub fn command_for(&self, name: &str) -> Command {
        let binary = self.bin_dir.join(name);
        let mut cmd = match self.config.runner.split_first() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args).arg(&binary);
                cmd
            }
            None => Command::new(&binary),
        };
        cmd.envs(&self.config.env).stdin(Stdio::null());
        cmd
    }

    /// Reason to not run `def` at all, if any.
    fn skip_reason(&self, def: &ProgramDef) -> Option<String> {
        if self.config.is_skipped(def.name) {
            return Some("skipped by config".to_string());
        }
        match (def.arch, self.config.arch()) {
            (ArchReq::X86_64, arch) if arch != Arch::X86_64 => Some(format!("requires x86_64, target is {}", arch)),
            _ => None,
        }
    }

    pub fn run(&self, def: &ProgramDef) -> Result<ProgramResult> {
        if let Some(reason) = self.skip_reason(def) {
            return Ok(ProgramResult::new(def.name, Verdict::Skip(reason), Duration::ZERO));
        }
        if self.config.runner.is_empty() && !self.bin_dir.join(def.name).exists() {
            anyhow::bail!("{} not found in {} (run `cargo xtask build`)", def.name, self.bin_dir.display());
        }
        let command = self.command_for(def.name);
        let monitor = ProgramMonitor::new(self.log_file(def.name), def.markers(), self.config.timeout());
        self.run_command(def.name, command, monitor)
    }

    /// Spawn `command` with its output in the monitor's log file and wait
    /// for a verdict.
    pub fn run_command(&self, name: &str, mut command: Command, mut monitor: ProgramMonitor) -> Result<ProgramResult> {
        monitor.poll_interval = self.config.poll_interval();
        let log = create_log(&monitor.log_file)?;
        let err = log.try_clone().context("Failed to duplicate log handle")?;
        command.stdout(log).stderr(err);

        log::debug!("{}: {:?}", name, command);
        let mut child = command.spawn().with_context(|| format!("Failed to spawn {}", name))?;
        // Drop our copies of the log handles; the child holds its own.
        drop(command);
        let outcome = monitor.monitor(&mut child)?;

        let mut result = ProgramResult::new(name, outcome.verdict, outcome.duration);
        result.exit_code = outcome.exit.and_then(ProgramExit::code);
        result.failed_checks = failed_checks(&outcome.output);
        Ok(result)
    }

    /// Run each program in order, handing every result to `on_result` as
    /// soon as it is known.
    pub fn run_all(
        &self,
        defs: &[&ProgramDef],
        mut on_result: impl FnMut(&ProgramResult),
    ) -> Result<Vec<ProgramResult>> {
        let mut results = Vec::with_capacity(defs.len());
        for def in defs {
            let result = self.run(def)?;
            on_result(&result);
            results.push(result);
        }
        Ok(results)
    }
}

fn create_log(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}
