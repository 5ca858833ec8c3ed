//! `kconform.toml` run configuration.
//!
//! Every field has a default, so an empty or missing file is valid. CLI
//! flags are applied on top by `main`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "kconform.toml";

/// Target architecture of the machine the programs run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Arch {
    X86_64,
    Arm64,
}

impl Arch {
    pub fn host() -> Arch {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else {
            Arch::X86_64
        }
    }

    /// Architecture of a cargo target triple such as
    /// `aarch64-unknown-linux-musl`.
    pub fn from_triple(triple: &str) -> Result<Arch> {
        let first = triple.split('-').next().unwrap_or_default();
        first
            .parse::<Arch>()
            .with_context(|| format!("Unsupported target triple '{}'", triple))
    }

    pub fn label(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => anyhow::bail!("unknown arch '{}' (expected x86_64 or arm64)", other),
        }
    }
}

impl TryFrom<String> for Arch {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Directory holding the program binaries. Defaults to the cargo
    /// output directory of `xtask build`.
    pub bin_dir: Option<PathBuf>,
    /// Per-program stdout/stderr logs.
    pub log_dir: PathBuf,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Command prefix, e.g. `["ssh", "dut", "--"]`.
    pub runner: Vec<String>,
    /// Extra environment for every program.
    pub env: BTreeMap<String, String>,
    /// Program names never run; reported as skipped.
    pub skip: Vec<String>,
    /// Architecture of the target. Defaults to the host.
    pub arch: Option<Arch>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            bin_dir: None,
            log_dir: PathBuf::from("target/kconform-logs"),
            timeout_secs: 60,
            poll_interval_ms: 100,
            runner: Vec::new(),
            env: BTreeMap::new(),
            skip: Vec::new(),
            arch: None,
        }
    }
}

impl RunConfig {
    /// Load `path`, or `kconform.toml` in `root` if it exists, or defaults.
    pub fn load(path: Option<&Path>, root: &Path) -> Result<RunConfig> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = root.join(DEFAULT_CONFIG);
                if !default.exists() {
                    log::debug!("no {} in {}, using defaults", DEFAULT_CONFIG, root.display());
                    return Ok(RunConfig::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        RunConfig::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<RunConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn arch(&self) -> Arch {
        self.arch.unwrap_or_else(Arch::host)
    }

    /// Programs were built for `triple`; the target arch follows it.
    pub fn apply_target(&mut self, triple: &str) -> Result<()> {
        let arch = Arch::from_triple(triple)?;
        if let Some(configured) = self.arch.filter(|a| *a != arch) {
            log::warn!("arch = {} in config, but --target {} is {}", configured, triple, arch);
        }
        self.arch = Some(arch);
        Ok(())
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip.iter().any(|s| s == name)
    }
}
