//! Building the corpus binaries

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

pub const PROGRAMS_PACKAGE: &str = "kconform_tests";

/// Build every program in `userspace/tests`.
/// Returns the directory holding the binaries.
pub fn build_programs(release: bool, target: Option<&str>) -> Result<PathBuf> {
    let workspace_root = find_workspace_root()?;

    println!("Building {} ({})", PROGRAMS_PACKAGE, target.unwrap_or("host"));

    let mut cmd = Command::new(std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()));
    cmd.current_dir(&workspace_root).args(["build", "-p", PROGRAMS_PACKAGE, "--bins"]);
    if release {
        cmd.arg("--release");
    }
    if let Some(target) = target {
        cmd.args(["--target", target]);
    }
    log::debug!("{:?}", cmd);

    let status = cmd.status().context("Failed to execute cargo build")?;
    if !status.success() {
        anyhow::bail!("Build of {} failed ({})", PROGRAMS_PACKAGE, status);
    }

    let bin_dir = bin_dir(&workspace_root, release, target);
    if !bin_dir.is_dir() {
        anyhow::bail!("Binary directory not found at: {}", bin_dir.display());
    }
    println!("Programs built: {}", bin_dir.display());
    Ok(bin_dir)
}

/// Where cargo puts the binaries for this profile and target.
pub fn bin_dir(workspace_root: &std::path::Path, release: bool, target: Option<&str>) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    let mut dir = workspace_root.join("target");
    if let Some(target) = target {
        dir.push(target);
    }
    dir.join(profile)
}

/// Find the workspace root by looking for Cargo.toml with [workspace]
pub fn find_workspace_root() -> Result<PathBuf> {
    let mut current = std::env::current_dir().context("Failed to get current directory")?;

    loop {
        let cargo_toml = current.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).context("Failed to read Cargo.toml")?;
            if content.contains("[workspace]") {
                return Ok(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => anyhow::bail!("Could not find workspace root"),
        }
    }
}
