use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use xtask::catalog::{self, CatalogFormat, Category};
use xtask::report::{self, Summary};
use xtask::{build, RunConfig, Runner};

/// Developer tasks for the kconform corpus.
#[derive(Parser)]
#[command(name = "xtask", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List corpus programs.
    List {
        #[arg(long, value_enum)]
        category: Option<Category>,
    },
    /// Print the conformance catalog.
    Catalog {
        #[arg(long, value_enum, default_value = "table")]
        format: CatalogFormat,
    },
    /// Build the corpus programs.
    Build {
        #[arg(long)]
        release: bool,
        /// Cargo target triple.
        #[arg(long)]
        target: Option<String>,
    },
    /// Build and run programs whose names contain any PATTERN.
    Run {
        patterns: Vec<String>,
        /// Config file. Defaults to kconform.toml at the workspace root.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Per-program timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Command prefix, whitespace separated (e.g. "ssh dut --").
        #[arg(long)]
        runner: Option<String>,
        /// Print a KTAP document instead of cargo-test style lines.
        #[arg(long)]
        ktap: bool,
        /// Also write a JSON report here.
        #[arg(long)]
        json: Option<PathBuf>,
        /// Use already-built binaries.
        #[arg(long)]
        no_build: bool,
        #[arg(long)]
        release: bool,
        #[arg(long)]
        target: Option<String>,
    },
}

fn main() -> Result<()> {
    libkconform::logger::init();
    match Cli::parse().cmd {
        Cmd::List { category } => list(category),
        Cmd::Catalog { format } => {
            print!("{}", catalog::render(format)?);
            Ok(())
        }
        Cmd::Build { release, target } => build::build_programs(release, target.as_deref()).map(drop),
        Cmd::Run {
            patterns,
            config,
            timeout,
            runner,
            ktap,
            json,
            no_build,
            release,
            target,
        } => {
            let root = build::find_workspace_root()?;
            let mut cfg = RunConfig::load(config.as_deref(), &root)?;
            if let Some(secs) = timeout {
                cfg.timeout_secs = secs;
            }
            if let Some(prefix) = runner {
                cfg.runner = prefix.split_whitespace().map(str::to_string).collect();
            }
            if let Some(triple) = target.as_deref() {
                cfg.apply_target(triple)?;
            }
            if cfg.log_dir.is_relative() {
                cfg.log_dir = root.join(&cfg.log_dir);
            }
            let bin_dir = match cfg.bin_dir.clone() {
                Some(dir) => dir,
                None if no_build => build::bin_dir(&root, release, target.as_deref()),
                None => build::build_programs(release, target.as_deref())?,
            };
            run(Runner::new(cfg, bin_dir), &patterns, ktap, json)
        }
    }
}

fn list(category: Option<Category>) -> Result<()> {
    let defs = match category {
        Some(c) => catalog::by_category(c),
        None => catalog::CATALOG.iter().collect(),
    };
    for def in defs {
        println!("{:<20} {}", def.name, def.category.label());
    }
    Ok(())
}

fn run(runner: Runner, patterns: &[String], ktap: bool, json: Option<PathBuf>) -> Result<()> {
    let defs = catalog::filter(patterns);
    if defs.is_empty() {
        bail!("No programs match {:?}", patterns);
    }

    let start = Instant::now();
    if !ktap {
        println!("\nrunning {} programs", defs.len());
    }
    let results = runner.run_all(&defs, |r| {
        if !ktap {
            println!("{}", report::human_line(r));
        }
    })?;

    if ktap {
        print!("{}", report::ktap(&results));
    } else {
        print!("{}", report::human_summary(&results, start.elapsed()));
        println!("logs: {}", runner.config.log_dir.display());
    }
    if let Some(path) = json {
        report::write_json(&path, &results)?;
        log::info!("wrote {}", path.display());
    }

    let summary = Summary::of(&results);
    if !summary.ok() {
        bail!("{} failed, {} timed out", summary.failed, summary.timed_out);
    }
    Ok(())
}
