//! kconform xtask - catalog and host-side runner for the regression corpus
//!
//! Builds the programs in `userspace/tests`, runs them directly or through
//! a command prefix (ssh, a QEMU user-mode wrapper), watches each one's
//! output for its result marker and reports in cargo-test, KTAP or JSON
//! form. Also renders the conformance catalog.

pub mod build;
pub mod catalog;
pub mod config;
pub mod monitor;
pub mod report;
pub mod run;

pub use build::{build_programs, find_workspace_root};
pub use catalog::{Category, ProgramDef, CATALOG};
pub use config::{Arch, RunConfig};
pub use monitor::{classify, ProgramExit, ProgramMonitor, Verdict};
pub use report::{ProgramResult, Summary};
pub use run::Runner;
