//! # Validate Subcommand
//!
//! Parses a YAML tool catalog and reports every problem in it, using the
//! same rules the server applies at startup.
//!
//! ```bash
//! licd validate tools.yaml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use licd_state::{CatalogError, ToolCatalog};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the catalog file.
    pub file: PathBuf,
}

/// One valid catalog line, for the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
    pub tool: String,
    pub total: u32,
    pub commit: u32,
    pub max_overage: u32,
    pub lease_timeout_secs: Option<u64>,
}

/// Outcome of validating a catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogReport {
    Valid(Vec<ToolSummary>),
    Invalid(Vec<String>),
}

/// Validate the catalog at `args.file`. Exit code 0 when valid, 1 when
/// the file parses but has problems. Unreadable or unparsable files are
/// errors.
pub fn run_validate(args: &ValidateArgs) -> Result<u8> {
    let report = check_catalog(&args.file)?;
    match &report {
        CatalogReport::Valid(tools) => {
            println!("{}: OK ({} tools)", args.file.display(), tools.len());
            for t in tools {
                let timeout = t
                    .lease_timeout_secs
                    .map(|s| format!("{s}s"))
                    .unwrap_or_else(|| "default".to_string());
                println!(
                    "  {:<40} total={:<4} commit={:<4} max_overage={:<4} timeout={}",
                    t.tool, t.total, t.commit, t.max_overage, timeout
                );
            }
            Ok(0)
        }
        CatalogReport::Invalid(problems) => {
            println!("{}: {} problem(s)", args.file.display(), problems.len());
            for p in problems {
                println!("  - {p}");
            }
            Ok(1)
        }
    }
}

pub fn check_catalog(path: &std::path::Path) -> Result<CatalogReport> {
    let catalog = ToolCatalog::load(path)?;
    tracing::debug!(path = %path.display(), entries = catalog.tools.len(), "catalog parsed");
    match catalog.validate() {
        Ok(pools) => Ok(CatalogReport::Valid(
            pools
                .into_iter()
                .map(|(tool, config)| ToolSummary {
                    tool: tool.to_string(),
                    total: config.total,
                    commit: config.commit,
                    max_overage: config.max_overage,
                    lease_timeout_secs: config.lease_timeout.map(|t| t.as_secs()),
                })
                .collect(),
        )),
        Err(CatalogError::Invalid { problems }) => Ok(CatalogReport::Invalid(problems)),
        Err(e) => Err(e.into()),
    }
}
