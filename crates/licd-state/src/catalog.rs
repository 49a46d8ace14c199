//! # Tool Catalog
//!
//! Startup configuration of tool pools, read from YAML:
//!
//! ```yaml
//! tools:
//!   - tool: "Vector - DaVinci Configurator SE"
//!     total: 20
//!     commit: 5
//!     max_overage: 15
//!     commit_price: 5000
//!     overage_price_per_license: 500
//!     lease_timeout_secs: 7200   # optional
//! ```
//!
//! Validation reports every problem in the file at once, not just the
//! first.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use licd_core::ToolName;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::pool::PoolConfig;

/// One tool as written in the catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntry {
    pub tool: String,
    pub total: u32,
    pub commit: u32,
    #[serde(default)]
    pub max_overage: u32,
    #[serde(default)]
    pub commit_price: f64,
    #[serde(default)]
    pub overage_price_per_license: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_timeout_secs: Option<u64>,
}

impl CatalogEntry {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            total: self.total,
            commit: self.commit,
            max_overage: self.max_overage,
            commit_price: self.commit_price,
            overage_price_per_license: self.overage_price_per_license,
            lease_timeout: self.lease_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A parsed catalog file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCatalog {
    #[serde(default)]
    pub tools: Vec<CatalogEntry>,
}

impl ToolCatalog {
    /// Read and parse a catalog file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, CatalogError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate every entry, returning the pool configurations in file
    /// order or the full list of problems.
    pub fn validate(&self) -> Result<Vec<(ToolName, PoolConfig)>, CatalogError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        let mut pools = Vec::with_capacity(self.tools.len());

        for (index, entry) in self.tools.iter().enumerate() {
            let label = format!("tools[{index}]");
            let name = match ToolName::new(&entry.tool) {
                Ok(name) => name,
                Err(e) => {
                    problems.push(format!("{label}: {e}"));
                    continue;
                }
            };
            if !seen.insert(name.clone()) {
                problems.push(format!("{label}: duplicate tool {:?}", name.as_str()));
            }
            let config = entry.pool_config();
            let entry_problems = config.problems();
            if entry_problems.is_empty() {
                pools.push((name, config));
            } else {
                problems.extend(
                    entry_problems
                        .into_iter()
                        .map(|p| format!("{label} ({}): {p}", name.as_str())),
                );
            }
        }

        if problems.is_empty() {
            Ok(pools)
        } else {
            Err(CatalogError::Invalid { problems })
        }
    }

    /// The demonstration catalog used when no file is configured.
    pub fn demo() -> Self {
        let entry = |tool: &str, total: u32, commit: u32, max_overage: u32, prices: (f64, f64)| {
            CatalogEntry {
                tool: tool.to_string(),
                total,
                commit,
                max_overage,
                commit_price: prices.0,
                overage_price_per_license: prices.1,
                lease_timeout_secs: None,
            }
        };
        Self {
            tools: vec![
                entry("Vector - DaVinci Configurator SE", 20, 5, 15, (5000.0, 500.0)),
                entry("Vector - DaVinci Configurator IDE", 10, 10, 0, (3000.0, 0.0)),
                entry("Greenhills - Multi 8.2", 20, 5, 15, (8000.0, 800.0)),
                entry("Vector - ASAP2 v20", 20, 5, 15, (4000.0, 400.0)),
                entry("Vector - DaVinci Teams", 10, 10, 0, (2000.0, 0.0)),
                entry("Vector - VTT", 10, 10, 0, (2500.0, 0.0)),
            ],
        }
    }
}
