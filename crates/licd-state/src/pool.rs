//! # Tool License Pools
//!
//! Configuration and counter snapshot of one tool's licenses.
//!
//! ## Capacity model
//!
//! ```text
//!  0 ........ commit ........ total ........ total + max_overage
//!  |  commit  |     plain      |     overage      |
//! ```
//!
//! A borrow taken while fewer than `commit` licenses are out is a *commit*
//! borrow, one taken below `total` is *plain*, anything beyond `total` is
//! *overage* and bounded by `max_overage`.

use std::time::Duration;

use licd_core::{Timestamp, ToolName};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Which slice of a pool's capacity a reservation consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityClass {
    /// Within the guaranteed commit sub-pool.
    Commit,
    /// Above commit, within nominal total.
    Plain,
    /// Beyond nominal total, within the overage allowance.
    Overage,
}

impl CapacityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Plain => "plain",
            Self::Overage => "overage",
        }
    }
}

impl std::fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapacityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "plain" => Ok(Self::Plain),
            "overage" => Ok(Self::Overage),
            other => Err(format!("unknown capacity class {other:?}")),
        }
    }
}

/// Configured limits and prices of a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub total: u32,
    pub commit: u32,
    pub max_overage: u32,
    pub commit_price: f64,
    pub overage_price_per_license: f64,
    /// Per-tool lease timeout. `None` uses the coordinator default.
    pub lease_timeout: Option<Duration>,
}

impl PoolConfig {
    /// A price-free configuration with the default lease timeout.
    pub fn new(total: u32, commit: u32, max_overage: u32) -> Self {
        Self {
            total,
            commit,
            max_overage,
            commit_price: 0.0,
            overage_price_per_license: 0.0,
            lease_timeout: None,
        }
    }

    pub fn with_prices(mut self, commit_price: f64, overage_price_per_license: f64) -> Self {
        self.commit_price = commit_price;
        self.overage_price_per_license = overage_price_per_license;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Every problem with this configuration, empty when valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.total < 1 {
            problems.push("total must be at least 1".to_string());
        }
        if self.commit > self.total {
            problems.push(format!(
                "commit ({}) must not exceed total ({})",
                self.commit, self.total
            ));
        }
        if !self.commit_price.is_finite() || self.commit_price < 0.0 {
            problems.push("commit_price must be a non-negative number".to_string());
        }
        if !self.overage_price_per_license.is_finite() || self.overage_price_per_license < 0.0 {
            problems.push("overage_price_per_license must be a non-negative number".to_string());
        }
        if self.lease_timeout == Some(Duration::ZERO) {
            problems.push("lease timeout must be positive".to_string());
        }
        problems
    }

    /// Validate this configuration for `tool`.
    pub fn validate(&self, tool: &ToolName) -> Result<(), LedgerError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::InvalidConfig {
                tool: tool.clone(),
                reason: problems.join("; "),
            })
        }
    }

    /// Highest number of simultaneous leases this configuration allows.
    pub fn ceiling(&self) -> u32 {
        self.total.saturating_add(self.max_overage)
    }
}

/// Point-in-time copy of a pool's configuration and counters.
///
/// Produced under the pool's lock, so the derived fields always agree
/// with `borrowed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolLicensePool {
    pub tool: ToolName,
    pub total: u32,
    pub commit: u32,
    pub max_overage: u32,
    pub borrowed: u32,
    /// `max(0, borrowed - total)`.
    pub overage: u32,
    /// `max(0, total - borrowed)`.
    pub available: u32,
    /// `borrowed <= commit`.
    pub in_commit: bool,
    pub commit_price: f64,
    pub overage_price_per_license: f64,
    #[serde(skip)]
    pub lease_timeout: Option<Duration>,
    /// When the configuration in force was applied. Strictly increases
    /// with every reconfiguration of the pool.
    #[serde(skip)]
    pub configured_at: Timestamp,
}

impl ToolLicensePool {
    pub(crate) fn from_counters(
        tool: &ToolName,
        config: &PoolConfig,
        borrowed: u32,
        configured_at: Timestamp,
    ) -> Self {
        Self {
            tool: tool.clone(),
            total: config.total,
            commit: config.commit,
            max_overage: config.max_overage,
            borrowed,
            overage: borrowed.saturating_sub(config.total),
            available: config.total.saturating_sub(borrowed),
            in_commit: borrowed <= config.commit,
            commit_price: config.commit_price,
            overage_price_per_license: config.overage_price_per_license,
            lease_timeout: config.lease_timeout,
            configured_at,
        }
    }

    /// Whether the overage allowance is fully used.
    pub fn at_max_overage(&self) -> bool {
        self.max_overage > 0 && self.overage >= self.max_overage
    }

    /// The configuration this snapshot was taken from.
    pub fn config(&self) -> PoolConfig {
        PoolConfig {
            total: self.total,
            commit: self.commit,
            max_overage: self.max_overage,
            commit_price: self.commit_price,
            overage_price_per_license: self.overage_price_per_license,
            lease_timeout: self.lease_timeout,
        }
    }
}
