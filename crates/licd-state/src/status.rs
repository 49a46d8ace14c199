//! # Status Reporter
//!
//! Read-only views over the ledger, enriched with the cost figures derived
//! from the charge book. Each status is built from one pool snapshot, so
//! its counters never violate the pool invariant even while borrows and
//! returns are in flight.

use std::sync::Arc;

use licd_core::ToolName;
use serde::Serialize;

use crate::billing::ChargeBook;
use crate::error::LedgerError;
use crate::ledger::LeaseLedger;
use crate::pool::ToolLicensePool;

/// A pool snapshot plus its cost summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatus {
    #[serde(flatten)]
    pub pool: ToolLicensePool,
    /// Number of overage charges recorded for the tool.
    pub overage_borrows: u64,
    pub current_overage_cost: f64,
    pub total_cost: f64,
}

impl ToolStatus {
    fn new(pool: ToolLicensePool, overage_borrows: u64) -> Self {
        let current_overage_cost = overage_borrows as f64 * pool.overage_price_per_license;
        let total_cost = pool.commit_price + current_overage_cost;
        Self {
            pool,
            overage_borrows,
            current_overage_cost,
            total_cost,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    ledger: Arc<LeaseLedger>,
    charges: Arc<ChargeBook>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<LeaseLedger>, charges: Arc<ChargeBook>) -> Self {
        Self { ledger, charges }
    }

    /// Status of one configured tool.
    pub fn get_status(&self, tool: &ToolName) -> Result<ToolStatus, LedgerError> {
        let pool = self.ledger.snapshot(tool)?;
        let count = self.charges.count_for(tool);
        Ok(ToolStatus::new(pool, count))
    }

    /// Status of every tool, ordered by name.
    pub fn get_all_statuses(&self) -> Vec<ToolStatus> {
        self.ledger
            .snapshot_all()
            .into_iter()
            .map(|pool| {
                let count = self.charges.count_for(&pool.tool);
                ToolStatus::new(pool, count)
            })
            .collect()
    }
}
