//! # Overage Charges
//!
//! Every overage-class admission on a priced pool leaves a charge behind.
//! Charges outlive the lease that caused them.

use std::collections::HashMap;

use licd_core::{ChargeId, LeaseId, Timestamp, ToolName, UserName};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One billed overage borrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverageCharge {
    pub id: ChargeId,
    pub tool: ToolName,
    pub lease_id: LeaseId,
    pub user: UserName,
    pub charged_at: Timestamp,
    pub amount: f64,
}

#[derive(Debug, Default)]
struct Book {
    charges: Vec<OverageCharge>,
    per_tool: HashMap<ToolName, u64>,
}

impl Book {
    fn push(&mut self, charge: OverageCharge) {
        *self.per_tool.entry(charge.tool.clone()).or_default() += 1;
        self.charges.push(charge);
    }
}

/// Append-mostly record of overage charges.
#[derive(Debug, Default)]
pub struct ChargeBook {
    inner: RwLock<Book>,
}

impl ChargeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a charge for `lease_id`.
    pub fn record(
        &self,
        tool: &ToolName,
        user: &UserName,
        lease_id: LeaseId,
        amount: f64,
        now: Timestamp,
    ) -> OverageCharge {
        let charge = OverageCharge {
            id: ChargeId::new(),
            tool: tool.clone(),
            lease_id,
            user: user.clone(),
            charged_at: now,
            amount,
        };
        self.inner.write().push(charge.clone());
        tracing::info!(tool = %tool, user = %user, lease_id = %lease_id, amount, "overage charge recorded");
        charge
    }

    /// Re-insert a charge recovered from durable storage.
    pub fn restore(&self, charge: OverageCharge) {
        self.inner.write().push(charge);
    }

    /// Remove the charge for a lease whose admission was rolled back.
    pub fn remove_for_lease(&self, lease_id: &LeaseId) -> Option<OverageCharge> {
        let mut book = self.inner.write();
        let pos = book.charges.iter().position(|c| &c.lease_id == lease_id)?;
        let charge = book.charges.remove(pos);
        if let Some(count) = book.per_tool.get_mut(&charge.tool) {
            *count = count.saturating_sub(1);
        }
        Some(charge)
    }

    /// Charges, newest first, optionally for one tool. Charges with the
    /// same timestamp list in reverse recording order.
    pub fn list(&self, tool: Option<&ToolName>) -> Vec<OverageCharge> {
        let mut charges: Vec<OverageCharge> = self
            .inner
            .read()
            .charges
            .iter()
            .rev()
            .filter(|c| tool.map_or(true, |t| &c.tool == t))
            .cloned()
            .collect();
        charges.sort_by(|a, b| b.charged_at.cmp(&a.charged_at));
        charges
    }

    /// Number of charges recorded against `tool`.
    pub fn count_for(&self, tool: &ToolName) -> u64 {
        self.inner.read().per_tool.get(tool).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().charges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
