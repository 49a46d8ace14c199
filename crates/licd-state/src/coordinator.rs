//! # License Coordinator
//!
//! Facade wiring the ledger, lifecycle manager, admission controller,
//! status reporter and charge book around one shared ledger. Cloning is
//! cheap; every clone sees the same state.

use std::sync::Arc;
use std::time::Duration;

use licd_core::{LeaseId, Timestamp, ToolName, UserName};

use crate::admission::{AdmissionController, LeaseTicket};
use crate::billing::{ChargeBook, OverageCharge};
use crate::catalog::ToolCatalog;
use crate::error::{AdmissionError, CatalogError, LeaseError, LedgerError};
use crate::lease::Lease;
use crate::ledger::LeaseLedger;
use crate::lifecycle::{LeaseManager, SweepReport};
use crate::pool::{PoolConfig, ToolLicensePool};
use crate::status::{StatusReporter, ToolStatus};

/// Default lease timeout when neither the pool nor the caller sets one.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(3600);
/// Default time terminal leases stay queryable before they are purged.
pub const DEFAULT_TERMINAL_RETENTION: Duration = Duration::from_secs(300);
/// Default lease table capacity.
pub const DEFAULT_MAX_LEASES: usize = 100_000;

/// Construction parameters of a [`LicenseCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub default_lease_timeout: Duration,
    pub terminal_retention: Duration,
    pub max_leases: usize,
    /// Defaults for tools created on first reference. `None` rejects
    /// unknown tools.
    pub auto_create: Option<PoolConfig>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_lease_timeout: DEFAULT_LEASE_TIMEOUT,
            terminal_retention: DEFAULT_TERMINAL_RETENTION,
            max_leases: DEFAULT_MAX_LEASES,
            auto_create: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LicenseCoordinator {
    ledger: Arc<LeaseLedger>,
    leases: Arc<LeaseManager>,
    charges: Arc<ChargeBook>,
    admission: AdmissionController,
    status: StatusReporter,
}

impl LicenseCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let ledger = Arc::new(match config.auto_create {
            Some(defaults) => LeaseLedger::with_auto_create(defaults),
            None => LeaseLedger::new(),
        });
        let leases = Arc::new(LeaseManager::new(
            Arc::clone(&ledger),
            config.default_lease_timeout,
            config.terminal_retention,
            config.max_leases,
        ));
        let charges = Arc::new(ChargeBook::new());
        let admission =
            AdmissionController::new(Arc::clone(&ledger), Arc::clone(&leases), Arc::clone(&charges));
        let status = StatusReporter::new(Arc::clone(&ledger), Arc::clone(&charges));
        Self {
            ledger,
            leases,
            charges,
            admission,
            status,
        }
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Validate and apply a catalog. Nothing is applied if any entry is
    /// invalid or would shrink a pool below its current borrows. Returns
    /// the number of pools configured.
    pub fn load_catalog(&self, catalog: &ToolCatalog) -> Result<usize, CatalogError> {
        let pools = catalog.validate()?;
        let count = self.ledger.configure_all(pools)?.len();
        tracing::info!(tools = count, "tool catalog loaded");
        Ok(count)
    }

    /// Create or reconfigure one pool.
    pub fn configure_tool(
        &self,
        tool: &ToolName,
        config: PoolConfig,
    ) -> Result<ToolLicensePool, LedgerError> {
        let pool = self.ledger.configure(tool, config)?;
        tracing::info!(
            tool = %tool,
            total = pool.total,
            commit = pool.commit,
            max_overage = pool.max_overage,
            "tool pool configured"
        );
        Ok(pool)
    }

    /// Reapply a pool configuration recovered from durable storage.
    pub fn restore_pool(
        &self,
        tool: &ToolName,
        config: PoolConfig,
        configured_at: Timestamp,
    ) -> Result<ToolLicensePool, LedgerError> {
        self.ledger.restore_config(tool, config, configured_at)
    }

    // ── Borrow / return / heartbeat ─────────────────────────────────

    pub fn borrow(&self, tool: &ToolName, user: &UserName) -> Result<LeaseTicket, AdmissionError> {
        self.borrow_at(tool, user, Timestamp::now())
    }

    pub fn borrow_at(
        &self,
        tool: &ToolName,
        user: &UserName,
        now: Timestamp,
    ) -> Result<LeaseTicket, AdmissionError> {
        self.admission.try_admit(tool, user, now)
    }

    /// Undo a borrow whose durable record could not be written: the lease
    /// disappears, its capacity is released once, and its charge is dropped.
    pub fn rollback_borrow(&self, ticket: &LeaseTicket) {
        self.leases.discard(&ticket.lease.id);
        if ticket.charge.is_some() {
            self.charges.remove_for_lease(&ticket.lease.id);
        }
        tracing::warn!(lease_id = %ticket.lease.id, tool = %ticket.lease.tool, "borrow rolled back");
    }

    pub fn return_lease(&self, id: &LeaseId) -> Result<Lease, LeaseError> {
        self.return_lease_at(id, Timestamp::now())
    }

    pub fn return_lease_at(&self, id: &LeaseId, now: Timestamp) -> Result<Lease, LeaseError> {
        let lease = self.leases.return_lease(id, now)?;
        tracing::info!(lease_id = %id, tool = %lease.tool, user = %lease.user, "license returned");
        Ok(lease)
    }

    pub fn heartbeat(&self, id: &LeaseId) -> Result<Lease, LeaseError> {
        self.heartbeat_at(id, Timestamp::now())
    }

    pub fn heartbeat_at(&self, id: &LeaseId, now: Timestamp) -> Result<Lease, LeaseError> {
        let lease = self.leases.heartbeat(id, now)?;
        tracing::debug!(lease_id = %id, tool = %lease.tool, expires_at = %lease.expires_at, "lease heartbeat");
        Ok(lease)
    }

    /// Expire lapsed leases and purge old terminal ones.
    pub fn sweep_at(&self, now: Timestamp) -> SweepReport {
        let report = self.leases.sweep(now);
        if !report.expired.is_empty() || report.purged > 0 {
            tracing::info!(
                expired = report.expired.len(),
                purged = report.purged,
                "reclamation sweep"
            );
        }
        report
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// Re-admit an ACTIVE lease recovered from durable storage, reserving
    /// its capacity against the current pool limits.
    pub fn restore_lease(&self, lease: Lease) -> Result<(), AdmissionError> {
        if !lease.is_active() {
            return Ok(());
        }
        self.ledger.reserve(&lease.tool)?;
        let tool = lease.tool.clone();
        if let Err(e) = self.leases.restore(lease) {
            if let Err(release_err) = self.ledger.release(&tool) {
                tracing::error!(tool = %tool, error = %release_err, "rollback release failed");
            }
            return Err(AdmissionError::Storage(e.to_string()));
        }
        Ok(())
    }

    pub fn restore_charge(&self, charge: OverageCharge) {
        self.charges.restore(charge);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self, tool: &ToolName) -> Result<ToolStatus, LedgerError> {
        self.status.get_status(tool)
    }

    /// Every tool's status, ordered by name.
    pub fn statuses(&self) -> Vec<ToolStatus> {
        self.status.get_all_statuses()
    }

    /// Pool snapshot, creating the pool when auto-creation is on.
    pub fn pool(&self, tool: &ToolName) -> Result<ToolLicensePool, LedgerError> {
        self.ledger.get_pool(tool)
    }

    /// Configuration and counters of every pool, ordered by name.
    pub fn pools(&self) -> Vec<ToolLicensePool> {
        self.ledger.snapshot_all()
    }

    pub fn lease(&self, id: &LeaseId) -> Option<Lease> {
        self.leases.get(id)
    }

    pub fn active_leases(&self, user: Option<&UserName>) -> Vec<Lease> {
        self.leases.list_active(user)
    }

    pub fn active_lease_count(&self) -> usize {
        self.leases.active_count()
    }

    pub fn charges(&self, tool: Option<&ToolName>) -> Vec<OverageCharge> {
        self.charges.list(tool)
    }

    pub fn default_lease_timeout(&self) -> Duration {
        self.leases.default_timeout()
    }
}

impl Default for LicenseCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
