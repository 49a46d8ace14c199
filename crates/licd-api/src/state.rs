//! # Application State
//!
//! Shared state handed to every handler: the license coordinator, the
//! request-signature verifier, the optional database journal and its
//! outbox, and the Prometheus handle. Cloning is cheap.

use std::collections::HashSet;
use std::sync::Arc;

use licd_core::{LeaseId, Timestamp, ToolName};
use licd_crypto::RequestVerifier;
use licd_state::{Lease, LicenseCoordinator};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::AppConfig;
use crate::db;
use crate::journal::{self, FlushReport, JournalEntry, Outbox};

/// Startup replay of the database journal failed.
#[derive(Error, Debug)]
#[error("failed to load {what} from database: {source}")]
pub struct HydrationError {
    pub what: &'static str,
    #[source]
    pub source: sqlx::Error,
}

/// What hydration restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub pools: usize,
    pub leases: usize,
    /// ACTIVE leases that could not be restored and were expired.
    pub dropped_leases: usize,
    pub charges: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: LicenseCoordinator,
    pub verifier: Arc<dyn RequestVerifier>,
    pub db_pool: Option<PgPool>,
    pub outbox: Outbox,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tools", &self.coordinator.pools().len())
            .field("active_leases", &self.coordinator.active_lease_count())
            .field("verifier", &self.verifier)
            .field("db", &self.db_pool.is_some())
            .field("journal_pending", &self.outbox.len())
            .field("metrics", &self.metrics.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AppState {
    /// Default configuration, no tools, no database.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            coordinator: LicenseCoordinator::new(config.coordinator_config()),
            verifier: Arc::new(config.verifier()),
            db_pool,
            outbox: Outbox::new(),
            metrics: None,
            config: Arc::new(config),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn RequestVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Journal a state change, parking it for retry if the write fails.
    pub async fn journal(&self, entry: JournalEntry) {
        journal::write_or_park(self.db_pool.as_ref(), &self.outbox, entry).await;
    }

    /// Retry parked journal writes.
    pub async fn flush_journal(&self) -> FlushReport {
        journal::flush(self.db_pool.as_ref(), &self.outbox).await
    }

    /// Rebuild in-memory state from the journal.
    ///
    /// Stored pools override the startup catalog; catalog tools missing
    /// from the database are written to it. ACTIVE leases are re-reserved
    /// against their pools; one that cannot be restored for any reason is
    /// marked EXPIRED in the journal so it is not retried on the next boot.
    /// Charges are restored last.
    pub async fn hydrate_from_db(&self) -> Result<HydrationReport, HydrationError> {
        let Some(pool) = &self.db_pool else {
            return Ok(HydrationReport::default());
        };
        let load = |what: &'static str| move |source: sqlx::Error| HydrationError { what, source };
        let mut report = HydrationReport::default();

        let stored = db::pools::load_all(pool).await.map_err(load("tool pools"))?;
        let mut stored_tools: HashSet<ToolName> = HashSet::with_capacity(stored.len());
        for row in stored {
            match self.coordinator.restore_pool(&row.tool, row.config, row.updated_at) {
                Ok(_) => {
                    report.pools += 1;
                    stored_tools.insert(row.tool);
                }
                Err(e) => tracing::warn!(tool = %row.tool, error = %e, "skipping stored pool"),
            }
        }
        for snapshot in self.coordinator.pools() {
            if !stored_tools.contains(&snapshot.tool) {
                db::pools::upsert(pool, &snapshot.tool, &snapshot.config(), snapshot.configured_at)
                    .await
                    .map_err(load("tool pools"))?;
            }
        }

        let now = Timestamp::now();
        let leases = db::leases::load_active(pool).await.map_err(load("leases"))?;
        for id in self.restore_leases(leases, &mut report) {
            db::leases::mark_expired(pool, &id, now)
                .await
                .map_err(load("leases"))?;
        }

        let charges = db::charges::load_all(pool).await.map_err(load("overage charges"))?;
        report.charges = charges.len();
        for charge in charges {
            self.coordinator.restore_charge(charge);
        }

        tracing::info!(
            pools = report.pools,
            leases = report.leases,
            dropped_leases = report.dropped_leases,
            charges = report.charges,
            "Hydrated in-memory state from database"
        );
        Ok(report)
    }

    /// Re-reserve stored ACTIVE leases. Returns the leases that could not
    /// be restored, whatever the reason; each must be expired in the
    /// journal.
    fn restore_leases(&self, leases: Vec<Lease>, report: &mut HydrationReport) -> Vec<LeaseId> {
        let mut rejected = Vec::new();
        for lease in leases {
            let (id, tool) = (lease.id, lease.tool.clone());
            match self.coordinator.restore_lease(lease) {
                Ok(()) => report.leases += 1,
                Err(e) => {
                    tracing::warn!(lease_id = %id, tool = %tool, error = %e, "stored lease not restored, expiring");
                    report.dropped_leases += 1;
                    rejected.push(id);
                }
            }
        }
        rejected
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
