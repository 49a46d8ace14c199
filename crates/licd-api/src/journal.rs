//! # Journal Outbox
//!
//! Returns, heartbeats, expiries and budget changes commit in memory
//! first and are then written to the database. A write that fails is
//! parked here and retried on every reclamation tick until it succeeds.
//! Pending entries are coalesced per lease and per tool, keeping the
//! newest.

use std::sync::Arc;

use licd_core::{LeaseId, Timestamp, ToolName};
use licd_state::{Lease, PoolConfig, ToolLicensePool};
use parking_lot::Mutex;
use sqlx::PgPool;

use crate::db;

/// One deferred database write.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    /// Current state of a lease.
    Lease(Lease),
    /// A pool configuration applied at `at`.
    Pool {
        tool: ToolName,
        config: PoolConfig,
        at: Timestamp,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKey {
    Lease(LeaseId),
    Pool(ToolName),
}

impl JournalEntry {
    /// The configuration a snapshot was taken under, stamped with the time
    /// it was applied.
    pub fn pool(snapshot: &ToolLicensePool) -> Self {
        Self::Pool {
            tool: snapshot.tool.clone(),
            config: snapshot.config(),
            at: snapshot.configured_at,
        }
    }

    /// Whether this is a pool configuration applied before `other`.
    fn older_than(&self, other: &JournalEntry) -> bool {
        matches!(
            (self, other),
            (Self::Pool { at: a, .. }, Self::Pool { at: b, .. }) if a < b
        )
    }

    fn key(&self) -> EntryKey {
        match self {
            Self::Lease(lease) => EntryKey::Lease(lease.id),
            Self::Pool { tool, .. } => EntryKey::Pool(tool.clone()),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lease(_) => "lease",
            Self::Pool { .. } => "pool",
        }
    }

    /// Write this entry to the database.
    pub async fn write(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        match self {
            Self::Lease(lease) => db::leases::upsert(pool, lease).await,
            Self::Pool { tool, config, at } => db::pools::upsert(pool, tool, config, *at).await,
        }
    }
}

/// Pending journal writes shared by handlers and the reclamation task.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    pending: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an entry, replacing the pending entry for the same key unless
    /// that one is a later pool configuration.
    pub fn push(&self, entry: JournalEntry) {
        let key = entry.key();
        let mut pending = self.pending.lock();
        match pending.iter_mut().find(|e| e.key() == key) {
            Some(slot) => {
                if !entry.older_than(slot) {
                    *slot = entry;
                }
            }
            None => pending.push(entry),
        }
    }

    /// Remove and return everything pending, oldest first.
    pub fn take(&self) -> Vec<JournalEntry> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Put back entries that failed again. An entry whose key was pushed
    /// while it was in flight is dropped in favour of the newer one.
    pub fn requeue(&self, entries: Vec<JournalEntry>) {
        let mut pending = self.pending.lock();
        let mut restored: Vec<JournalEntry> = entries
            .into_iter()
            .filter(|e| {
                let key = e.key();
                !pending.iter().any(|p| p.key() == key)
            })
            .collect();
        restored.append(&mut pending);
        *pending = restored;
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Outcome of one outbox drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub pending: usize,
}

/// Write `entry` now, parking it in `outbox` if the write fails.
pub async fn write_or_park(db: Option<&PgPool>, outbox: &Outbox, entry: JournalEntry) {
    let Some(pool) = db else {
        return;
    };
    if let Err(e) = entry.write(pool).await {
        tracing::warn!(kind = entry.kind(), error = %e, "journal write failed, queued for retry");
        outbox.push(entry);
    }
}

/// Retry every parked entry once.
pub async fn flush(db: Option<&PgPool>, outbox: &Outbox) -> FlushReport {
    let Some(pool) = db else {
        return FlushReport::default();
    };
    let entries = outbox.take();
    if entries.is_empty() {
        return FlushReport::default();
    }

    let mut written = 0;
    let mut failed = Vec::new();
    let mut last_error = None;
    for entry in entries {
        match entry.write(pool).await {
            Ok(()) => written += 1,
            Err(e) => {
                last_error = Some(e.to_string());
                failed.push(entry);
            }
        }
    }
    if let Some(error) = last_error {
        tracing::warn!(failed = failed.len(), error = %error, "journal retry failed");
    }
    outbox.requeue(failed);
    let report = FlushReport {
        written,
        pending: outbox.len(),
    };
    if written > 0 {
        tracing::info!(written, pending = report.pending, "journal outbox drained");
    }
    report
}
