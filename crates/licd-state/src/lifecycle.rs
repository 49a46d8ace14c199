//! # Lease Lifecycle Manager
//!
//! Owns the lease table: minting, heartbeat, return, expiry sweep and
//! purge of terminal leases. The table lock and the ledger's pool locks are
//! never held together; state transitions happen under the table lock and
//! the matching `release` runs after it is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use licd_core::{LeaseId, Timestamp, UserName};
use parking_lot::RwLock;

use crate::error::LeaseError;
use crate::lease::Lease;
use crate::ledger::{LeaseLedger, Reservation};

/// Outcome of one reclamation sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Leases moved ACTIVE → EXPIRED by this sweep. Capacity has been
    /// released for each of them.
    pub expired: Vec<Lease>,
    /// Terminal leases dropped from the table.
    pub purged: usize,
}

#[derive(Debug)]
struct Slot {
    /// Insertion order, used to break issue-time ties.
    seq: u64,
    lease: Lease,
}

#[derive(Debug, Default)]
struct Table {
    slots: HashMap<LeaseId, Slot>,
    next_seq: u64,
}

impl Table {
    fn len(&self) -> usize {
        self.slots.len()
    }

    fn get_mut(&mut self, id: &LeaseId) -> Option<&mut Lease> {
        self.slots.get_mut(id).map(|slot| &mut slot.lease)
    }

    fn insert(&mut self, lease: Lease) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(lease.id, Slot { seq, lease });
    }

    /// Free one entry when the table is at `max`. Terminal leases are only
    /// kept for inspection, so the one that ended first is evicted; a table
    /// holding nothing but active leases is full.
    fn make_room(&mut self, max: usize) -> Result<(), LeaseError> {
        if self.len() < max {
            return Ok(());
        }
        let oldest_terminal = self
            .slots
            .values()
            .filter(|slot| slot.lease.state.is_terminal())
            .min_by_key(|slot| (slot.lease.ended_at, slot.seq))
            .map(|slot| slot.lease.id);
        match oldest_terminal {
            Some(id) => {
                self.slots.remove(&id);
                Ok(())
            }
            None => Err(LeaseError::Storage(format!(
                "lease table is full ({max} active leases)"
            ))),
        }
    }
}

/// Lease table guarded independently of the ledger.
#[derive(Debug)]
pub struct LeaseManager {
    leases: RwLock<Table>,
    ledger: Arc<LeaseLedger>,
    default_timeout: Duration,
    retention: Duration,
    max_leases: usize,
}

impl LeaseManager {
    pub fn new(
        ledger: Arc<LeaseLedger>,
        default_timeout: Duration,
        retention: Duration,
        max_leases: usize,
    ) -> Self {
        Self {
            leases: RwLock::new(Table::default()),
            ledger,
            default_timeout,
            retention,
            max_leases,
        }
    }

    /// Lease timeout used when a pool has none of its own.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Record a lease for an already-granted reservation.
    ///
    /// A full table first evicts its oldest terminal lease. Fails with
    /// `Storage` only when every entry is active; the caller owns the
    /// reservation and must release it.
    pub fn create_lease(
        &self,
        reservation: &Reservation,
        user: &UserName,
        now: Timestamp,
    ) -> Result<Lease, LeaseError> {
        let timeout = reservation.lease_timeout.unwrap_or(self.default_timeout);
        let lease = Lease::issue(
            reservation.tool.clone(),
            user.clone(),
            reservation.class,
            timeout,
            now,
        );
        let mut table = self.leases.write();
        table.make_room(self.max_leases)?;
        table.insert(lease.clone());
        Ok(lease)
    }

    /// ACTIVE → RETURNED, then release capacity.
    pub fn return_lease(&self, id: &LeaseId, now: Timestamp) -> Result<Lease, LeaseError> {
        let lease = {
            let mut table = self.leases.write();
            let lease = table.get_mut(id).ok_or(LeaseError::NotFound(*id))?;
            lease.mark_returned(now)?;
            lease.clone()
        };
        self.release(&lease);
        Ok(lease)
    }

    /// Refresh an ACTIVE lease's heartbeat.
    pub fn heartbeat(&self, id: &LeaseId, now: Timestamp) -> Result<Lease, LeaseError> {
        let mut table = self.leases.write();
        let lease = table.get_mut(id).ok_or(LeaseError::NotFound(*id))?;
        lease.heartbeat(now)?;
        Ok(lease.clone())
    }

    /// Drop a lease entirely, releasing its capacity if it was still active.
    ///
    /// Used to undo an admission whose durable record could not be written.
    pub fn discard(&self, id: &LeaseId) -> Option<Lease> {
        let removed = self.leases.write().slots.remove(id)?.lease;
        if removed.is_active() {
            self.release(&removed);
        }
        Some(removed)
    }

    /// Re-insert a lease recovered from durable storage. Its capacity must
    /// already be reserved.
    pub fn restore(&self, lease: Lease) -> Result<(), LeaseError> {
        let mut table = self.leases.write();
        table.make_room(self.max_leases)?;
        table.insert(lease);
        Ok(())
    }

    pub fn get(&self, id: &LeaseId) -> Option<Lease> {
        self.leases.read().slots.get(id).map(|slot| slot.lease.clone())
    }

    /// Active leases, newest first, optionally for one user. Leases issued
    /// in the same millisecond list last-created first.
    pub fn list_active(&self, user: Option<&UserName>) -> Vec<Lease> {
        let table = self.leases.read();
        let mut slots: Vec<&Slot> = table
            .slots
            .values()
            .filter(|s| s.lease.is_active() && user.map_or(true, |u| &s.lease.user == u))
            .collect();
        slots.sort_by(|a, b| {
            b.lease
                .issued_at
                .cmp(&a.lease.issued_at)
                .then(b.seq.cmp(&a.seq))
        });
        slots.into_iter().map(|s| s.lease.clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.leases
            .read()
            .slots
            .values()
            .filter(|s| s.lease.is_active())
            .count()
    }

    /// Number of leases in the table, terminal ones included.
    pub fn len(&self) -> usize {
        self.leases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expire every lapsed lease and purge terminal leases past retention.
    ///
    /// Expiry and return both go through the lease's check-and-set, so a
    /// lease returned concurrently with this sweep is released once.
    pub fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        {
            let mut table = self.leases.write();
            for Slot { lease, .. } in table.slots.values_mut() {
                if lease.is_lapsed(now) && lease.mark_expired(now).is_ok() {
                    report.expired.push(lease.clone());
                }
            }
            let before = table.len();
            let retention = self.retention;
            table
                .slots
                .retain(|_, slot| !slot.lease.is_purgeable(now, retention));
            report.purged = before - table.len();
        }

        for lease in &report.expired {
            tracing::info!(
                lease_id = %lease.id,
                tool = %lease.tool,
                user = %lease.user,
                "lease expired"
            );
            self.release(lease);
        }
        report
    }

    fn release(&self, lease: &Lease) {
        if let Err(e) = self.ledger.release(&lease.tool) {
            tracing::error!(lease_id = %lease.id, tool = %lease.tool, error = %e, "capacity release failed");
        }
    }
}
