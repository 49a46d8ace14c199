//! # Lease Ledger
//!
//! Authoritative per-tool counters. Each pool sits behind its own
//! `parking_lot::Mutex`, so borrows on different tools never contend. The
//! outer `RwLock` only guards the map's shape and is held for reading on
//! the hot path; it is taken for writing when a pool is created.
//!
//! `reserve` is the single serialization point for admission: the
//! capacity check and the increment happen under one pool lock, so two
//! racing reservations for the last slot cannot both succeed.
//!
//! Reconfiguration holds the map's write lock and then locks the affected
//! pools in name order. No path waits for the map lock while holding a
//! pool lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use licd_core::{Timestamp, ToolName};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::LedgerError;
use crate::pool::{CapacityClass, PoolConfig, ToolLicensePool};

#[derive(Debug)]
struct PoolEntry {
    config: PoolConfig,
    borrowed: u32,
    configured_at: Timestamp,
}

impl PoolEntry {
    fn new(config: PoolConfig, configured_at: Timestamp) -> Self {
        Self {
            config,
            borrowed: 0,
            configured_at,
        }
    }

    fn snapshot(&self, tool: &ToolName) -> ToolLicensePool {
        ToolLicensePool::from_counters(tool, &self.config, self.borrowed, self.configured_at)
    }

    fn check_fits(&self, tool: &ToolName, config: &PoolConfig) -> Result<(), LedgerError> {
        if self.borrowed > config.ceiling() {
            return Err(LedgerError::InvalidConfig {
                tool: tool.clone(),
                reason: format!(
                    "{} licenses are borrowed, above the new limit of {}",
                    self.borrowed,
                    config.ceiling()
                ),
            });
        }
        Ok(())
    }
}

/// When a batch of configurations takes effect.
#[derive(Debug, Clone, Copy)]
enum Stamp {
    /// Now, or just after the pool's previous configuration.
    Fresh,
    /// A stamp recovered from durable storage.
    Stored(Timestamp),
}

/// Outcome of a successful [`LeaseLedger::reserve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub tool: ToolName,
    pub class: CapacityClass,
    /// Per-tool timeout in force when the reservation was made.
    pub lease_timeout: Option<std::time::Duration>,
    /// Price of this unit when it is an overage borrow, else 0.
    pub overage_price: f64,
}

/// Map from tool name to independently locked pool counters.
#[derive(Debug, Default)]
pub struct LeaseLedger {
    pools: RwLock<BTreeMap<ToolName, Arc<Mutex<PoolEntry>>>>,
    auto_create: Option<PoolConfig>,
}

impl LeaseLedger {
    /// An empty ledger. Unknown tools are rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty ledger that creates unknown tools on first reference
    /// with `defaults`.
    pub fn with_auto_create(defaults: PoolConfig) -> Self {
        Self {
            pools: RwLock::new(BTreeMap::new()),
            auto_create: Some(defaults),
        }
    }

    /// Whether unknown tools are created on first reference.
    pub fn auto_creates(&self) -> bool {
        self.auto_create.is_some()
    }

    fn existing(&self, tool: &ToolName) -> Option<Arc<Mutex<PoolEntry>>> {
        self.pools.read().get(tool).cloned()
    }

    fn entry(&self, tool: &ToolName) -> Result<Arc<Mutex<PoolEntry>>, LedgerError> {
        if let Some(entry) = self.existing(tool) {
            return Ok(entry);
        }
        let Some(defaults) = &self.auto_create else {
            return Err(LedgerError::UnknownTool(tool.clone()));
        };
        let mut pools = self.pools.write();
        let entry = pools.entry(tool.clone()).or_insert_with(|| {
            tracing::info!(tool = %tool, total = defaults.total, "auto-created tool pool");
            Arc::new(Mutex::new(PoolEntry::new(defaults.clone(), Timestamp::now())))
        });
        Ok(Arc::clone(entry))
    }

    /// Snapshot of `tool`'s pool, creating it when auto-creation is on.
    pub fn get_pool(&self, tool: &ToolName) -> Result<ToolLicensePool, LedgerError> {
        let entry = self.entry(tool)?;
        let snapshot = entry.lock().snapshot(tool);
        Ok(snapshot)
    }

    /// Snapshot of an existing pool. Never creates.
    pub fn snapshot(&self, tool: &ToolName) -> Result<ToolLicensePool, LedgerError> {
        let entry = self
            .existing(tool)
            .ok_or_else(|| LedgerError::UnknownTool(tool.clone()))?;
        let snapshot = entry.lock().snapshot(tool);
        Ok(snapshot)
    }

    /// Snapshots of every pool, ordered by tool name.
    ///
    /// Each snapshot is internally consistent; snapshots of different
    /// tools may be taken a moment apart.
    pub fn snapshot_all(&self) -> Vec<ToolLicensePool> {
        let entries: Vec<(ToolName, Arc<Mutex<PoolEntry>>)> = self
            .pools
            .read()
            .iter()
            .map(|(tool, entry)| (tool.clone(), Arc::clone(entry)))
            .collect();
        entries
            .iter()
            .map(|(tool, entry)| entry.lock().snapshot(tool))
            .collect()
    }

    /// Names of every configured tool, ordered.
    pub fn tools(&self) -> Vec<ToolName> {
        self.pools.read().keys().cloned().collect()
    }

    /// Take one unit of capacity from `tool`.
    ///
    /// Policy, in order: below `total` is a commit or plain borrow; at or
    /// above `total` with overage headroom is an overage borrow; otherwise
    /// `NoCapacity`.
    pub fn reserve(&self, tool: &ToolName) -> Result<Reservation, LedgerError> {
        let entry = self.entry(tool)?;
        let mut guard = entry.lock();
        let config = &guard.config;
        let before = guard.borrowed;

        let class = if before < config.total {
            if before < config.commit {
                CapacityClass::Commit
            } else {
                CapacityClass::Plain
            }
        } else if before.saturating_sub(config.total) < config.max_overage {
            CapacityClass::Overage
        } else {
            return Err(LedgerError::NoCapacity(tool.clone()));
        };

        let reservation = Reservation {
            tool: tool.clone(),
            class,
            lease_timeout: config.lease_timeout,
            overage_price: if class == CapacityClass::Overage {
                config.overage_price_per_license
            } else {
                0.0
            },
        };
        guard.borrowed = before + 1;
        Ok(reservation)
    }

    /// Return one unit of capacity to `tool`.
    ///
    /// Callers guarantee each reservation is released at most once; a
    /// release against a zero counter is logged and ignored.
    pub fn release(&self, tool: &ToolName) -> Result<ToolLicensePool, LedgerError> {
        let entry = self
            .existing(tool)
            .ok_or_else(|| LedgerError::UnknownTool(tool.clone()))?;
        let mut guard = entry.lock();
        if guard.borrowed == 0 {
            tracing::error!(tool = %tool, "release on a pool with nothing borrowed");
        } else {
            guard.borrowed -= 1;
        }
        Ok(guard.snapshot(tool))
    }

    /// Create or reconfigure `tool`. Current borrows are kept and must fit
    /// under the new `total + max_overage`.
    ///
    /// The returned snapshot's `configured_at` is later than that of any
    /// earlier configuration of the pool.
    pub fn configure(
        &self,
        tool: &ToolName,
        config: PoolConfig,
    ) -> Result<ToolLicensePool, LedgerError> {
        self.single(tool, config, Stamp::Fresh)
    }

    /// Reapply a configuration recovered from durable storage, keeping the
    /// stamp it was stored with.
    pub fn restore_config(
        &self,
        tool: &ToolName,
        config: PoolConfig,
        configured_at: Timestamp,
    ) -> Result<ToolLicensePool, LedgerError> {
        self.single(tool, config, Stamp::Stored(configured_at))
    }

    /// Apply several configurations as one change. Every entry is checked
    /// against the current counters first; if any fails, no pool changes.
    pub fn configure_all(
        &self,
        batch: Vec<(ToolName, PoolConfig)>,
    ) -> Result<Vec<ToolLicensePool>, LedgerError> {
        self.apply(batch, Stamp::Fresh)
    }

    fn single(
        &self,
        tool: &ToolName,
        config: PoolConfig,
        stamp: Stamp,
    ) -> Result<ToolLicensePool, LedgerError> {
        self.apply(vec![(tool.clone(), config)], stamp)?
            .pop()
            .ok_or_else(|| LedgerError::UnknownTool(tool.clone()))
    }

    fn apply(
        &self,
        batch: Vec<(ToolName, PoolConfig)>,
        stamp: Stamp,
    ) -> Result<Vec<ToolLicensePool>, LedgerError> {
        // Ordered and deduplicated, last entry wins.
        let batch: BTreeMap<ToolName, PoolConfig> = batch.into_iter().collect();
        for (tool, config) in &batch {
            config.validate(tool)?;
        }

        let mut pools = self.pools.write();
        let existing: Vec<Option<Arc<Mutex<PoolEntry>>>> =
            batch.keys().map(|tool| pools.get(tool).cloned()).collect();
        let mut guards: Vec<Option<MutexGuard<'_, PoolEntry>>> = existing
            .iter()
            .map(|entry| entry.as_ref().map(|entry| entry.lock()))
            .collect();
        for ((tool, config), guard) in batch.iter().zip(&guards) {
            if let Some(guard) = guard {
                guard.check_fits(tool, config)?;
            }
        }

        let now = Timestamp::now();
        let mut applied = Vec::with_capacity(batch.len());
        for ((tool, config), guard) in batch.into_iter().zip(guards.iter_mut()) {
            match guard {
                Some(guard) => {
                    guard.configured_at = match stamp {
                        Stamp::Fresh => now.after(&guard.configured_at),
                        Stamp::Stored(at) => at,
                    };
                    guard.config = config;
                    applied.push(guard.snapshot(&tool));
                }
                None => {
                    let at = match stamp {
                        Stamp::Fresh => now,
                        Stamp::Stored(at) => at,
                    };
                    let entry = PoolEntry::new(config, at);
                    applied.push(entry.snapshot(&tool));
                    pools.insert(tool, Arc::new(Mutex::new(entry)));
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolName {
        ToolName::new(name).unwrap()
    }

    fn ledger_with(name: &str, config: PoolConfig) -> LeaseLedger {
        let ledger = LeaseLedger::new();
        ledger.configure(&tool(name), config).unwrap();
        ledger
    }

    #[test]
    fn reserve_walks_commit_plain_overage() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(3, 1, 1));
        let classes: Vec<_> = (0..4).map(|_| ledger.reserve(&t).unwrap().class).collect();
        assert_eq!(
            classes,
            vec![
                CapacityClass::Commit,
                CapacityClass::Plain,
                CapacityClass::Plain,
                CapacityClass::Overage
            ]
        );
        assert_eq!(ledger.reserve(&t), Err(LedgerError::NoCapacity(t.clone())));
        let pool = ledger.snapshot(&t).unwrap();
        assert_eq!(pool.borrowed, 4);
        assert_eq!(pool.overage, 1);
    }

    #[test]
    fn release_restores_counters() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(2, 1, 0));
        let before = ledger.snapshot(&t).unwrap();
        ledger.reserve(&t).unwrap();
        let after = ledger.release(&t).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn release_never_underflows() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(2, 1, 0));
        let pool = ledger.release(&t).unwrap();
        assert_eq!(pool.borrowed, 0);
    }

    #[test]
    fn unknown_tool_without_auto_create() {
        let ledger = LeaseLedger::new();
        let t = tool("ghost");
        assert_eq!(ledger.get_pool(&t), Err(LedgerError::UnknownTool(t.clone())));
        assert_eq!(ledger.reserve(&t), Err(LedgerError::UnknownTool(t.clone())));
        assert!(ledger.tools().is_empty());
    }

    #[test]
    fn auto_create_on_first_reference() {
        let ledger = LeaseLedger::with_auto_create(PoolConfig::new(2, 1, 0));
        let t = tool("new_tool");
        let reservation = ledger.reserve(&t).unwrap();
        assert_eq!(reservation.class, CapacityClass::Commit);
        assert_eq!(ledger.snapshot(&t).unwrap().borrowed, 1);
    }

    #[test]
    fn snapshot_does_not_auto_create() {
        let ledger = LeaseLedger::with_auto_create(PoolConfig::new(2, 1, 0));
        assert!(ledger.snapshot(&tool("ghost")).is_err());
        assert!(ledger.tools().is_empty());
    }

    #[test]
    fn snapshot_all_is_ordered_by_name() {
        let ledger = LeaseLedger::new();
        for name in ["beta", "alpha", "gamma"] {
            ledger.configure(&tool(name), PoolConfig::new(1, 1, 0)).unwrap();
        }
        let names: Vec<String> = ledger
            .snapshot_all()
            .into_iter()
            .map(|p| p.tool.to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn reconfigure_keeps_borrowed() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(2, 1, 0));
        ledger.reserve(&t).unwrap();
        let pool = ledger
            .configure(&t, PoolConfig::new(10, 5, 2).with_prices(100.0, 10.0))
            .unwrap();
        assert_eq!(pool.borrowed, 1);
        assert_eq!(pool.total, 10);
        assert_eq!(pool.overage_price_per_license, 10.0);
    }

    #[test]
    fn reconfigure_below_borrowed_rejected() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(3, 1, 0));
        for _ in 0..3 {
            ledger.reserve(&t).unwrap();
        }
        let err = ledger.configure(&t, PoolConfig::new(1, 1, 1)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig { .. }));
        assert_eq!(ledger.snapshot(&t).unwrap().total, 3);
    }

    #[test]
    fn each_reconfiguration_is_stamped_later() {
        let t = tool("cad_tool");
        let ledger = LeaseLedger::new();
        let stamps: Vec<Timestamp> = (1..=20)
            .map(|total| ledger.configure(&t, PoolConfig::new(total, 1, 0)).unwrap().configured_at)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
        assert_eq!(ledger.snapshot(&t).unwrap().configured_at, stamps[19]);
    }

    #[test]
    fn fresh_stamp_passes_a_future_stored_stamp() {
        let t = tool("cad_tool");
        let ledger = LeaseLedger::new();
        let stored = Timestamp::now().saturating_add(std::time::Duration::from_secs(3600));
        let restored = ledger.restore_config(&t, PoolConfig::new(2, 1, 0), stored).unwrap();
        assert_eq!(restored.configured_at, stored);

        let next = ledger.configure(&t, PoolConfig::new(3, 1, 0)).unwrap();
        assert!(next.configured_at > stored);
        assert_eq!(next.total, 3);
    }

    #[test]
    fn concurrent_reconfigurations_keep_stamp_order() {
        let t = tool("cad_tool");
        let ledger = Arc::new(ledger_with("cad_tool", PoolConfig::new(1, 1, 0)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let t = t.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|j| {
                            let pool = ledger.configure(&t, PoolConfig::new(i * 100 + j + 1, 1, 0)).unwrap();
                            (pool.configured_at, pool.total)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut applied: Vec<(Timestamp, u32)> =
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        applied.sort();
        applied.dedup_by_key(|(at, _)| *at);
        assert_eq!(applied.len(), 200, "stamps must be unique");

        // The newest stamp belongs to the configuration left in force.
        let (_, last_total) = applied[applied.len() - 1];
        assert_eq!(ledger.snapshot(&t).unwrap().total, last_total);
    }

    #[test]
    fn batch_that_does_not_fit_changes_nothing() {
        let ledger = LeaseLedger::new();
        ledger.configure(&tool("alpha"), PoolConfig::new(2, 1, 0)).unwrap();
        ledger.configure(&tool("beta"), PoolConfig::new(3, 1, 0)).unwrap();
        for _ in 0..3 {
            ledger.reserve(&tool("beta")).unwrap();
        }
        let before = ledger.snapshot_all();

        let err = ledger
            .configure_all(vec![
                (tool("alpha"), PoolConfig::new(9, 1, 0)),
                (tool("beta"), PoolConfig::new(1, 1, 0)),
                (tool("gamma"), PoolConfig::new(4, 1, 0)),
            ])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig { .. }));
        assert_eq!(ledger.snapshot_all(), before);
        assert_eq!(ledger.tools(), vec![tool("alpha"), tool("beta")]);

        let applied = ledger
            .configure_all(vec![
                (tool("gamma"), PoolConfig::new(4, 1, 0)),
                (tool("beta"), PoolConfig::new(3, 1, 1)),
            ])
            .unwrap();
        let names: Vec<&str> = applied.iter().map(|p| p.tool.as_str()).collect();
        assert_eq!(names, vec!["beta", "gamma"]);
        assert_eq!(ledger.snapshot(&tool("beta")).unwrap().borrowed, 3);
    }

    #[test]
    fn overage_reservation_carries_price() {
        let t = tool("cad_tool");
        let ledger = ledger_with("cad_tool", PoolConfig::new(1, 1, 1).with_prices(0.0, 250.0));
        assert_eq!(ledger.reserve(&t).unwrap().overage_price, 0.0);
        assert_eq!(ledger.reserve(&t).unwrap().overage_price, 250.0);
    }
}
