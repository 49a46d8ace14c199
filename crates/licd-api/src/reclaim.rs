//! # Lease Reclamation
//!
//! Background task that expires leases whose holders stopped sending
//! heartbeats, purges old terminal leases, and retries parked journal
//! writes. Runs every `LICD_SWEEP_INTERVAL_SECS` until shutdown.

use std::time::Duration;

use licd_core::Timestamp;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::journal::JournalEntry;
use crate::state::AppState;
use crate::telemetry;

/// What one reclamation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    pub purged: usize,
    pub journal_written: usize,
    pub journal_pending: usize,
}

/// Spawn the reclaimer. It stops when `shutdown` flips to `true` or its
/// sender is dropped.
pub fn spawn(state: AppState, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "lease reclaimer started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick(&state).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("lease reclaimer stopped");
    })
}

/// Run one reclamation pass at the current time.
pub async fn tick(state: &AppState) -> TickReport {
    tick_at(state, Timestamp::now()).await
}

pub async fn tick_at(state: &AppState, now: Timestamp) -> TickReport {
    let sweep = state.coordinator.sweep_at(now);
    // The sweep itself logs each expiry.
    for lease in &sweep.expired {
        telemetry::lease_expired(&lease.tool);
    }

    let expired = sweep.expired.len();
    for lease in sweep.expired {
        state.journal(JournalEntry::Lease(lease)).await;
    }
    let flushed = state.flush_journal().await;
    telemetry::journal_pending(flushed.pending);

    for pool in state.coordinator.pools() {
        telemetry::record_pool(&pool);
    }

    TickReport {
        expired,
        purged: sweep.purged,
        journal_written: flushed.written,
        journal_pending: flushed.pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licd_core::{ToolName, UserName};
    use licd_state::{LeaseState, PoolConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn state_with_tool() -> (AppState, ToolName) {
        let state = AppState::new();
        let tool = ToolName::new("cad_tool").unwrap();
        state
            .coordinator
            .configure_tool(&tool, PoolConfig::new(2, 1, 0))
            .unwrap();
        (state, tool)
    }

    #[tokio::test]
    async fn tick_expires_stale_leases_and_frees_capacity() {
        let (state, tool) = state_with_tool();
        let user = UserName::new("alice").unwrap();
        let issued = Timestamp::parse("2026-01-01T00:00:00Z").unwrap();
        let ticket = state.coordinator.borrow_at(&tool, &user, issued).unwrap();

        let later = Timestamp::from_epoch_secs(issued.epoch_secs() + 7200).unwrap();
        let report = tick_at(&state, later).await;

        assert_eq!(report.expired, 1);
        assert_eq!(report.journal_pending, 0);
        assert_eq!(state.coordinator.status(&tool).unwrap().pool.borrowed, 0);
        let lease = state.coordinator.lease(&ticket.lease.id).unwrap();
        assert_eq!(lease.state, LeaseState::Expired);
    }

    #[derive(Clone, Default)]
    struct ExpiryLogCount(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ExpiryLogCount {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            struct Message(bool);
            impl Visit for Message {
                fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "message" && format!("{value:?}") == "lease expired" {
                        self.0 = true;
                    }
                }
            }
            let mut message = Message(false);
            event.record(&mut message);
            if message.0 {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn each_expiry_is_logged_once() {
        let count = ExpiryLogCount::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(count.clone()));

        let (state, tool) = state_with_tool();
        let user = UserName::new("alice").unwrap();
        let issued = Timestamp::parse("2026-01-01T00:00:00Z").unwrap();
        state.coordinator.borrow_at(&tool, &user, issued).unwrap();
        state.coordinator.borrow_at(&tool, &user, issued).unwrap();

        let later = Timestamp::from_epoch_secs(issued.epoch_secs() + 7200).unwrap();
        let report = tick_at(&state, later).await;

        assert_eq!(report.expired, 2);
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tick_leaves_fresh_leases_alone() {
        let (state, tool) = state_with_tool();
        let user = UserName::new("alice").unwrap();
        state.coordinator.borrow(&tool, &user).unwrap();

        let report = tick(&state).await;
        assert_eq!(report, TickReport::default());
        assert_eq!(state.coordinator.status(&tool).unwrap().pool.borrowed, 1);
    }

    #[tokio::test]
    async fn spawned_reclaimer_stops_on_shutdown() {
        let (state, _) = state_with_tool();
        let (tx, rx) = watch::channel(false);
        let handle = spawn(state, Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_stops_reclaimer() {
        let (state, _) = state_with_tool();
        let (tx, rx) = watch::channel(false);
        let handle = spawn(state, Duration::from_secs(60), rx);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }
}
