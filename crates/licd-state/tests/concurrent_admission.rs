//! # Concurrent Admission Tests
//!
//! Threads hammering one pool through the coordinator. Every thread waits
//! on a barrier so the borrows genuinely contend for the last slots.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use licd_core::{Timestamp, ToolName, UserName};
use licd_state::{AdmissionError, LeaseError, LicenseCoordinator, PoolConfig};

fn tool() -> ToolName {
    ToolName::new("cad_tool").unwrap()
}

fn coordinator(config: PoolConfig) -> LicenseCoordinator {
    let c = LicenseCoordinator::default();
    c.configure_tool(&tool(), config).unwrap();
    c
}

fn at(secs: i64) -> Timestamp {
    Timestamp::from_epoch_secs(1_768_478_400 + secs).unwrap()
}

/// Run `n` borrows at once; returns the successful lease IDs and the errors.
fn contend(c: &LicenseCoordinator, n: usize) -> (Vec<licd_core::LeaseId>, Vec<AdmissionError>) {
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let c = c.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let user = UserName::new(format!("user-{i}")).unwrap();
                barrier.wait();
                c.borrow(&tool(), &user)
            })
        })
        .collect();

    let mut ok = Vec::new();
    let mut err = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(ticket) => ok.push(ticket.lease.id),
            Err(e) => err.push(e),
        }
    }
    (ok, err)
}

// ---------------------------------------------------------------------------
// 1. Contended admission
// ---------------------------------------------------------------------------

#[test]
fn six_contending_borrows_on_five_licenses_without_overage() {
    let c = coordinator(PoolConfig::new(5, 3, 0));
    let (ok, err) = contend(&c, 6);

    assert_eq!(ok.len(), 5);
    assert_eq!(ok.iter().collect::<HashSet<_>>().len(), 5, "lease ids must be distinct");
    assert_eq!(err, vec![AdmissionError::NoCapacity(tool())]);

    let status = c.status(&tool()).unwrap();
    assert_eq!(status.pool.borrowed, 5);
    assert_eq!(status.pool.overage, 0);
    assert_eq!(status.pool.available, 0);
}

#[test]
fn overage_allowance_is_shared_exactly_under_contention() {
    // total 5 + max_overage 1: of seven racing borrows, six fit.
    let c = coordinator(PoolConfig::new(5, 3, 1));
    let (ok, err) = contend(&c, 7);

    assert_eq!(ok.len(), 6);
    assert_eq!(err, vec![AdmissionError::NoCapacity(tool())]);
    let status = c.status(&tool()).unwrap();
    assert_eq!((status.pool.borrowed, status.pool.overage), (6, 1));
}

#[test]
fn never_more_than_total_plus_overage_active() {
    let c = coordinator(PoolConfig::new(8, 2, 3));
    let (ok, err) = contend(&c, 64);
    assert_eq!(ok.len(), 11);
    assert_eq!(err.len(), 53);
    assert_eq!(c.active_lease_count(), 11);
}

#[test]
fn last_slot_goes_to_exactly_one_of_two() {
    for _ in 0..50 {
        let c = coordinator(PoolConfig::new(1, 1, 0));
        let (ok, err) = contend(&c, 2);
        assert_eq!(ok.len(), 1);
        assert_eq!(err.len(), 1);
    }
}

// ---------------------------------------------------------------------------
// 2. Return races
// ---------------------------------------------------------------------------

#[test]
fn concurrent_returns_release_once() {
    let c = coordinator(PoolConfig::new(5, 3, 0));
    let ticket = c.borrow(&tool(), &UserName::new("alice").unwrap()).unwrap();
    let id = ticket.lease.id;

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                c.return_lease(&id)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LeaseError::AlreadyReturned { .. })));
    assert_eq!(c.status(&tool()).unwrap().pool.borrowed, 0);
}

#[test]
fn return_racing_expiry_sweep_releases_once() {
    for _ in 0..50 {
        let c = coordinator(PoolConfig::new(2, 1, 0).with_lease_timeout(Duration::from_secs(60)));
        let ticket = c.borrow_at(&tool(), &UserName::new("alice").unwrap(), at(0)).unwrap();
        let id = ticket.lease.id;
        let barrier = Arc::new(Barrier::new(2));

        let returner = {
            let c = c.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                c.return_lease_at(&id, at(61))
            })
        };
        let sweeper = {
            let c = c.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                c.sweep_at(at(61))
            })
        };

        let returned = returner.join().unwrap();
        let report = sweeper.join().unwrap();
        // Exactly one of the two transitions won.
        assert_ne!(returned.is_ok(), report.expired.len() == 1);
        assert_eq!(c.status(&tool()).unwrap().pool.borrowed, 0);
    }
}

// ---------------------------------------------------------------------------
// 3. Status reads during churn
// ---------------------------------------------------------------------------

#[test]
fn status_never_violates_invariant_during_churn() {
    let c = coordinator(PoolConfig::new(4, 2, 2));
    let workers: Vec<_> = (0..6)
        .map(|i| {
            let c = c.clone();
            thread::spawn(move || {
                let user = UserName::new(format!("worker-{i}")).unwrap();
                for _ in 0..200 {
                    if let Ok(ticket) = c.borrow(&tool(), &user) {
                        c.return_lease(&ticket.lease.id).unwrap();
                    }
                }
            })
        })
        .collect();

    for _ in 0..500 {
        let s = c.status(&tool()).unwrap();
        assert!(s.pool.borrowed <= s.pool.total + s.pool.max_overage);
        assert_eq!(s.pool.overage, s.pool.borrowed.saturating_sub(s.pool.total));
        assert_eq!(s.pool.available, s.pool.total.saturating_sub(s.pool.borrowed));
    }
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(c.status(&tool()).unwrap().pool.borrowed, 0);
}

#[test]
fn pools_of_different_tools_are_independent() {
    let c = LicenseCoordinator::default();
    let names = ["alpha", "beta", "gamma", "delta"];
    for name in names {
        c.configure_tool(&ToolName::new(name).unwrap(), PoolConfig::new(10, 5, 0))
            .unwrap();
    }
    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let c = c.clone();
            let t = ToolName::new(name).unwrap();
            thread::spawn(move || {
                let user = UserName::new("alice").unwrap();
                (0..10).filter(|_| c.borrow(&t, &user).is_ok()).count()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 10);
    }
    assert!(c.statuses().iter().all(|s| s.pool.borrowed == 10));
}
