//! # licd-state — Concurrent License-Lease Coordinator
//!
//! The server-side core behind license borrow, return and status calls.
//! Synchronous and in-memory; the HTTP layer, persistence and timers live
//! in `licd-api`.
//!
//! ## Components
//!
//! - **Lease Ledger** (`ledger.rs`): per-tool counters, one lock per tool.
//!   `reserve` is the only place capacity is taken.
//!
//! - **Admission Controller** (`admission.rs`): commit → plain → overage →
//!   deny, then mints the lease and any overage charge.
//!
//! - **Lease Lifecycle Manager** (`lifecycle.rs`, `lease.rs`): lease table,
//!   heartbeat, check-and-set return/expiry, reclamation sweep.
//!
//! - **Status Reporter** (`status.rs`): consistent per-pool snapshots,
//!   ordered by tool name, with cost figures.
//!
//! - **Charge book** (`billing.rs`) and **tool catalog** (`catalog.rs`).
//!
//! `LicenseCoordinator` (`coordinator.rs`) wires them together.
//!
//! ## Locking
//!
//! Pool locks and the lease-table lock are never held at the same time.
//! Admission takes a pool lock, then the table lock; return and expiry
//! take the table lock, then a pool lock. Neither path nests them.

pub mod admission;
pub mod billing;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod lease;
pub mod ledger;
pub mod lifecycle;
pub mod pool;
pub mod status;

pub use admission::{AdmissionController, LeaseTicket};
pub use billing::{ChargeBook, OverageCharge};
pub use catalog::{CatalogEntry, ToolCatalog};
pub use coordinator::{
    CoordinatorConfig, LicenseCoordinator, DEFAULT_LEASE_TIMEOUT, DEFAULT_MAX_LEASES,
    DEFAULT_TERMINAL_RETENTION,
};
pub use error::{AdmissionError, CatalogError, LeaseError, LedgerError};
pub use lease::{Lease, LeaseState};
pub use ledger::{LeaseLedger, Reservation};
pub use lifecycle::{LeaseManager, SweepReport};
pub use pool::{CapacityClass, PoolConfig, ToolLicensePool};
pub use status::{StatusReporter, ToolStatus};
