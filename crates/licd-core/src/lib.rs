//! # licd-core — Foundational Types for the License Coordinator
//!
//! Leaf crate of the licd workspace. Defines the identifier newtypes and
//! the timestamp type shared by the coordinator core, the HTTP service,
//! and the operator CLI. It depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ToolName`, `UserName`,
//!    `LeaseId`, `ChargeId`. A lease ID cannot be passed where a charge ID
//!    is expected, and a tool name is validated once at the boundary.
//!
//! 2. **UTC-only timestamps.** `Timestamp` is always UTC, millisecond
//!    precision, rendered as RFC 3339 with a `Z` suffix.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `licd-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{ChargeId, LeaseId, ToolName, UserName, MAX_NAME_LEN};
pub use temporal::Timestamp;
