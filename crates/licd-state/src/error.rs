//! # Coordinator Errors
//!
//! One enum per component. Every error is returned synchronously to the
//! caller; nothing in the core retries on its own.

use licd_core::{LeaseId, ToolName};
use thiserror::Error;

use crate::lease::LeaseState;

/// Errors raised by the [`LeaseLedger`](crate::LeaseLedger).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The tool was never configured and auto-creation is disabled.
    #[error("unknown tool: {0}")]
    UnknownTool(ToolName),

    /// Both nominal capacity and the overage allowance are exhausted.
    #[error("no licenses available for {0}")]
    NoCapacity(ToolName),

    /// A pool configuration was rejected.
    #[error("invalid configuration for {tool}: {reason}")]
    InvalidConfig {
        /// Tool the configuration was meant for.
        tool: ToolName,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors raised by the [`LeaseManager`](crate::LeaseManager).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// No lease with this ID is known.
    #[error("lease {0} not found")]
    NotFound(LeaseId),

    /// The lease already reached a terminal state.
    #[error("lease {id} is already {state}")]
    AlreadyReturned {
        /// The lease.
        id: LeaseId,
        /// Terminal state it is in.
        state: LeaseState,
    },

    /// The lease table could not accept the write.
    #[error("lease storage failure: {0}")]
    Storage(String),
}

/// Errors raised by the [`AdmissionController`](crate::AdmissionController).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("unknown tool: {0}")]
    UnknownTool(ToolName),

    #[error("no licenses available for {0}")]
    NoCapacity(ToolName),

    /// Capacity was reserved but the lease could not be recorded. The
    /// reservation has been released again.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<LedgerError> for AdmissionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownTool(tool) => Self::UnknownTool(tool),
            LedgerError::NoCapacity(tool) => Self::NoCapacity(tool),
            other @ LedgerError::InvalidConfig { .. } => Self::Storage(other.to_string()),
        }
    }
}

/// Errors raised while loading a tool catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The catalog was not valid YAML or did not match the expected shape.
    #[error("cannot parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The catalog parsed but its entries are inconsistent.
    #[error("invalid catalog: {}", problems.join("; "))]
    Invalid {
        /// Every problem found, one per entry and field.
        problems: Vec<String>,
    },

    /// A validated entry could not be applied to the ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
