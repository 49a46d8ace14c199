//! # Lease State Machine
//!
//! ```text
//! Active ──▶ Returned   (explicit return, terminal)
//!    │
//!    └─────▶ Expired    (no heartbeat within timeout, terminal)
//! ```
//!
//! Transitions are check-and-set: each one first requires `Active`, so a
//! racing return and expiry resolve to exactly one winner. The winner is
//! the only caller that releases ledger capacity.

use std::time::Duration;

use licd_core::{LeaseId, Timestamp, ToolName, UserName};
use serde::{Deserialize, Serialize};

use crate::error::LeaseError;
use crate::pool::CapacityClass;

/// The lifecycle state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseState {
    /// Holding one unit of capacity.
    Active,
    /// Reclaimed after its heartbeat lapsed (terminal).
    Expired,
    /// Handed back by its holder (terminal).
    Returned,
}

impl LeaseState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for LeaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "EXPIRED" => Ok(Self::Expired),
            "RETURNED" => Ok(Self::Returned),
            other => Err(format!("unknown lease state {other:?}")),
        }
    }
}

/// A time-bounded grant of one license unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub tool: ToolName,
    pub user: UserName,
    /// Capacity class consumed at admission.
    pub class: CapacityClass,
    pub issued_at: Timestamp,
    pub last_heartbeat: Timestamp,
    /// `last_heartbeat + timeout`.
    pub expires_at: Timestamp,
    /// Silence after which the lease is reclaimable.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub state: LeaseState,
    /// When the lease entered its terminal state.
    pub ended_at: Option<Timestamp>,
}

impl Lease {
    /// A fresh active lease issued at `now`.
    pub fn issue(
        tool: ToolName,
        user: UserName,
        class: CapacityClass,
        timeout: Duration,
        now: Timestamp,
    ) -> Self {
        Self {
            id: LeaseId::new(),
            tool,
            user,
            class,
            issued_at: now,
            last_heartbeat: now,
            expires_at: now.saturating_add(timeout),
            timeout,
            state: LeaseState::Active,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LeaseState::Active
    }

    /// Active and silent for longer than its timeout at `now`.
    pub fn is_lapsed(&self, now: Timestamp) -> bool {
        self.is_active() && now.saturating_since(&self.last_heartbeat) > self.timeout
    }

    /// Terminal, and terminal for at least `retention` at `now`.
    pub fn is_purgeable(&self, now: Timestamp, retention: Duration) -> bool {
        match (self.state.is_terminal(), self.ended_at) {
            (true, Some(ended)) => now.saturating_since(&ended) >= retention,
            _ => false,
        }
    }

    fn require_active(&self) -> Result<(), LeaseError> {
        if self.state.is_terminal() {
            return Err(LeaseError::AlreadyReturned {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Refresh the heartbeat (ACTIVE only).
    pub fn heartbeat(&mut self, now: Timestamp) -> Result<(), LeaseError> {
        self.require_active()?;
        self.last_heartbeat = now;
        self.expires_at = now.saturating_add(self.timeout);
        Ok(())
    }

    /// ACTIVE → RETURNED.
    pub fn mark_returned(&mut self, now: Timestamp) -> Result<(), LeaseError> {
        self.require_active()?;
        self.state = LeaseState::Returned;
        self.ended_at = Some(now);
        Ok(())
    }

    /// ACTIVE → EXPIRED.
    pub fn mark_expired(&mut self, now: Timestamp) -> Result<(), LeaseError> {
        self.require_active()?;
        self.state = LeaseState::Expired;
        self.ended_at = Some(now);
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
