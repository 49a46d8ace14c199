//! Lease persistence (`leases`).
//!
//! A borrow writes its lease and overage charge in one transaction. Later
//! transitions (heartbeat, return, expiry) overwrite the row with the
//! lease's current state. A terminal row is never overwritten and a
//! heartbeat never moves backwards, so replaying a stale outbox entry
//! cannot undo a newer write.

use std::time::Duration;

use chrono::{DateTime, Utc};
use licd_core::{LeaseId, Timestamp, ToolName, UserName};
use licd_state::{CapacityClass, Lease, LeaseState, OverageCharge};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::corrupt;

/// Journal a new borrow: the lease and, for overage admissions, its charge.
pub async fn record_borrow(
    pool: &PgPool,
    lease: &Lease,
    charge: Option<&OverageCharge>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    upsert(&mut *tx, lease).await?;
    if let Some(charge) = charge {
        super::charges::insert(&mut *tx, charge).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Insert a lease or overwrite it with its current state.
pub async fn upsert<'c>(executor: impl PgExecutor<'c>, lease: &Lease) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO leases (id, tool, holder, capacity_class, state, issued_at,
                             last_heartbeat, expires_at, timeout_secs, ended_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (id) DO UPDATE SET
             state = EXCLUDED.state,
             last_heartbeat = EXCLUDED.last_heartbeat,
             expires_at = EXCLUDED.expires_at,
             ended_at = EXCLUDED.ended_at
         WHERE leases.state = 'ACTIVE'
           AND EXCLUDED.last_heartbeat >= leases.last_heartbeat",
    )
    .bind(lease.id.as_uuid())
    .bind(lease.tool.as_str())
    .bind(lease.user.as_str())
    .bind(lease.class.as_str())
    .bind(lease.state.as_str())
    .bind(lease.issued_at.as_datetime())
    .bind(lease.last_heartbeat.as_datetime())
    .bind(lease.expires_at.as_datetime())
    .bind(i64::try_from(lease.timeout.as_secs()).unwrap_or(i64::MAX))
    .bind(lease.ended_at.map(|t| *t.as_datetime()))
    .execute(executor)
    .await?;

    Ok(())
}

/// Leases still ACTIVE in the journal, oldest first.
pub async fn load_active(pool: &PgPool) -> Result<Vec<Lease>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LeaseRow>(
        "SELECT id, tool, holder, capacity_class, state, issued_at,
                last_heartbeat, expires_at, timeout_secs, ended_at
         FROM leases WHERE state = 'ACTIVE' ORDER BY issued_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(LeaseRow::into_lease).collect()
}

/// Mark a journalled lease EXPIRED without loading it back into memory.
/// Used at startup for leases whose pool no longer has room.
pub async fn mark_expired(pool: &PgPool, id: &LeaseId, at: Timestamp) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE leases SET state = 'EXPIRED', ended_at = $1 WHERE id = $2 AND state = 'ACTIVE'",
    )
    .bind(at.as_datetime())
    .bind(id.as_uuid())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    id: Uuid,
    tool: String,
    holder: String,
    capacity_class: String,
    state: String,
    issued_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    timeout_secs: i64,
    ended_at: Option<DateTime<Utc>>,
}

impl LeaseRow {
    fn into_lease(self) -> Result<Lease, sqlx::Error> {
        let class: CapacityClass = self
            .capacity_class
            .parse()
            .map_err(|e| corrupt("leases", "capacity_class", e))?;
        let state: LeaseState = self.state.parse().map_err(|e| corrupt("leases", "state", e))?;
        let timeout = u64::try_from(self.timeout_secs)
            .map(Duration::from_secs)
            .map_err(|e| corrupt("leases", "timeout_secs", e))?;

        Ok(Lease {
            id: LeaseId(self.id),
            tool: ToolName::new(&self.tool).map_err(|e| corrupt("leases", "tool", e))?,
            user: UserName::new(&self.holder).map_err(|e| corrupt("leases", "holder", e))?,
            class,
            issued_at: Timestamp::from_utc(self.issued_at),
            last_heartbeat: Timestamp::from_utc(self.last_heartbeat),
            expires_at: Timestamp::from_utc(self.expires_at),
            timeout,
            state,
            ended_at: self.ended_at.map(Timestamp::from_utc),
        })
    }
}
