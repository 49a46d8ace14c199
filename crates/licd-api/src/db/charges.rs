//! Overage charge persistence (`overage_charges`). Charges are append-only.

use chrono::{DateTime, Utc};
use licd_core::{ChargeId, LeaseId, Timestamp, ToolName, UserName};
use licd_state::OverageCharge;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::corrupt;

pub async fn insert<'c>(
    executor: impl PgExecutor<'c>,
    charge: &OverageCharge,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO overage_charges (id, tool, lease_id, holder, amount, charged_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(charge.id.as_uuid())
    .bind(charge.tool.as_str())
    .bind(charge.lease_id.as_uuid())
    .bind(charge.user.as_str())
    .bind(charge.amount)
    .bind(charge.charged_at.as_datetime())
    .execute(executor)
    .await?;

    Ok(())
}

/// Every stored charge, oldest first.
pub async fn load_all(pool: &PgPool) -> Result<Vec<OverageCharge>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ChargeRow>(
        "SELECT id, tool, lease_id, holder, amount, charged_at
         FROM overage_charges ORDER BY charged_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ChargeRow::into_charge).collect()
}

#[derive(sqlx::FromRow)]
struct ChargeRow {
    id: Uuid,
    tool: String,
    lease_id: Uuid,
    holder: String,
    amount: f64,
    charged_at: DateTime<Utc>,
}

impl ChargeRow {
    fn into_charge(self) -> Result<OverageCharge, sqlx::Error> {
        Ok(OverageCharge {
            id: ChargeId(self.id),
            tool: ToolName::new(&self.tool).map_err(|e| corrupt("overage_charges", "tool", e))?,
            lease_id: LeaseId(self.lease_id),
            user: UserName::new(&self.holder)
                .map_err(|e| corrupt("overage_charges", "holder", e))?,
            charged_at: Timestamp::from_utc(self.charged_at),
            amount: self.amount,
        })
    }
}
