//! Pool configuration persistence (`tool_pools`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use licd_core::{Timestamp, ToolName};
use licd_state::PoolConfig;
use sqlx::PgPool;

use super::corrupt;

/// Insert or replace a tool's configuration. A write older than the
/// stored one is ignored.
pub async fn upsert(
    pool: &PgPool,
    tool: &ToolName,
    config: &PoolConfig,
    updated_at: Timestamp,
) -> Result<(), sqlx::Error> {
    let timeout = config
        .lease_timeout
        .map(|t| i64::try_from(t.as_secs()).unwrap_or(i64::MAX));

    sqlx::query(
        "INSERT INTO tool_pools (tool, total, commit_licenses, max_overage, commit_price,
                                 overage_price_per_license, lease_timeout_secs, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (tool) DO UPDATE SET
             total = EXCLUDED.total,
             commit_licenses = EXCLUDED.commit_licenses,
             max_overage = EXCLUDED.max_overage,
             commit_price = EXCLUDED.commit_price,
             overage_price_per_license = EXCLUDED.overage_price_per_license,
             lease_timeout_secs = EXCLUDED.lease_timeout_secs,
             updated_at = EXCLUDED.updated_at
         WHERE tool_pools.updated_at <= EXCLUDED.updated_at",
    )
    .bind(tool.as_str())
    .bind(i64::from(config.total))
    .bind(i64::from(config.commit))
    .bind(i64::from(config.max_overage))
    .bind(config.commit_price)
    .bind(config.overage_price_per_license)
    .bind(timeout)
    .bind(updated_at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// A pool configuration as last written.
#[derive(Debug, Clone)]
pub struct StoredPool {
    pub tool: ToolName,
    pub config: PoolConfig,
    pub updated_at: Timestamp,
}

/// Every stored pool, ordered by tool name.
pub async fn load_all(pool: &PgPool) -> Result<Vec<StoredPool>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PoolRow>(
        "SELECT tool, total, commit_licenses, max_overage, commit_price,
                overage_price_per_license, lease_timeout_secs, updated_at
         FROM tool_pools ORDER BY tool",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PoolRow::into_config).collect()
}

#[derive(sqlx::FromRow)]
struct PoolRow {
    tool: String,
    total: i64,
    commit_licenses: i64,
    max_overage: i64,
    commit_price: f64,
    overage_price_per_license: f64,
    lease_timeout_secs: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl PoolRow {
    fn into_config(self) -> Result<StoredPool, sqlx::Error> {
        let count = |column: &str, value: i64| {
            u32::try_from(value).map_err(|e| corrupt("tool_pools", column, e))
        };
        let tool = ToolName::new(&self.tool).map_err(|e| corrupt("tool_pools", "tool", e))?;
        let mut config = PoolConfig::new(
            count("total", self.total)?,
            count("commit_licenses", self.commit_licenses)?,
            count("max_overage", self.max_overage)?,
        )
        .with_prices(self.commit_price, self.overage_price_per_license);
        if let Some(secs) = self.lease_timeout_secs {
            let secs = u64::try_from(secs).map_err(|e| corrupt("tool_pools", "lease_timeout_secs", e))?;
            config = config.with_lease_timeout(Duration::from_secs(secs));
        }
        Ok(StoredPool {
            tool,
            config,
            updated_at: Timestamp::from_utc(self.updated_at),
        })
    }
}
