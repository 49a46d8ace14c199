//! # Budget Configuration API
//!
//! Read and upsert per-tool limits and prices at runtime. A PUT that would
//! leave the current `borrowed` outside the new ceiling is rejected.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use licd_core::ToolName;
use licd_state::{PoolConfig, ToolLicensePool};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::journal::JournalEntry;
use crate::state::AppState;
use crate::telemetry;

/// Configuration and current usage of one tool.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BudgetEntry {
    pub tool: String,
    pub total: u32,
    pub commit: u32,
    pub max_overage: u32,
    pub commit_price: f64,
    pub overage_price_per_license: f64,
    /// Per-tool lease timeout; absent means the server default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_timeout_secs: Option<u64>,
    pub borrowed: u32,
}

impl From<ToolLicensePool> for BudgetEntry {
    fn from(pool: ToolLicensePool) -> Self {
        Self {
            tool: pool.tool.to_string(),
            total: pool.total,
            commit: pool.commit,
            max_overage: pool.max_overage,
            commit_price: pool.commit_price,
            overage_price_per_license: pool.overage_price_per_license,
            lease_timeout_secs: pool.lease_timeout.map(|t| t.as_secs()),
            borrowed: pool.borrowed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BudgetResponse {
    pub tools: Vec<BudgetEntry>,
}

/// Create or reconfigure one tool's pool.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BudgetUpdate {
    pub tool: String,
    pub total: u32,
    pub commit: u32,
    #[serde(default)]
    pub max_overage: u32,
    #[serde(default)]
    pub commit_price: f64,
    #[serde(default)]
    pub overage_price_per_license: f64,
    pub lease_timeout_secs: Option<u64>,
}

impl Validate for BudgetUpdate {
    fn validate(&self) -> Result<(), String> {
        ToolName::new(&self.tool).map_err(|e| e.to_string())?;
        match self.pool_config().problems().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }
}

impl BudgetUpdate {
    fn pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new(self.total, self.commit, self.max_overage)
            .with_prices(self.commit_price, self.overage_price_per_license);
        match self.lease_timeout_secs {
            Some(secs) => config.with_lease_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/config/budget", get(get_budget).put(put_budget))
}

/// GET /config/budget — Every tool's configuration, ordered by name.
#[utoipa::path(
    get,
    path = "/config/budget",
    responses(
        (status = 200, description = "Budget configuration", body = BudgetResponse),
    ),
    tag = "config"
)]
pub async fn get_budget(State(state): State<AppState>) -> Json<BudgetResponse> {
    Json(BudgetResponse {
        tools: state
            .coordinator
            .pools()
            .into_iter()
            .map(BudgetEntry::from)
            .collect(),
    })
}

/// PUT /config/budget — Upsert one tool's configuration.
#[utoipa::path(
    put,
    path = "/config/budget",
    request_body = BudgetUpdate,
    responses(
        (status = 200, description = "Tool configured", body = BudgetEntry),
        (status = 422, description = "Invalid configuration", body = crate::error::ErrorBody),
    ),
    tag = "config"
)]
pub async fn put_budget(
    State(state): State<AppState>,
    body: Result<Json<BudgetUpdate>, JsonRejection>,
) -> Result<Json<BudgetEntry>, AppError> {
    let req = extract_validated_json(body)?;
    let tool = ToolName::new(&req.tool)?;
    let config = req.pool_config();

    let pool = state.coordinator.configure_tool(&tool, config)?;
    telemetry::record_pool(&pool);
    state.journal(JournalEntry::pool(&pool)).await;

    Ok(Json(BudgetEntry::from(pool)))
}
