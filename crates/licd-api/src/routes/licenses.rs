//! # License Operations API
//!
//! Borrow, return, heartbeat and status. A borrow runs, in order: body
//! validation, request-signature verification, admission, and the journal
//! write. If the journal write fails the admission is rolled back and the
//! request fails, so a borrow is all-or-nothing.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use licd_core::{LeaseId, Timestamp, ToolName, UserName};
use licd_crypto::{SignedBorrow, Verification};
use licd_state::{Lease, ToolStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::ApiKey;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::journal::JournalEntry;
use crate::state::AppState;
use crate::telemetry;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const VENDOR_HEADER: &str = "x-vendor-id";

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Request to borrow one license.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BorrowRequest {
    pub tool: String,
    pub user: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BorrowResponse {
    /// Lease ID to pass to return and heartbeat.
    pub id: Uuid,
    pub tool: String,
    pub user: String,
    pub borrowed_at: String,
    pub expires_at: String,
    /// `commit`, `plain` or `overage`.
    pub capacity_class: String,
}

/// Request naming a lease.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LeaseRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReturnResponse {
    pub status: String,
    pub tool: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatResponse {
    pub id: Uuid,
    pub tool: String,
    pub last_heartbeat: String,
    pub expires_at: String,
}

/// Point-in-time view of one tool's pool.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub tool: String,
    pub total: u32,
    pub borrowed: u32,
    pub available: u32,
    pub commit: u32,
    pub max_overage: u32,
    pub overage: u32,
    /// `borrowed <= commit`.
    pub in_commit: bool,
    pub commit_price: f64,
    pub overage_price_per_license: f64,
    /// Number of overage charges recorded for the tool.
    pub overage_borrows: u64,
    pub current_overage_cost: f64,
    pub total_cost: f64,
}

impl From<ToolStatus> for StatusResponse {
    fn from(status: ToolStatus) -> Self {
        let pool = status.pool;
        Self {
            tool: pool.tool.to_string(),
            total: pool.total,
            borrowed: pool.borrowed,
            available: pool.available,
            commit: pool.commit,
            max_overage: pool.max_overage,
            overage: pool.overage,
            in_commit: pool.in_commit,
            commit_price: pool.commit_price,
            overage_price_per_license: pool.overage_price_per_license,
            overage_borrows: status.overage_borrows,
            current_overage_cost: status.current_overage_cost,
            total_cost: status.total_cost,
        }
    }
}

impl From<&Lease> for BorrowResponse {
    fn from(lease: &Lease) -> Self {
        Self {
            id: *lease.id.as_uuid(),
            tool: lease.tool.to_string(),
            user: lease.user.to_string(),
            borrowed_at: lease.issued_at.to_rfc3339(),
            expires_at: lease.expires_at.to_rfc3339(),
            capacity_class: lease.class.to_string(),
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/licenses/borrow", post(borrow_license))
        .route("/licenses/return", post(return_license))
        .route("/licenses/heartbeat", post(heartbeat_lease))
        .route("/licenses/status", get(all_statuses))
        .route("/licenses/{tool}/status", get(tool_status))
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /licenses/borrow — Borrow one license of a tool.
#[utoipa::path(
    post,
    path = "/licenses/borrow",
    request_body = BorrowRequest,
    params(
        ("X-Signature" = Option<String>, Header, description = "HMAC-SHA256 of tool|user|timestamp[|api_key], hex"),
        ("X-Timestamp" = Option<String>, Header, description = "Unix seconds the signature was made at"),
        ("X-Vendor-ID" = Option<String>, Header, description = "Vendor whose secret signed the request"),
    ),
    responses(
        (status = 200, description = "License borrowed", body = BorrowResponse),
        (status = 401, description = "Bad bearer token or signature", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown tool", body = crate::error::ErrorBody),
        (status = 409, description = "No licenses available", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid tool or user", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub async fn borrow_license(
    State(state): State<AppState>,
    api_key: ApiKey,
    headers: HeaderMap,
    body: Result<Json<BorrowRequest>, JsonRejection>,
) -> Result<Json<BorrowResponse>, AppError> {
    let started = Instant::now();
    let req = extract_json(body)?;

    match admit(&state, &api_key, &headers, &req).await {
        Ok((lease, label)) => {
            telemetry::borrow_attempt(&label);
            telemetry::borrow_success(&lease.tool, lease.class, started.elapsed());
            if let Ok(pool) = state.coordinator.pool(&lease.tool) {
                telemetry::record_pool(&pool);
            }
            Ok(Json(BorrowResponse::from(&lease)))
        }
        Err((err, label)) => {
            telemetry::borrow_attempt(&label);
            telemetry::borrow_failure(&label, err.reason());
            match &err {
                AppError::NoCapacity(_) => {
                    tracing::warn!(tool = %req.tool, user = %req.user, "borrow denied: no capacity")
                }
                AppError::Unauthorized(reason) => {
                    tracing::warn!(tool = %req.tool, reason = %reason, "borrow rejected: signature")
                }
                _ => {}
            }
            Err(err)
        }
    }
}

/// Metric label for a tool: its name once it is a known pool, otherwise
/// `unknown`, so arbitrary request strings never become label values.
fn tool_label(state: &AppState, tool: Option<&ToolName>) -> String {
    match tool {
        Some(t) if state.coordinator.status(t).is_ok() => t.to_string(),
        _ => "unknown".to_string(),
    }
}

async fn admit(
    state: &AppState,
    api_key: &ApiKey,
    headers: &HeaderMap,
    req: &BorrowRequest,
) -> Result<(Lease, String), (AppError, String)> {
    let tool = ToolName::new(&req.tool)
        .map_err(|e| (AppError::from(e), tool_label(state, None)))?;
    let fail = |err: AppError| (err, tool_label(state, Some(&tool)));
    let user = UserName::new(&req.user).map_err(|e| fail(e.into()))?;

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let signed = SignedBorrow {
        tool: &req.tool,
        user: &req.user,
        signature: header(SIGNATURE_HEADER),
        timestamp: header(TIMESTAMP_HEADER),
        vendor_id: header(VENDOR_HEADER),
        api_key: api_key.as_deref(),
    };
    match state
        .verifier
        .verify(&signed, Timestamp::now().epoch_secs())
        .map_err(|e| fail(e.into()))?
    {
        Verification::Verified { vendor_id } => {
            tracing::debug!(tool = %tool, vendor_id = %vendor_id, "borrow signature verified")
        }
        Verification::Unsigned => {}
    }

    let ticket = state
        .coordinator
        .borrow(&tool, &user)
        .map_err(|e| fail(e.into()))?;

    if let Some(pool) = &state.db_pool {
        if let Err(e) =
            crate::db::leases::record_borrow(pool, &ticket.lease, ticket.charge.as_ref()).await
        {
            tracing::error!(lease_id = %ticket.lease.id, tool = %tool, error = %e, "failed to journal borrow");
            state.coordinator.rollback_borrow(&ticket);
            return Err(fail(AppError::Internal(
                "borrow could not be journalled and was rolled back".to_string(),
            )));
        }
    }

    let label = tool.to_string();
    Ok((ticket.lease, label))
}

fn parse_lease_id(raw: &str) -> Result<LeaseId, AppError> {
    Ok(raw.parse::<LeaseId>()?)
}

/// POST /licenses/return — Return a borrowed license.
#[utoipa::path(
    post,
    path = "/licenses/return",
    request_body = LeaseRequest,
    responses(
        (status = 200, description = "License returned", body = ReturnResponse),
        (status = 404, description = "Unknown lease", body = crate::error::ErrorBody),
        (status = 409, description = "Lease already returned or expired", body = crate::error::ErrorBody),
        (status = 422, description = "Malformed lease ID", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub async fn return_license(
    State(state): State<AppState>,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> Result<Json<ReturnResponse>, AppError> {
    let req = extract_json(body)?;
    let id = parse_lease_id(&req.id)?;

    let lease = state.coordinator.return_lease(&id)?;
    telemetry::lease_returned(&lease.tool);
    if let Ok(pool) = state.coordinator.pool(&lease.tool) {
        telemetry::record_pool(&pool);
    }
    let tool = lease.tool.to_string();
    state.journal(JournalEntry::Lease(lease)).await;

    Ok(Json(ReturnResponse {
        status: "ok".to_string(),
        tool,
    }))
}

/// POST /licenses/heartbeat — Keep a lease alive.
#[utoipa::path(
    post,
    path = "/licenses/heartbeat",
    request_body = LeaseRequest,
    responses(
        (status = 200, description = "Lease refreshed", body = HeartbeatResponse),
        (status = 404, description = "Unknown lease", body = crate::error::ErrorBody),
        (status = 409, description = "Lease already returned or expired", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub async fn heartbeat_lease(
    State(state): State<AppState>,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let req = extract_json(body)?;
    let id = parse_lease_id(&req.id)?;

    let lease = state.coordinator.heartbeat(&id)?;
    let response = HeartbeatResponse {
        id: *lease.id.as_uuid(),
        tool: lease.tool.to_string(),
        last_heartbeat: lease.last_heartbeat.to_rfc3339(),
        expires_at: lease.expires_at.to_rfc3339(),
    };
    state.journal(JournalEntry::Lease(lease)).await;
    Ok(Json(response))
}

/// GET /licenses/status — Status of every tool, ordered by name.
#[utoipa::path(
    get,
    path = "/licenses/status",
    responses(
        (status = 200, description = "All tool statuses", body = Vec<StatusResponse>),
    ),
    tag = "licenses"
)]
pub async fn all_statuses(State(state): State<AppState>) -> Json<Vec<StatusResponse>> {
    Json(
        state
            .coordinator
            .statuses()
            .into_iter()
            .map(StatusResponse::from)
            .collect(),
    )
}

/// GET /licenses/{tool}/status — Status of one tool.
#[utoipa::path(
    get,
    path = "/licenses/{tool}/status",
    params(("tool" = String, Path, description = "Tool name")),
    responses(
        (status = 200, description = "Tool status", body = StatusResponse),
        (status = 404, description = "Unknown tool", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub async fn tool_status(
    State(state): State<AppState>,
    Path(tool): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let tool = ToolName::new(&tool)?;
    let status = state.coordinator.status(&tool)?;
    Ok(Json(StatusResponse::from(status)))
}
