//! # Lease and Charge Listings
//!
//! Read-only views of active leases and recorded overage charges, newest
//! first.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use licd_core::{ToolName, UserName};
use licd_state::{Lease, OverageCharge};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaseView {
    pub id: Uuid,
    pub tool: String,
    pub user: String,
    pub capacity_class: String,
    pub state: String,
    pub borrowed_at: String,
    pub last_heartbeat: String,
    pub expires_at: String,
}

impl From<Lease> for LeaseView {
    fn from(lease: Lease) -> Self {
        Self {
            id: *lease.id.as_uuid(),
            tool: lease.tool.to_string(),
            user: lease.user.to_string(),
            capacity_class: lease.class.to_string(),
            state: lease.state.to_string(),
            borrowed_at: lease.issued_at.to_rfc3339(),
            last_heartbeat: lease.last_heartbeat.to_rfc3339(),
            expires_at: lease.expires_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChargeView {
    pub id: Uuid,
    pub tool: String,
    pub lease_id: Uuid,
    pub user: String,
    pub charged_at: String,
    pub amount: f64,
}

impl From<OverageCharge> for ChargeView {
    fn from(charge: OverageCharge) -> Self {
        Self {
            id: *charge.id.as_uuid(),
            tool: charge.tool.to_string(),
            lease_id: *charge.lease_id.as_uuid(),
            user: charge.user.to_string(),
            charged_at: charge.charged_at.to_rfc3339(),
            amount: charge.amount,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct BorrowsQuery {
    pub user: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChargesQuery {
    pub tool: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/borrows", get(list_borrows))
        .route("/overage-charges", get(list_overage_charges))
}

/// GET /borrows — Active leases, optionally for one user.
#[utoipa::path(
    get,
    path = "/borrows",
    params(("user" = Option<String>, Query, description = "Only leases held by this user")),
    responses(
        (status = 200, description = "Active leases, newest first", body = Vec<LeaseView>),
        (status = 422, description = "Invalid user name", body = crate::error::ErrorBody),
    ),
    tag = "licenses"
)]
pub async fn list_borrows(
    State(state): State<AppState>,
    Query(query): Query<BorrowsQuery>,
) -> Result<Json<Vec<LeaseView>>, AppError> {
    let user = query.user.as_deref().map(UserName::new).transpose()?;
    Ok(Json(
        state
            .coordinator
            .active_leases(user.as_ref())
            .into_iter()
            .map(LeaseView::from)
            .collect(),
    ))
}

/// GET /overage-charges — Recorded overage charges, optionally for one tool.
#[utoipa::path(
    get,
    path = "/overage-charges",
    params(("tool" = Option<String>, Query, description = "Only charges for this tool")),
    responses(
        (status = 200, description = "Overage charges, newest first", body = Vec<ChargeView>),
        (status = 422, description = "Invalid tool name", body = crate::error::ErrorBody),
    ),
    tag = "billing"
)]
pub async fn list_overage_charges(
    State(state): State<AppState>,
    Query(query): Query<ChargesQuery>,
) -> Result<Json<Vec<ChargeView>>, AppError> {
    let tool = query.tool.as_deref().map(ToolName::new).transpose()?;
    Ok(Json(
        state
            .coordinator
            .charges(tool.as_ref())
            .into_iter()
            .map(ChargeView::from)
            .collect(),
    ))
}
