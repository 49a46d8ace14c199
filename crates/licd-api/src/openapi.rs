//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document,
//! served unauthenticated at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Static API key. Set via the AUTH_TOKEN env var."))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "licd — License Coordination Daemon",
        description = "Borrow, return and monitor named software licenses.\n\nEach tool has a pool of `total` licenses, a guaranteed `commit` sub-pool, and an overage allowance of `max_overage` leases beyond `total`. Leases expire when their holder stops sending heartbeats.\n\nAuthentication: `Authorization: Bearer <token>` when the server has AUTH_TOKEN set. Borrows may additionally carry an HMAC-SHA256 signature in `X-Signature`, `X-Timestamp` and `X-Vendor-ID`.",
        license(name = "AGPL-3.0-or-later")
    ),
    servers(
        (url = "http://localhost:8000", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Licenses ─────────────────────────────────────────────────────
        crate::routes::licenses::borrow_license,
        crate::routes::licenses::return_license,
        crate::routes::licenses::heartbeat_lease,
        crate::routes::licenses::all_statuses,
        crate::routes::licenses::tool_status,
        // ── Listings ─────────────────────────────────────────────────────
        crate::routes::borrows::list_borrows,
        crate::routes::borrows::list_overage_charges,
        // ── Budget ───────────────────────────────────────────────────────
        crate::routes::budget::get_budget,
        crate::routes::budget::put_budget,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::licenses::BorrowRequest,
            crate::routes::licenses::BorrowResponse,
            crate::routes::licenses::LeaseRequest,
            crate::routes::licenses::ReturnResponse,
            crate::routes::licenses::HeartbeatResponse,
            crate::routes::licenses::StatusResponse,
            crate::routes::borrows::LeaseView,
            crate::routes::borrows::ChargeView,
            crate::routes::budget::BudgetEntry,
            crate::routes::budget::BudgetResponse,
            crate::routes::budget::BudgetUpdate,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "licenses", description = "License borrow, return, heartbeat and status"),
        (name = "config", description = "Per-tool limits and prices"),
        (name = "billing", description = "Overage charges"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_generates_with_package_version() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "licd — License Coordination Daemon");
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn spec_has_license_paths() {
        let spec = ApiDoc::openapi();
        for path in [
            "/licenses/borrow",
            "/licenses/return",
            "/licenses/heartbeat",
            "/licenses/status",
            "/licenses/{tool}/status",
            "/borrows",
            "/overage-charges",
            "/config/budget",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_declares_bearer_scheme() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components present");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
