//! # Bearer Authentication Middleware
//!
//! When `AUTH_TOKEN` is configured every API route requires
//! `Authorization: Bearer <token>`. The presented key is stored in request
//! extensions as an [`ApiKey`] so the borrow handler can fold it into the
//! request-signature payload. With no token configured, requests pass and
//! any bearer value the client sent is still recorded.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use licd_crypto::constant_time_eq;

use crate::error::{ErrorBody, ErrorDetail};

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── ApiKey ──────────────────────────────────────────────────────────────────

/// The bearer key presented with the request, if any.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(pub Option<String>);

impl ApiKey {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ApiKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ApiKey>().cloned().unwrap_or_default())
    }
}

/// Parsed `Authorization` header.
enum Presented<'a> {
    Missing,
    Bearer(&'a str),
    OtherScheme,
}

fn presented(headers: &HeaderMap) -> Presented<'_> {
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        None => Presented::Missing,
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) => Presented::Bearer(token.trim()),
            None => Presented::OtherScheme,
        },
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected = request
        .extensions()
        .get::<AuthConfig>()
        .and_then(|c| c.token.clone());

    let key = match (presented(request.headers()), expected) {
        (Presented::Bearer(token), Some(expected)) => {
            if !constant_time_eq(token, &expected) {
                tracing::warn!("authentication failed: invalid bearer token");
                return unauthorized_response("invalid bearer token");
            }
            Some(token.to_string())
        }
        (Presented::OtherScheme, Some(_)) => {
            tracing::warn!("authentication failed: non-Bearer authorization scheme");
            return unauthorized_response("authorization header must use Bearer scheme");
        }
        (Presented::Missing, Some(_)) => {
            tracing::warn!("authentication failed: missing authorization header");
            return unauthorized_response("missing authorization header");
        }
        (Presented::Bearer(token), None) => Some(token.to_string()),
        (_, None) => None,
    };

    request.extensions_mut().insert(ApiKey(key));
    next.run(request).await
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
