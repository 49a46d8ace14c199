//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps coordinator, validation and signature errors to HTTP status codes
//! and a JSON envelope. Internal error details never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use licd_crypto::SignatureError;
use licd_state::{AdmissionError, LeaseError, LedgerError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "NO_CAPACITY").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials or signature (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Pool and overage allowance exhausted (409). Distinct code so
    /// clients can tell "retry later" from other conflicts.
    #[error("{0}")]
    NoCapacity(String),

    /// A dependency is not ready (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::NoCapacity(_) => (StatusCode::CONFLICT, "NO_CAPACITY"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Short label used as the `reason` of failure metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) | Self::BadRequest(_) => "invalid_request",
            Self::Unauthorized(_) | Self::Forbidden(_) => "auth",
            Self::Conflict(_) => "conflict",
            Self::NoCapacity(_) => "no_capacity",
            Self::ServiceUnavailable(_) | Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<licd_core::ValidationError> for AppError {
    fn from(err: licd_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        match &err {
            AdmissionError::UnknownTool(_) => Self::NotFound(err.to_string()),
            AdmissionError::NoCapacity(_) => Self::NoCapacity(err.to_string()),
            AdmissionError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<LeaseError> for AppError {
    fn from(err: LeaseError) -> Self {
        match &err {
            LeaseError::NotFound(_) => Self::NotFound(err.to_string()),
            LeaseError::AlreadyReturned { .. } => Self::Conflict(err.to_string()),
            LeaseError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::UnknownTool(_) => Self::NotFound(err.to_string()),
            LedgerError::NoCapacity(_) => Self::NoCapacity(err.to_string()),
            LedgerError::InvalidConfig { .. } => Self::Validation(err.to_string()),
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}
