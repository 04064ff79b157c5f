//! Session Controller error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Internal details are logged server-side but not exposed to clients.

use crate::config::ConfigError;
use crate::provider::ProviderError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session Controller error type.
///
/// Maps to HTTP status codes:
/// - `Store`, `Config`, `Internal`: 500
/// - `InvalidAmount`, `InvalidFeedback`, `BadRequest`: 400
/// - `InsufficientBalance`: 402
/// - `SessionNotFound`: 404
/// - `Conflict`: 409
/// - `Provider`: 502
/// - `Draining`: 503
#[derive(Debug, Error)]
pub enum ScError {
    /// Ledger persistence failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Ledger amount was zero, negative or not a number.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The user has no credit left; a session cannot start.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// No session exists for the user.
    #[error("Session not found")]
    SessionNotFound,

    /// The request conflicts with the current session state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rating or feedback rejected.
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    /// Malformed request input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The video provider failed in a way the session could not recover from.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Service is shutting down and refuses new sessions.
    #[error("Service is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context (actor channel failures, invariant breaks).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScError::Store(_) | ScError::Config(_) | ScError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ScError::InvalidAmount(_) | ScError::InvalidFeedback(_) | ScError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ScError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ScError::SessionNotFound => StatusCode::NOT_FOUND,
            ScError::Conflict(_) => StatusCode::CONFLICT,
            ScError::Provider(_) => StatusCode::BAD_GATEWAY,
            ScError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns a stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ScError::Store(_) => "STORE_ERROR",
            ScError::InvalidAmount(_) => "INVALID_AMOUNT",
            ScError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ScError::SessionNotFound => "SESSION_NOT_FOUND",
            ScError::Conflict(_) => "CONFLICT",
            ScError::InvalidFeedback(_) => "INVALID_FEEDBACK",
            ScError::BadRequest(_) => "BAD_REQUEST",
            ScError::Provider(_) => "PROVIDER_ERROR",
            ScError::Draining => "DRAINING",
            ScError::Config(_) | ScError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            ScError::Store(_) | ScError::Config(_) | ScError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            ScError::InsufficientBalance => {
                "Your balance is empty, please top up to start a session".to_string()
            }
            ScError::SessionNotFound => "Session not found".to_string(),
            ScError::Provider(_) => {
                "The video service is unavailable, please try again later".to_string()
            }
            ScError::Draining => "Service is shutting down, please try again shortly".to_string(),
            ScError::InvalidAmount(msg)
            | ScError::Conflict(msg)
            | ScError::InvalidFeedback(msg)
            | ScError::BadRequest(msg) => msg.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

impl From<ProviderError> for ScError {
    fn from(err: ProviderError) -> Self {
        ScError::Provider(err.to_string())
    }
}

impl From<ConfigError> for ScError {
    fn from(err: ConfigError) -> Self {
        ScError::Config(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ScError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ScError::Store(err) => {
                tracing::error!(target: "sc.errors", error = %err, "Ledger store operation failed");
            }
            ScError::Internal(err) | ScError::Config(err) => {
                tracing::error!(target: "sc.errors", error = %err, "Internal error");
            }
            ScError::Provider(err) => {
                tracing::warn!(target: "sc.errors", error = %err, "Provider failure surfaced to client");
            }
            _ => {}
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn read_body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ScError::Store("down".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ScError::InvalidAmount("negative".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ScError::InsufficientBalance.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(ScError::SessionNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ScError::Conflict("active".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ScError::Provider("401".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ScError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = ScError::Store("connection refused at 10.0.0.7:6379".to_string());
        assert!(!store_err.client_message().contains("10.0.0.7"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let provider_err = ScError::Provider("api key rejected: pk_live_1".to_string());
        assert!(!provider_err.client_message().contains("pk_live"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ScError::Store("timeout".to_string())),
            "Store error: timeout"
        );
        assert_eq!(
            format!("{}", ScError::InsufficientBalance),
            "Insufficient balance"
        );
    }

    #[test]
    fn test_conversions_keep_detail_server_side() {
        let err = ScError::from(ProviderError::Fatal("status 401 Unauthorized".to_string()));
        assert!(matches!(&err, ScError::Provider(msg) if msg.contains("401")));
        assert_eq!(err.code(), "PROVIDER_ERROR");

        let err = ScError::from(ConfigError::MissingEnvVar("SC_PROVIDER_URL".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[tokio::test]
    async fn test_into_response_body_shape() {
        let response = ScError::InsufficientBalance.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let body = read_body_json(response).await;
        assert_eq!(body["error"]["code"], "INSUFFICIENT_BALANCE");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("top up"));
    }
}
