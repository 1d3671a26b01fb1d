//! API error taxonomy and HTTP mapping.
//!
//! Every error surfaced through the HTTP layer is one of these variants.
//! Indexing-run failures are absent on purpose: they are captured into the
//! project's `error` status instead of being raised to the caller.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing request fields, bad path, invalid transition.
    #[error("{0}")]
    Validation(String),

    /// Unknown project id.
    #[error("{0}")]
    NotFound(String),

    /// Fixed-window limit exceeded for the request's endpoint class.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },

    /// Embedding/completion call failed after retries during a query.
    #[error("{0}")]
    Provider(String),

    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Provider(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // An ApiError that travelled through an anyhow layer keeps its
        // status code.
        match err.downcast::<ApiError>() {
            Ok(api) => api,
            Err(err) => Self::Internal(err),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
        }

        match self {
            Self::RateLimited { retry_after } => {
                let body = serde_json::json!({
                    "error": "Rate limit exceeded",
                    "retry_after": retry_after,
                });
                (
                    status,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            other => {
                let body = serde_json::json!({ "error": other.to_string() });
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("missing").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: 10 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Provider("embed failed".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
