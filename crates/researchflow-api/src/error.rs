use axum::{Json, http::StatusCode, response::IntoResponse};
use researchflow_core::PhaseError;
use serde::Serialize;
use std::fmt;

/// Error returned by handlers. The body never carries internal causes; those
/// are logged where the error is raised.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: String,
    detail: String,
    retryable: Option<bool>,
    correlation_id: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: detail.into(),
            retryable: None,
            correlation_id: None,
        }
    }

    pub fn validation(detail: impl ToString) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ValidationError",
            detail.to_string(),
        )
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalServerError",
            "An unexpected error occurred.",
        )
    }

    /// A failed research run, reported with the shared sanitized wording.
    pub fn research_failed(err: &PhaseError, correlation_id: impl Into<String>) -> Self {
        let safe = err.sanitized();
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            error: err.kind().to_string(),
            detail: safe.message.to_string(),
            retryable: Some(safe.retryable),
            correlation_id: Some(correlation_id.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            error: self.error,
            detail: self.detail,
            retryable: self.retryable,
            correlation_id: self.correlation_id,
        };
        (self.status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = %researchflow_core::logging::scrub(&error), "unexpected handler error");
        Self::internal()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.detail)
    }
}

impl std::error::Error for AppError {}
