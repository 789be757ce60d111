use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use slidemill_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON
/// error responses with stable `code` strings.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `slidemill_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => {
                let status = match core {
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                    CoreError::Conflict(_) | CoreError::LimitExceeded(_) => StatusCode::CONFLICT,
                    CoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                    CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match core {
                    CoreError::Internal(msg) => {
                        tracing::error!(error = %msg, "Internal core error");
                        "An internal error occurred".to_string()
                    }
                    other => other.to_string(),
                };
                (status, core.kind(), message)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
