use uuid::Uuid;

/// Domain-level error kinds shared by every slidemill crate.
///
/// The API layer maps each variant onto a stable wire code, so variants
/// must stay in sync with the public error contract.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable kind for this error, used verbatim in API
    /// responses and in job failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Invalid(_) => "INVALID",
            CoreError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}
