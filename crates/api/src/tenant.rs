//! Tenant extraction for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use slidemill_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the caller's opaque tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// The opaque tenant id attached to a request.
///
/// Read from the `X-Tenant-ID` header; `EventSource` clients cannot set
/// headers, so a `tenant` query parameter is accepted as a fallback on
/// any route. Use this as an extractor parameter in any handler that
/// touches tenant-owned entities:
///
/// ```ignore
/// async fn my_handler(Tenant(tenant): Tenant) -> AppResult<Json<()>> {
///     tracing::info!(tenant, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Tenant(pub String);

impl FromRequestParts<AppState> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return Ok(Tenant(value.to_string()));
        }

        if let Some(value) = query_param(parts.uri.query(), "tenant") {
            return Ok(Tenant(value));
        }

        Err(AppError::Core(CoreError::Invalid(
            "X-Tenant-ID header is required".to_string(),
        )))
    }
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}
