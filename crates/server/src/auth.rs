use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::AppState;
use crate::errors::ServerError;

pub const API_KEY_HEADER: &str = "api-key";

/// Rejects requests whose `api-key` header does not match the configured
/// key. Without a configured key every request passes.
pub async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(expected) = state.api_key.as_deref() {
        let given = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            return Err(ServerError::new(StatusCode::UNAUTHORIZED, "invalid api key"));
        }
    }
    Ok(next.run(request).await)
}
