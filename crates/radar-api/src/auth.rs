use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use radar_domain::PollerId;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity header edge components present on ingest calls. In production
/// the transport layer stamps it from the peer certificate / SVID; the
/// allowed-pollers gate below is what actually admits or rejects.
pub const POLLER_ID_HEADER: &str = "x-poller-id";

/// Axum middleware that requires a valid `Authorization: Bearer <token>` header.
///
/// Returns 401 for missing, malformed, or incorrect tokens.
/// Applied to all routes; there are no public endpoints.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.auth_token.as_str() => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response(),
    }
}

/// Resolve and admit the calling poller. Ingress is rejected for any
/// identity not currently in the allowed set.
pub async fn require_allowed_poller(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<PollerId, ApiError> {
    let poller_id = headers
        .get(POLLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing x-poller-id header"))?;

    if !state.onboarding.allowed().contains(poller_id).await {
        return Err(ApiError::forbidden(format!(
            "poller '{}' is not admitted",
            poller_id
        )));
    }
    Ok(PollerId::new(poller_id))
}
