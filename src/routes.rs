//! Webhook endpoints for the voice platform.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::gateway::{CallEvent, CallGateway};

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct GatewayRouteState {
    pub gateway: Arc<CallGateway>,
}

/// Build the webhook router.
pub fn gateway_routes(state: GatewayRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/departments", get(list_departments))
        .route("/api/calls/{call_id}/events", post(call_event))
        .route("/api/calls/{call_id}", delete(end_call))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "care-gateway"
    }))
}

/// GET /api/departments
///
/// Public department list; no verification or token needed.
async fn list_departments(State(state): State<GatewayRouteState>) -> impl IntoResponse {
    let routing = state.gateway.routing();
    Json(serde_json::json!({
        "departments": routing.department_names(),
        "description": routing.describe_departments(),
    }))
}

/// POST /api/calls/{call_id}/events
///
/// Applies one tool call to the call's verification session.
async fn call_event(
    State(state): State<GatewayRouteState>,
    Path(call_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(rejection) = check_token(&state, &headers) {
        return rejection;
    }

    // Parse errors can quote the offending value, so they never leave here.
    let event: CallEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(call_id = %call_id, category = ?e.classify(), "Rejected malformed call event");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid call event"})),
            )
                .into_response();
        }
    };

    let response = state.gateway.handle(&call_id, event).await;
    (StatusCode::OK, Json(response)).into_response()
}

/// DELETE /api/calls/{call_id}
async fn end_call(
    State(state): State<GatewayRouteState>,
    Path(call_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = check_token(&state, &headers) {
        return rejection;
    }

    if state.gateway.end_call(&call_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No active session for call"})),
        )
            .into_response()
    }
}

/// `Some(401)` when a webhook token is configured and the request doesn't
/// carry it.
fn check_token(state: &GatewayRouteState, headers: &HeaderMap) -> Option<Response> {
    let expected = state.gateway.config().webhook_token.as_ref()?;
    let supplied = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    let matches: bool = supplied
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into();
    if matches {
        return None;
    }

    warn!("Rejected webhook request with missing or invalid token");
    Some(
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Unauthorized"})),
        )
            .into_response(),
    )
}
