//! REST routes served alongside the WebSocket gateway.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use gymcast_core::{ActivityEvent, ActivityKind, ChannelId};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::server::AppState;

/// Body of `POST /api/gyms/{gymId}/activity`.
#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    /// `checkin` or `checkout` (hyphenated spellings accepted).
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Subject of the activity.
    pub member: Value,
}

/// GET /
pub async fn welcome() -> Json<Value> {
    Json(json!({
        "message": "gymcast real-time activity server",
        "version": env!("CARGO_PKG_VERSION"),
        "websocket": "/ws",
        "health": "/api/health",
    }))
}

/// POST /api/gyms/{gymId}/activity
///
/// Publishes a check-in/check-out to every client in the gym's channel.
/// Called after the caller has committed its own state change.
pub async fn publish_activity(
    State(state): State<AppState>,
    Path(gym_id): Path<String>,
    body: Result<Json<ActivityRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let channel = match ChannelId::parse(&gym_id) {
        Ok(channel) => channel,
        Err(e) => return bad_request(&e.to_string()),
    };
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(&rejection.body_text()),
    };
    if request.member.is_null() {
        return bad_request("member is required");
    }

    let event = ActivityEvent::now(request.kind, channel, request.member);
    let report = state.bridge.publish(&event).await;
    debug!(gym_id = %event.channel, recipients = report.recipients, "activity accepted");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::to_value(report).unwrap_or_default()),
    )
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}
