//! HTTP surface: Slack Events API and interactivity webhooks

use super::handler::EventHandler;
use super::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use super::types::{EventEnvelope, InnerEvent, InteractionForm, InteractionPayload};
use crate::metrics::METRICS;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Set by Slack when it re-delivers an event it thinks was not acknowledged
const RETRY_NUM_HEADER: &str = "x-slack-retry-num";

/// Shared state of the webhook routes
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventHandler>,
    pub verifier: SignatureVerifier,
}

/// Build the application router
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/metrics", get(metrics))
        .route("/slack/events", post(slack_events))
        .route("/slack/interactions", post(slack_interactions))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.export_prometheus(),
    )
}

fn verify(state: &AppState, headers: &HeaderMap, body: &[u8], kind: &str) -> Result<(), Response> {
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    state.verifier.verify(timestamp, signature, body).map_err(|e| {
        warn!(kind, error = %e, "rejected Slack request");
        METRICS.record_slack_request(kind, false);
        StatusCode::UNAUTHORIZED.into_response()
    })
}

/// POST /slack/events
async fn slack_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(rejection) = verify(&state, &headers, &body, "events") {
        return rejection;
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "failed to parse event body");
            METRICS.record_slack_request("events", false);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    METRICS.record_slack_request("events", true);

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            Json(serde_json::json!({ "challenge": challenge })).into_response()
        }
        EventEnvelope::EventCallback { event_id, event } => {
            if let Some(retry) = headers.get(RETRY_NUM_HEADER) {
                debug!(event_id = ?event_id, retry = ?retry, "ignoring redelivered event");
                return StatusCode::OK.into_response();
            }
            dispatch_event(&state, event);
            StatusCode::OK.into_response()
        }
        EventEnvelope::Other => StatusCode::OK.into_response(),
    }
}

/// Acknowledge now, handle on a separate task
fn dispatch_event(state: &AppState, event: serde_json::Value) {
    let event: InnerEvent = match serde_json::from_value(event) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "unrecognized event payload");
            return;
        }
    };

    let handler = Arc::clone(&state.handler);
    match event {
        InnerEvent::AppMention(mention) => {
            tokio::spawn(async move {
                if let Err(e) = handler.handle_app_mention(mention).await {
                    error!(error = %e, "failed to handle app mention");
                }
            });
        }
        InnerEvent::Message(message) => {
            tokio::spawn(async move {
                if let Err(e) = handler.handle_message(message).await {
                    error!(error = %e, "failed to handle message event");
                }
            });
        }
        InnerEvent::Other => debug!("ignoring event"),
    }
}

/// POST /slack/interactions
async fn slack_interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = verify(&state, &headers, &body, "interactions") {
        return rejection;
    }

    let payload = serde_urlencoded::from_bytes::<InteractionForm>(&body)
        .map_err(|e| e.to_string())
        .and_then(|form| {
            serde_json::from_str::<InteractionPayload>(&form.payload).map_err(|e| e.to_string())
        });

    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to parse interaction payload");
            METRICS.record_slack_request("interactions", false);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    METRICS.record_slack_request("interactions", true);

    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        if let Err(e) = handler.handle_block_actions(payload).await {
            error!(error = %e, "failed to handle block actions");
        }
    });

    StatusCode::OK.into_response()
}
