//! HTTP surface: webhook verification and delivery intake.
//!
//! The POST handler acknowledges immediately and hands each message to the
//! orchestrator on a detached task; WhatsApp redelivers on slow responses,
//! so nothing slow may run on the request path.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::channels::whatsapp::parse_webhook;
use crate::pipeline::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub verify_token: Arc<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "arogya is active" }))
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Meta's subscription handshake: echo the challenge when the mode and
/// token match, 403 otherwise.
fn check_subscription<'a>(
    params: &'a HashMap<String, String>,
    expected_token: &str,
) -> Option<&'a str> {
    let mode = params.get("hub.mode").map(String::as_str)?;
    let token = params.get("hub.verify_token").map(String::as_str)?;
    let challenge = params.get("hub.challenge").map(String::as_str)?;

    (mode == "subscribe" && token == expected_token).then_some(challenge)
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match check_subscription(&params, &state.verify_token) {
        Some(challenge) => {
            info!("Webhook verified");
            (StatusCode::OK, challenge.to_string())
        }
        None => (StatusCode::FORBIDDEN, "Verification failed".to_string()),
    }
}

async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let messages = parse_webhook(&payload);
    debug!(count = messages.len(), "Webhook delivery parsed");

    for message in messages {
        let orchestrator = Arc::clone(&state.orchestrator);
        tokio::spawn(async move {
            orchestrator.handle(message).await;
        });
    }

    StatusCode::OK
}
