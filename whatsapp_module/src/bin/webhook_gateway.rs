//! Ingress receiver: verifies the transport signature and enqueues the raw
//! webhook payload verbatim, returning before any business processing.

use std::env;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::{error, info, warn};

use whatsapp_module::event_queue::{build_queue_from_env, EventQueue};
use whatsapp_module::verify::{validate_signature, verify_subscription, SubscriptionRejection};

struct GatewayState {
    queue: Arc<dyn EventQueue>,
    verify_token: Option<String>,
    app_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let host = resolve_env("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = resolve_env("GATEWAY_PORT")
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(9100);

    let queue: Arc<dyn EventQueue> = task::spawn_blocking(build_queue_from_env)
        .await
        .map_err(|err| -> Box<dyn std::error::Error + Send + Sync> { err.into() })??;

    let state = Arc::new(GatewayState {
        queue,
        verify_token: resolve_env("VERIFY_TOKEN"),
        app_secret: resolve_env("APP_SECRET"),
    });
    if state.app_secret.is_none() {
        warn!("APP_SECRET not set, webhook signature verification is disabled");
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook))
        .route("/webhook", post(ingest_webhook))
        .with_state(state);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("webhook gateway listening on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    hub_mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    hub_verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    hub_challenge: Option<String>,
}

/// Subscription handshake: echo the challenge as plain text on success.
async fn verify_webhook(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    match verify_subscription(
        params.hub_mode.as_deref(),
        params.hub_verify_token.as_deref(),
        params.hub_challenge.as_deref(),
        state.verify_token.as_deref(),
    ) {
        Ok(challenge) => (StatusCode::OK, challenge).into_response(),
        Err(SubscriptionRejection::MissingParams) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "Missing parameters"})),
        )
            .into_response(),
        Err(SubscriptionRejection::Mismatch) => {
            info!("webhook verification failed");
            (
                StatusCode::FORBIDDEN,
                Json(json!({"status": "error", "message": "Verification failed"})),
            )
                .into_response()
        }
    }
}

/// Delivery: verify the signature over the raw body, then enqueue the body
/// untouched. Success here only means "queued".
async fn ingest_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok());
    if !validate_signature(&body, signature, state.app_secret.as_deref()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"status": "error", "message": "Invalid signature"})),
        );
    }

    let payload = String::from_utf8_lossy(&body).into_owned();
    let queue = state.queue.clone();
    let enqueued = task::spawn_blocking(move || queue.enqueue(&payload)).await;

    match enqueued {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Ok(Err(err)) => {
            error!("failed to enqueue webhook payload: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Queue sync failed"})),
            )
        }
        Err(err) => {
            error!("enqueue task panicked: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Queue sync failed"})),
            )
        }
    }
}

fn resolve_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
