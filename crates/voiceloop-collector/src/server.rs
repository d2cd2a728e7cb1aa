//! Axum server for the collector endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use voiceloop_core::config::MetricsConfig;

use crate::store::{EventStore, MAX_EVENTS_RETURN};

pub type SharedStore = Arc<Mutex<EventStore>>;

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/summary", get(summary_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .with_state(store)
}

/// Start the collector service.
pub async fn start_collector(config: &MetricsConfig) -> anyhow::Result<()> {
    let store: SharedStore = Arc::new(Mutex::new(EventStore::new(config.window_secs)));
    let app = router(store);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Collector listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ingest_handler(
    State(store): State<SharedStore>,
    payload: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(event)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_json" })),
        )
            .into_response();
    };

    let now_ms = Utc::now().timestamp_millis();
    store.lock().await.ingest(now_ms, event);
    Json(json!({ "status": "ok" })).into_response()
}

async fn summary_handler(State(store): State<SharedStore>) -> impl IntoResponse {
    let now_ms = Utc::now().timestamp_millis();
    let mut store = store.lock().await;
    store.prune(now_ms);
    Json(store.summary())
}

async fn events_handler(State(store): State<SharedStore>) -> impl IntoResponse {
    let now_ms = Utc::now().timestamp_millis();
    let mut store = store.lock().await;
    store.prune(now_ms);
    let events = store.recent(MAX_EVENTS_RETURN);
    Json(json!({ "count": events.len(), "events": events }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": Utc::now().timestamp() }))
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "collector",
        "endpoints": ["/ingest", "/summary", "/events", "/health"],
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
