//! Axum server for the orchestrator endpoints.

use std::sync::Arc;

use axum::extract::{RawForm, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use voiceloop_core::config::OrchestratorConfig;

use crate::token::TokenIssuer;
use crate::webhook::{
    dial_xml, identity_for_caller, room_for_call, verify_webhook_signature, VoiceWebhookForm,
};

/// Header carrying the webhook body signature.
const SIGNATURE_HEADER: &str = "x-telephony-signature";

pub struct OrchestratorState {
    issuer: TokenIssuer,
    sip_ingress_host: String,
    webhook_secret: Option<String>,
}

impl OrchestratorState {
    /// Build state from config. Missing signing credentials are fatal — the
    /// service refuses to start rather than issue unsigned grants.
    pub fn from_config(config: &OrchestratorConfig) -> anyhow::Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("orchestrator API key must be set"))?;
        let api_secret = config
            .resolve_api_secret()
            .ok_or_else(|| anyhow::anyhow!("orchestrator API secret must be set"))?;

        Ok(Self {
            issuer: TokenIssuer::new(api_key, api_secret, config.token_ttl_secs),
            sip_ingress_host: config.sip_ingress_host.clone(),
            webhook_secret: config.resolve_webhook_secret(),
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/token", post(token_handler))
            .route("/telephony/voice", post(voice_webhook_handler))
            .route("/health", get(health_handler))
            .route("/", get(root_handler))
            .with_state(self)
    }
}

/// Start the orchestrator service.
pub async fn start_orchestrator(config: &OrchestratorConfig, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(OrchestratorState::from_config(config)?);
    let app = state.router();

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Orchestrator listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub room: String,
    pub identity: String,
    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default = "default_true")]
    pub subscribe: bool,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}

async fn token_handler(
    State(state): State<Arc<OrchestratorState>>,
    Json(req): Json<TokenRequest>,
) -> impl IntoResponse {
    match state.issuer.issue(
        &req.room,
        &req.identity,
        req.publish,
        req.subscribe,
        req.metadata.as_deref(),
        req.ttl_seconds,
    ) {
        Ok(token) => {
            let ttl = req.ttl_seconds.unwrap_or(state.issuer.default_ttl_secs());
            Json(json!({ "token": token, "ttl": ttl })).into_response()
        }
        Err(e) => {
            warn!("token issue failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "token_issue_failed" })),
            )
                .into_response()
        }
    }
}

async fn voice_webhook_handler(
    State(state): State<Arc<OrchestratorState>>,
    headers: HeaderMap,
    RawForm(body): RawForm,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_webhook_signature(state.webhook_secret.as_deref(), &body, signature) {
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }

    let form: VoiceWebhookForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => {
            warn!("bad webhook form: {e}");
            return (StatusCode::BAD_REQUEST, "bad form").into_response();
        }
    };

    let room = room_for_call(&form.call_sid);
    let identity = identity_for_caller(&form.from, &form.call_sid);

    let token = match state.issuer.issue(&room, &identity, true, true, None, None) {
        Ok(token) => token,
        Err(e) => {
            warn!("token issue failed: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "token issue failed").into_response();
        }
    };

    info!(room = %room, identity = %identity, "inbound call bridged");
    let xml = dial_xml(&room, &state.sip_ingress_host, &token);
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "orchestrator",
        "endpoints": ["/token", "/telephony/voice", "/health"],
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
