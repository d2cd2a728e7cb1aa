//! Orchestrator integration tests — start a real server and hit it over HTTP.
//!
//! Run with: `cargo test -p voiceloop-orchestrator --test integration`

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use voiceloop_core::config::OrchestratorConfig;
use voiceloop_orchestrator::{OrchestratorState, TokenIssuer};

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(webhook_secret: Option<&str>) -> OrchestratorConfig {
    OrchestratorConfig {
        api_key: Some("test-key".into()),
        api_secret: Some("test-secret".into()),
        webhook_secret: webhook_secret.map(|s| s.to_string()),
        ..Default::default()
    }
}

async fn start_test_server(config: OrchestratorConfig) -> u16 {
    let port = find_free_port();
    let state = Arc::new(OrchestratorState::from_config(&config).unwrap());
    let app = state.router();

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    // Wait for the server to come up
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    port
}

#[tokio::test]
async fn test_missing_credentials_refuse_to_start() {
    let config = OrchestratorConfig::default();
    assert!(OrchestratorState::from_config(&config).is_err());
}

#[tokio::test]
async fn test_health() {
    let port = start_test_server(test_config(None)).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_token_endpoint_issues_verifiable_grant() {
    let port = start_test_server(test_config(None)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/token"))
        .json(&serde_json::json!({
            "room": "call-42",
            "identity": "caller-1",
            "ttl_seconds": 120,
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ttl"], 120);

    let issuer = TokenIssuer::new("test-key".into(), "test-secret".into(), 60);
    let claims = issuer.decode(body["token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.video.room, "call-42");
    assert_eq!(claims.sub, "caller-1");
    assert!(claims.video.can_publish);
}

#[tokio::test]
async fn test_voice_webhook_returns_dial_xml() {
    let port = start_test_server(test_config(None)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/telephony/voice"))
        .form(&[("CallSid", "CAdeadbeef"), ("From", "+15551234567")])
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/xml"
    );

    let xml = resp.text().await.unwrap();
    assert!(xml.contains("room-call-CAdeadbeef@sip.example.com"));
    assert!(xml.contains("<Dial>"));
}

#[tokio::test]
async fn test_voice_webhook_rejects_bad_signature() {
    let port = start_test_server(test_config(Some("hook-secret"))).await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/telephony/voice");

    // No signature header
    let resp = client
        .post(&url)
        .form(&[("CallSid", "CA1")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Correct signature over the exact body
    let body = "CallSid=CA1";
    let mut mac = Hmac::<Sha256>::new_from_slice(b"hook-secret").unwrap();
    mac.update(body.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());

    let resp = client
        .post(&url)
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-telephony-signature", sig)
        .body(body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
}
