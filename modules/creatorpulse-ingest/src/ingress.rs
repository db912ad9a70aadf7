//! Webhook ingress. Verifies the provider signature over the raw body,
//! persists the event, and hands its id to the processing queue. The HTTP
//! response only acknowledges receipt; all real work happens off the
//! request path.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::event::{WebhookEvent, WebhookEventStore, WebhookPayload};
use crate::signature::{verify_signature, SIGNATURE_HEADER};

/// Hands accepted event ids to the processing queue. Implemented by the
/// assembler over whatever queue the deployment runs.
pub trait Enqueuer: Send + Sync {
    fn enqueue(&self, event_id: &str);
}

pub struct IngressState {
    /// Per-provider webhook secrets.
    pub secrets: HashMap<String, String>,
    pub store: Arc<dyn WebhookEventStore>,
    pub enqueuer: Arc<dyn Enqueuer>,
    /// Development tolerates providers without a configured secret.
    pub development: bool,
    pub max_attempts: u32,
}

pub fn webhook_routes(state: Arc<IngressState>) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(receive_webhook))
        .with_state(state)
}

pub async fn receive_webhook(
    State(state): State<Arc<IngressState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.secrets.get(&provider) {
        Some(secret) => {
            let Some(signature) = headers
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
            else {
                warn!(provider, "Webhook rejected: missing signature header");
                return reject(StatusCode::UNAUTHORIZED, "missing signature");
            };
            if !verify_signature(&body, signature, secret) {
                warn!(provider, "Webhook rejected: signature mismatch");
                return reject(StatusCode::UNAUTHORIZED, "invalid signature");
            }
        }
        None if state.development => {
            warn!(provider, "No webhook secret configured; accepting unsigned delivery");
        }
        None => {
            warn!(provider, "Webhook rejected: no secret configured");
            return reject(StatusCode::UNAUTHORIZED, "unknown provider");
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(provider, error = %err, "Webhook rejected: body is not JSON");
            return reject(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };
    let parsed: WebhookPayload = match serde_json::from_value(payload.clone()) {
        Ok(p) => p,
        Err(err) => {
            warn!(provider, error = %err, "Webhook rejected: unrecognized shape");
            return reject(StatusCode::BAD_REQUEST, "malformed payload");
        }
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let event = WebhookEvent::received(
        &provider,
        &parsed.event_type,
        payload,
        signature,
        state.max_attempts,
        Utc::now(),
    );

    if let Err(err) = state.store.insert(&event).await {
        warn!(provider, error = %err, "Failed to persist webhook event");
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "storage failure");
    }
    state.enqueuer.enqueue(&event.id);

    info!(
        provider,
        event_id = %event.id,
        event_type = %event.event_type,
        run_id = %parsed.event_data.actor_run_id,
        "Webhook accepted"
    );
    (
        StatusCode::OK,
        Json(json!({"received": true, "eventId": event.id})),
    )
        .into_response()
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryWebhookEventStore;
    use crate::signature::sign_payload;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEnqueuer {
        ids: Mutex<Vec<String>>,
    }

    impl Enqueuer for RecordingEnqueuer {
        fn enqueue(&self, event_id: &str) {
            self.ids.lock().expect("enqueuer lock").push(event_id.to_string());
        }
    }

    fn state(
        secret: Option<&str>,
        development: bool,
    ) -> (Arc<IngressState>, Arc<MemoryWebhookEventStore>, Arc<RecordingEnqueuer>) {
        let store = Arc::new(MemoryWebhookEventStore::new());
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let mut secrets = HashMap::new();
        if let Some(s) = secret {
            secrets.insert("apify".to_string(), s.to_string());
        }
        let state = Arc::new(IngressState {
            secrets,
            store: store.clone() as Arc<dyn WebhookEventStore>,
            enqueuer: enqueuer.clone() as Arc<dyn Enqueuer>,
            development,
            max_attempts: 3,
        });
        (state, store, enqueuer)
    }

    fn delivery_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "eventType": "ACTOR.RUN.SUCCEEDED",
            "eventData": {"actorId": "a1", "actorRunId": "r1"},
            "resource": {
                "id": "r1",
                "actId": "a1",
                "status": "SUCCEEDED",
                "defaultDatasetId": "d1"
            }
        }))
        .unwrap()
    }

    fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign_payload(body, secret).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn valid_signature_persists_and_enqueues() {
        let (state, store, enqueuer) = state(Some("whsec"), false);
        let body = delivery_body();
        let headers = signed_headers(&body, "whsec");

        let resp = receive_webhook(
            State(state),
            Path("apify".to_string()),
            headers,
            Bytes::from(body),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let ids = enqueuer.ids.lock().expect("enqueuer lock");
        assert_eq!(ids.len(), 1);
        let stored = store.get(&ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.event_type, "ACTOR.RUN.SUCCEEDED");
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn missing_signature_is_401() {
        let (state, _, enqueuer) = state(Some("whsec"), false);
        let resp = receive_webhook(
            State(state),
            Path("apify".to_string()),
            HeaderMap::new(),
            Bytes::from(delivery_body()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(enqueuer.ids.lock().expect("enqueuer lock").is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_401() {
        let (state, _, _) = state(Some("whsec"), false);
        let body = delivery_body();
        let headers = signed_headers(&body, "wrong-secret");
        let resp = receive_webhook(
            State(state),
            Path("apify".to_string()),
            headers,
            Bytes::from(body),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let (state, _, _) = state(Some("whsec"), false);
        let body = b"not json".to_vec();
        let headers = signed_headers(&body, "whsec");
        let resp = receive_webhook(
            State(state),
            Path("apify".to_string()),
            headers,
            Bytes::from(body),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_secret_allowed_only_in_development() {
        let body = delivery_body();

        let (dev_state, _, dev_enqueuer) = state(None, true);
        let resp = receive_webhook(
            State(dev_state),
            Path("apify".to_string()),
            HeaderMap::new(),
            Bytes::from(body.clone()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(dev_enqueuer.ids.lock().expect("enqueuer lock").len(), 1);

        let (prod_state, _, _) = state(None, false);
        let resp = receive_webhook(
            State(prod_state),
            Path("apify".to_string()),
            HeaderMap::new(),
            Bytes::from(body),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
