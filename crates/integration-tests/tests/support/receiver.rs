use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use shared::signing::{WEBHOOK_EVENT_HEADER, WEBHOOK_SIGNATURE_HEADER, verify_signature};

#[derive(Debug, Clone)]
pub struct ReceivedWebhook {
    pub body: Vec<u8>,
    pub signature_valid: bool,
    pub event_type: Option<String>,
}

#[derive(Clone)]
struct ReceiverState {
    secret: String,
    responses: Arc<Mutex<Vec<StatusCode>>>,
    received: Arc<Mutex<Vec<ReceivedWebhook>>>,
}

/// Throwaway webhook endpoint. Replies with the queued statuses in order and
/// `200 OK` once the queue is empty.
pub struct MockReceiver {
    pub url: String,
    received: Arc<Mutex<Vec<ReceivedWebhook>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockReceiver {
    pub async fn start(secret: &str, responses: Vec<StatusCode>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = ReceiverState {
            secret: secret.to_string(),
            responses: Arc::new(Mutex::new(responses.into_iter().rev().collect())),
            received: received.clone(),
        };
        let app = Router::new()
            .route("/webhook", post(receive))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock receiver listener should bind");
        let bind_addr = listener
            .local_addr()
            .expect("mock receiver listener local address should exist");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock receiver should run");
        });

        Self {
            url: format!("http://{bind_addr}/webhook"),
            received,
            handle,
        }
    }

    pub fn received(&self) -> Vec<ReceivedWebhook> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockReceiver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let event_type = headers
        .get(WEBHOOK_EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    state.received.lock().unwrap().push(ReceivedWebhook {
        body: body.to_vec(),
        signature_valid: verify_signature(&state.secret, &body, signature),
        event_type,
    });

    let status = state
        .responses
        .lock()
        .unwrap()
        .pop()
        .unwrap_or(StatusCode::OK);
    (status, "{\"received\":true}")
}
