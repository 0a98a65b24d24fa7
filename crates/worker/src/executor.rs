use std::error::Error as _;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use shared::models::DeliveryRecord;
use shared::signing::{
    WEBHOOK_EVENT_HEADER, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, sign_payload,
};
use tracing::{debug, warn};

use crate::AttemptOutcome;

pub const MISSING_SECRET_ERROR: &str = "No webhook secret configured";

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = AttemptOutcome> + Send + 'a>>;

/// Performs one outbound delivery attempt. Implementations never fail: every
/// problem is reported inside the returned [`AttemptOutcome`].
pub trait DeliveryTransport: Send + Sync {
    fn attempt<'a>(&'a self, record: &'a DeliveryRecord) -> TransportFuture<'a>;
}

#[derive(Clone)]
pub struct HttpDeliveryExecutor {
    client: reqwest::Client,
    timeout: Duration,
    max_response_body_length: usize,
}

impl HttpDeliveryExecutor {
    pub fn new(timeout: Duration, max_response_body_length: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            timeout,
            max_response_body_length,
        })
    }

    async fn send(&self, record: &DeliveryRecord) -> AttemptOutcome {
        if record.secret.trim().is_empty() {
            return AttemptOutcome::transport_error(MISSING_SECRET_ERROR);
        }

        let body = match serde_json::to_vec(&record.payload) {
            Ok(body) => body,
            Err(err) => {
                return AttemptOutcome::transport_error(format!(
                    "payload serialization failed: {err}"
                ));
            }
        };
        let signature = match sign_payload(&record.secret, &body) {
            Ok(signature) => signature,
            Err(err) => return AttemptOutcome::transport_error(err.to_string()),
        };

        let mut builder = self
            .client
            .post(&record.url)
            .header(CONTENT_TYPE, "application/json")
            .header(WEBHOOK_ID_HEADER, record.id.to_string())
            .header(WEBHOOK_SIGNATURE_HEADER, signature);
        if let Some(event_type) = record.event_type.as_deref() {
            builder = builder.header(WEBHOOK_EVENT_HEADER, event_type);
        }

        let mut response = match builder.body(body).send().await {
            Ok(response) => response,
            Err(err) => return AttemptOutcome::transport_error(self.describe_error(&err)),
        };

        let status = response.status();
        let (body, read_error) = self.read_body(&mut response).await;

        debug!(
            delivery_id = %record.id,
            status_code = status.as_u16(),
            "webhook endpoint responded"
        );
        if let Some(read_error) = &read_error {
            warn!(
                delivery_id = %record.id,
                status_code = status.as_u16(),
                error = %read_error,
                "failed to read webhook response body"
            );
        }

        if status.is_success() {
            return AttemptOutcome::delivered(status.as_u16(), body);
        }

        let mut message = format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        );
        if let Some(read_error) = read_error {
            message.push_str("; response body read failed: ");
            message.push_str(&read_error);
        }
        AttemptOutcome::rejected(status.as_u16(), body, message)
    }

    /// Buffers only as many bytes as the kept prefix can need (four per
    /// char), then stops reading. A read error keeps what arrived so far.
    async fn read_body(&self, response: &mut reqwest::Response) -> (String, Option<String>) {
        let byte_budget = self.max_response_body_length.saturating_mul(4);
        let mut buffer = Vec::new();
        let mut read_error = None;

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = byte_budget.saturating_sub(buffer.len());
                    buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if buffer.len() >= byte_budget {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    read_error = Some(self.describe_error(&err));
                    break;
                }
            }
        }

        let body = String::from_utf8_lossy(&buffer).into_owned();
        (truncate_chars(body, self.max_response_body_length), read_error)
    }

    fn describe_error(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            return format!("request timeout after {}ms", self.timeout.as_millis());
        }

        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

impl DeliveryTransport for HttpDeliveryExecutor {
    fn attempt<'a>(&'a self, record: &'a DeliveryRecord) -> TransportFuture<'a> {
        Box::pin(self.send(record))
    }
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((byte_index, _)) => body[..byte_index].to_string(),
        None => body,
    }
}
