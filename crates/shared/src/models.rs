use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The two record families served by the engine. Both share one table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryTable {
    Payloads,
    Deliveries,
}

impl DeliveryTable {
    pub const ALL: [DeliveryTable; 2] = [Self::Payloads, Self::Deliveries];

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Payloads => "webhook_payloads",
            Self::Deliveries => "webhook_deliveries",
        }
    }

    /// Error recorded when the TTL elapses before another attempt can run.
    pub fn expired_message(&self) -> &'static str {
        match self {
            Self::Payloads => "Payload expired after TTL",
            Self::Deliveries => "Delivery expired after TTL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub url: String,
    pub payload: Value,
    #[serde(skip_serializing)]
    pub secret: String,
    pub event_type: Option<String>,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_http_status_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub last_error_message: Option<String>,
    pub reserved_by: Option<Uuid>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Builds a fresh `PENDING` record the way the store inserts one.
    pub fn pending(id: Uuid, new: NewDelivery, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id,
            url: new.url,
            payload: new.payload,
            secret: new.secret,
            event_type: new.event_type,
            status: DeliveryStatus::Pending,
            attempt: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            next_retry_at: now,
            last_sent_at: None,
            last_http_status_code: None,
            last_response_body: None,
            last_error_message: None,
            reserved_by: None,
            reserved_until: None,
            deleted_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_live_reservation(&self, now: DateTime<Utc>) -> bool {
        matches!(self.reserved_until, Some(until) if until > now)
    }

    /// Applies a state transition in place. Stores without conditional SQL use
    /// this so that every backend writes the same columns.
    pub fn apply(&mut self, transition: &DeliveryTransition, now: DateTime<Utc>) {
        match transition {
            DeliveryTransition::Expired { message } => {
                self.status = DeliveryStatus::Failed;
                self.last_error_message = Some(message.clone());
            }
            DeliveryTransition::Delivered {
                attempt,
                sent_at,
                http_status_code,
                response_body,
            } => {
                self.status = DeliveryStatus::Success;
                self.attempt = *attempt;
                self.last_sent_at = Some(*sent_at);
                self.last_http_status_code = *http_status_code;
                self.last_response_body = response_body.clone();
                self.last_error_message = None;
            }
            DeliveryTransition::Rescheduled {
                attempt,
                next_retry_at,
                failure,
            } => {
                self.status = DeliveryStatus::Pending;
                self.attempt = *attempt;
                self.next_retry_at = *next_retry_at;
                self.apply_failure(failure);
            }
            DeliveryTransition::Exhausted { attempt, failure } => {
                self.status = DeliveryStatus::Failed;
                self.attempt = *attempt;
                self.apply_failure(failure);
            }
        }

        self.reserved_by = None;
        self.reserved_until = None;
        self.updated_at = now;
    }

    fn apply_failure(&mut self, failure: &FailedAttempt) {
        self.last_sent_at = Some(failure.sent_at);
        self.last_http_status_code = failure.http_status_code;
        self.last_response_body = failure.response_body.clone();
        self.last_error_message = Some(failure.error_message.clone());
    }
}

/// Producer input for a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDelivery {
    pub url: String,
    pub payload: Value,
    pub secret: String,
    #[serde(default)]
    pub event_type: Option<String>,
    /// Overrides the configured default TTL.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Diagnostics captured from an attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub sent_at: DateTime<Utc>,
    pub http_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: String,
}

/// A single-record write produced by the worker state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTransition {
    /// TTL elapsed before another attempt could run. `attempt` is untouched.
    Expired { message: String },
    Delivered {
        attempt: i32,
        sent_at: DateTime<Utc>,
        http_status_code: Option<i32>,
        response_body: Option<String>,
    },
    Rescheduled {
        attempt: i32,
        next_retry_at: DateTime<Utc>,
        failure: FailedAttempt,
    },
    /// The next retry would land past `expires_at`.
    Exhausted {
        attempt: i32,
        failure: FailedAttempt,
    },
}

impl DeliveryTransition {
    pub fn resulting_status(&self) -> DeliveryStatus {
        match self {
            Self::Rescheduled { .. } => DeliveryStatus::Pending,
            Self::Delivered { .. } => DeliveryStatus::Success,
            Self::Expired { .. } | Self::Exhausted { .. } => DeliveryStatus::Failed,
        }
    }
}

/// A record the retry scan found due, with the instant it became due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueDelivery {
    pub id: Uuid,
    pub next_retry_at: DateTime<Utc>,
}

/// Precondition attached to a save. A save that does not match is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveGuard {
    /// The record must still be reserved by this owner.
    ReservedBy(Uuid),
    /// Nobody may hold a live reservation at `now`.
    Unreserved { now: DateTime<Utc> },
}
