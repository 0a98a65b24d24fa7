use chrono::{DateTime, Utc};
use shared::models::DeliveryStatus;

/// Normalized result of one outbound attempt. Every failure mode is data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub success: bool,
    /// Present only when a response was received.
    pub status_code: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
}

impl AttemptOutcome {
    pub fn delivered(status_code: u16, body: String) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            body: Some(body),
            error: None,
        }
    }

    pub fn rejected(status_code: u16, body: String, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: Some(status_code),
            body: Some(body),
            error: Some(error.into()),
        }
    }

    pub fn transport_error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            body: None,
            error: Some(error.into()),
        }
    }

    pub(crate) fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "delivery failed without an error message".to_string())
    }
}

/// What a single worker invocation did to its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    NotFound,
    AlreadyFinal(DeliveryStatus),
    /// Another invocation holds a live reservation; nothing was touched.
    Reserved,
    Expired,
    Delivered {
        attempt: i32,
    },
    Rescheduled {
        attempt: i32,
        next_retry_at: DateTime<Utc>,
    },
    Exhausted {
        attempt: i32,
    },
    /// The attempt ran but the reservation was gone by the time it was saved.
    ReservationLost,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyFinal(_) => "already_final",
            Self::Reserved => "reserved",
            Self::Expired => "expired",
            Self::Delivered { .. } => "delivered",
            Self::Rescheduled { .. } => "rescheduled",
            Self::Exhausted { .. } => "exhausted",
            Self::ReservationLost => "reservation_lost",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub due_records: usize,
    pub submitted: usize,
    pub submission_failures: usize,
    pub total_lag_seconds: i64,
    pub max_lag_seconds: i64,
}

impl ScanReport {
    pub(crate) fn record_lag(&mut self, due_at: DateTime<Utc>, now: DateTime<Utc>) {
        let lag_seconds = (now - due_at).num_seconds().max(0);
        self.total_lag_seconds += lag_seconds;
        self.max_lag_seconds = self.max_lag_seconds.max(lag_seconds);
    }

    pub fn average_lag_seconds(&self) -> f64 {
        if self.due_records == 0 {
            return 0.0;
        }

        self.total_lag_seconds as f64 / self.due_records as f64
    }
}
