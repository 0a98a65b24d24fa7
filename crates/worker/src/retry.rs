use chrono::{DateTime, Duration, Utc};

/// Maps an attempt number to the delay before the next attempt may run.
///
/// Delays never shrink as the attempt number grows, and every strategy is
/// bounded: the exponential curve by `max_seconds`, the schedule by its last
/// entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    Exponential { base_seconds: u64, max_seconds: u64 },
    Schedule { intervals_seconds: Vec<u64> },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base_seconds: 60,
            max_seconds: 3_600,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base_seconds: u64, max_seconds: u64) -> Self {
        Self::Exponential {
            base_seconds,
            max_seconds,
        }
    }

    /// An empty schedule falls back to the default exponential curve.
    pub fn schedule(intervals_seconds: Vec<u64>) -> Self {
        if intervals_seconds.is_empty() {
            return Self::default();
        }
        Self::Schedule { intervals_seconds }
    }

    pub fn delay_seconds(&self, attempt: i32) -> u64 {
        match self {
            Self::Exponential {
                base_seconds,
                max_seconds,
            } => retry_delay_seconds(*base_seconds, *max_seconds, attempt),
            Self::Schedule { intervals_seconds } => {
                let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(0);
                intervals_seconds
                    .get(index)
                    .or_else(|| intervals_seconds.last())
                    .copied()
                    .unwrap_or(0)
            }
        }
    }

    pub fn next_retry_at(&self, attempt: i32, from: DateTime<Utc>) -> DateTime<Utc> {
        let delay_seconds = i64::try_from(self.delay_seconds(attempt)).unwrap_or(i64::MAX);
        let delay = Duration::try_seconds(delay_seconds).unwrap_or(Duration::MAX);
        from.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

pub(crate) fn retry_delay_seconds(base_seconds: u64, max_seconds: u64, attempt: i32) -> u64 {
    if attempt <= 1 {
        return base_seconds.min(max_seconds);
    }

    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    let capped_exponent = exponent.min(20);
    let multiplier = 1_u64 << capped_exponent;

    base_seconds.saturating_mul(multiplier).min(max_seconds)
}
