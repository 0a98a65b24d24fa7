use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::repos::StoreError;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::store::DeliveryStore;
use crate::{ScanReport, Submitter};

/// Periodic safety net that resubmits due records whose retry was never
/// re-triggered. It never decides expiry or backoff; the worker does.
pub struct RetryScanner {
    store: Arc<dyn DeliveryStore>,
    submitter: Arc<dyn Submitter>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl RetryScanner {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        submitter: Arc<dyn Submitter>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            submitter,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Walks every due record page by page and hands each one to the
    /// submitter, waiting whenever the submitter is at capacity.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport, StoreError> {
        let table = self.store.table().table_name();
        let mut report = ScanReport::default();
        let mut after = None;

        loop {
            let page = self.store.query_due(now, after, self.batch_size).await?;
            let page_len = page.len();
            report.due_records += page_len;

            for record in page {
                report.record_lag(record.next_retry_at, now);
                after = Some(record);

                match self.submitter.submit(record.id).await {
                    Ok(()) => report.submitted += 1,
                    Err(err) => {
                        report.submission_failures += 1;
                        error!(
                            table,
                            delivery_id = %record.id,
                            "failed to resubmit due webhook: {err}"
                        );
                    }
                }
            }

            if page_len < self.batch_size {
                break;
            }
        }

        info!(
            table,
            due_records = report.due_records,
            submitted = report.submitted,
            submission_failures = report.submission_failures,
            average_lag_seconds = report.average_lag_seconds(),
            max_lag_seconds = report.max_lag_seconds,
            "retry scan metrics"
        );

        Ok(report)
    }

    /// Scans on every tick until `shutdown` flips to `true` or its sender is
    /// dropped. The first tick fires immediately; a scan still waiting on the
    /// submitter is abandoned at shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let table = self.store.table().table_name();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            table,
            interval_seconds = interval.as_secs(),
            batch_size = self.batch_size,
            "retry scanner started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.scan_once(self.clock.now()) => {
                    if let Err(err) = result {
                        warn!(table, "retry scan failed; waiting for next tick: {err}");
                    }
                }
            }
        }

        info!(table, "retry scanner stopping");
    }
}
