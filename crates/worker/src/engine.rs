use std::sync::Arc;

use chrono::Duration;
use shared::config::WorkerConfig;
use shared::models::{DeliveryRecord, DeliveryTable, NewDelivery};
use shared::repos::{StoreError, validate_new_delivery};
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::executor::DeliveryTransport;
use crate::store::DeliveryStore;
use crate::{BackoffPolicy, DeliveryWorker, RetryScanner, Submitter, TaskDispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub backoff: BackoffPolicy,
    pub lease: Duration,
    pub concurrency: usize,
    pub scan_batch_size: usize,
    pub default_ttl: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let backoff = match &config.retry_intervals_seconds {
            Some(intervals) => BackoffPolicy::schedule(intervals.clone()),
            None => BackoffPolicy::exponential(config.retry_base_seconds, config.retry_max_seconds),
        };

        Self {
            backoff,
            lease: seconds(config.lease_seconds),
            concurrency: config.worker_concurrency,
            scan_batch_size: usize::try_from(config.scan_batch_size).unwrap_or(usize::MAX),
            default_ttl: seconds(config.default_ttl_seconds),
        }
    }
}

fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// One record family wired end to end: its store, worker, dispatcher and
/// retry scanner. Both trigger paths go through the same dispatcher.
pub struct DeliveryEngine {
    store: Arc<dyn DeliveryStore>,
    clock: Arc<dyn Clock>,
    worker: DeliveryWorker,
    dispatcher: TaskDispatcher,
    scanner: Arc<RetryScanner>,
    default_ttl: Duration,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let worker = DeliveryWorker::new(
            store.clone(),
            transport,
            clock.clone(),
            settings.backoff,
            settings.lease,
        );
        let dispatcher = TaskDispatcher::new(worker.clone(), settings.concurrency);
        let scanner = Arc::new(RetryScanner::new(
            store.clone(),
            Arc::new(dispatcher.clone()),
            clock.clone(),
            settings.scan_batch_size,
        ));

        Self {
            store,
            clock,
            worker,
            dispatcher,
            scanner,
            default_ttl: settings.default_ttl,
        }
    }

    pub fn table(&self) -> DeliveryTable {
        self.store.table()
    }

    pub fn worker(&self) -> &DeliveryWorker {
        &self.worker
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub fn scanner(&self) -> Arc<RetryScanner> {
        self.scanner.clone()
    }

    /// Persists a new `PENDING` record and submits its first attempt.
    ///
    /// Waits for a free worker slot before returning. The record is durable
    /// once this returns `Ok`, even when the submission itself was refused;
    /// the retry scanner picks it up on its next pass.
    pub async fn enqueue(&self, new: NewDelivery) -> Result<DeliveryRecord, StoreError> {
        validate_new_delivery(&new)?;
        let ttl = match new.ttl_seconds {
            Some(ttl_seconds) => seconds(ttl_seconds),
            None => self.default_ttl,
        };

        let table = self.table().table_name();
        let record = self
            .store
            .insert(Uuid::new_v4(), new, self.clock.now(), ttl)
            .await?;

        info!(
            table,
            delivery_id = %record.id,
            expires_at = %record.expires_at,
            "webhook enqueued"
        );

        if let Err(err) = self.dispatcher.submit(record.id).await {
            error!(
                table,
                delivery_id = %record.id,
                "initial submission failed; leaving record for the retry scanner: {err}"
            );
        }

        Ok(record)
    }
}
