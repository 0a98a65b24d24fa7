use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::models::{
    DeliveryRecord, DeliveryTable, DeliveryTransition, FailedAttempt, SaveGuard,
};
use shared::repos::StoreError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::executor::DeliveryTransport;
use crate::store::DeliveryStore;
use crate::{AttemptOutcome, BackoffPolicy, ProcessOutcome};

/// Runs one attempt per invocation for records of a single table.
///
/// Invocation order: load, skip when missing or final, fail when past TTL,
/// reserve, attempt, then save under the reservation. Only delivery problems
/// are folded into the record; persistence errors are returned to the caller.
#[derive(Clone)]
pub struct DeliveryWorker {
    store: Arc<dyn DeliveryStore>,
    transport: Arc<dyn DeliveryTransport>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    lease: Duration,
    worker_id: Uuid,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            backoff,
            lease,
            worker_id: Uuid::new_v4(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn table(&self) -> DeliveryTable {
        self.store.table()
    }

    pub async fn process(&self, id: Uuid) -> Result<ProcessOutcome, StoreError> {
        let table = self.store.table().table_name();
        let now = self.clock.now();

        let Some(record) = self.store.load(id).await? else {
            warn!(
                table,
                delivery_id = %id,
                "webhook record not found; dropping invocation"
            );
            return Ok(ProcessOutcome::NotFound);
        };

        if record.status.is_terminal() {
            debug!(
                table,
                delivery_id = %id,
                status = record.status.as_str(),
                "webhook record already final; skipping"
            );
            return Ok(ProcessOutcome::AlreadyFinal(record.status));
        }

        if record.is_expired_at(now) {
            return self.expire(&record, now).await;
        }

        let reserved_until = now + self.lease;
        let Some(record) = self
            .store
            .reserve(id, self.worker_id, now, reserved_until)
            .await?
        else {
            debug!(
                table,
                delivery_id = %id,
                worker_id = %self.worker_id,
                "webhook record reserved by another worker; skipping"
            );
            return Ok(ProcessOutcome::Reserved);
        };

        let outcome = self.transport.attempt(&record).await;
        let completed_at = self.clock.now();
        let transition = plan_transition(&record, &outcome, &self.backoff, now, completed_at);

        let saved = self
            .store
            .save(
                id,
                SaveGuard::ReservedBy(self.worker_id),
                &transition,
                completed_at,
            )
            .await?;
        if !saved {
            warn!(
                table,
                delivery_id = %id,
                worker_id = %self.worker_id,
                "attempt result discarded because the reservation was lost"
            );
            return Ok(ProcessOutcome::ReservationLost);
        }

        Ok(self.report(&record, &transition))
    }

    async fn expire(
        &self,
        record: &DeliveryRecord,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, StoreError> {
        let table = self.store.table();
        let transition = DeliveryTransition::Expired {
            message: table.expired_message().to_string(),
        };

        let saved = self
            .store
            .save(record.id, SaveGuard::Unreserved { now }, &transition, now)
            .await?;
        if !saved {
            let outcome = match self.store.load(record.id).await? {
                None => ProcessOutcome::NotFound,
                Some(current) if current.status.is_terminal() => {
                    ProcessOutcome::AlreadyFinal(current.status)
                }
                Some(_) => ProcessOutcome::Reserved,
            };
            debug!(
                table = table.table_name(),
                delivery_id = %record.id,
                outcome = outcome.label(),
                "expiry skipped because the record changed underneath"
            );
            return Ok(outcome);
        }

        warn!(
            table = table.table_name(),
            delivery_id = %record.id,
            attempt = record.attempt,
            expires_at = %record.expires_at,
            "webhook expired after TTL"
        );
        Ok(ProcessOutcome::Expired)
    }

    fn report(&self, record: &DeliveryRecord, transition: &DeliveryTransition) -> ProcessOutcome {
        let table = self.store.table().table_name();

        match transition {
            DeliveryTransition::Delivered {
                attempt,
                http_status_code,
                ..
            } => {
                info!(
                    table,
                    delivery_id = %record.id,
                    attempt,
                    status_code = http_status_code,
                    "webhook delivered"
                );
                ProcessOutcome::Delivered { attempt: *attempt }
            }
            DeliveryTransition::Rescheduled {
                attempt,
                next_retry_at,
                failure,
            } => {
                info!(
                    table,
                    delivery_id = %record.id,
                    attempt,
                    status_code = failure.http_status_code,
                    next_retry_at = %next_retry_at,
                    error = %failure.error_message,
                    "webhook attempt failed; retry scheduled"
                );
                ProcessOutcome::Rescheduled {
                    attempt: *attempt,
                    next_retry_at: *next_retry_at,
                }
            }
            DeliveryTransition::Exhausted { attempt, failure } => {
                warn!(
                    table,
                    delivery_id = %record.id,
                    attempt,
                    status_code = failure.http_status_code,
                    expires_at = %record.expires_at,
                    error = %failure.error_message,
                    "webhook failed permanently; next retry would pass TTL"
                );
                ProcessOutcome::Exhausted { attempt: *attempt }
            }
            DeliveryTransition::Expired { .. } => ProcessOutcome::Expired,
        }
    }
}

/// Decides the write for a record after one attempt. Pure.
pub fn plan_transition(
    record: &DeliveryRecord,
    outcome: &AttemptOutcome,
    backoff: &BackoffPolicy,
    sent_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> DeliveryTransition {
    let attempt = record.attempt.saturating_add(1);
    let http_status_code = outcome.status_code.map(i32::from);

    if outcome.success {
        return DeliveryTransition::Delivered {
            attempt,
            sent_at,
            http_status_code,
            response_body: outcome.body.clone(),
        };
    }

    let failure = FailedAttempt {
        sent_at,
        http_status_code,
        response_body: outcome.body.clone(),
        error_message: outcome.error_message(),
    };

    let next_retry_at = backoff.next_retry_at(attempt, completed_at);
    if next_retry_at > record.expires_at {
        DeliveryTransition::Exhausted { attempt, failure }
    } else {
        DeliveryTransition::Rescheduled {
            attempt,
            next_retry_at,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use shared::models::{
        DeliveryRecord, DeliveryStatus, DeliveryTable, DeliveryTransition, DueDelivery,
        NewDelivery, SaveGuard,
    };
    use tokio::sync::Notify;
    use uuid::Uuid;

    use super::{DeliveryWorker, plan_transition};
    use crate::clock::ManualClock;
    use crate::executor::{DeliveryTransport, TransportFuture};
    use crate::store::{DeliveryStore, InMemoryDeliveryStore, StoreFuture};
    use crate::{AttemptOutcome, BackoffPolicy, ProcessOutcome};

    struct StubTransport {
        outcome: AttemptOutcome,
        calls: AtomicUsize,
    }

    impl StubTransport {
        fn returning(outcome: AttemptOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DeliveryTransport for StubTransport {
        fn attempt<'a>(&'a self, _record: &'a DeliveryRecord) -> TransportFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.outcome.clone()
            })
        }
    }

    /// Parks inside the attempt until released.
    struct GatedTransport {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    impl DeliveryTransport for GatedTransport {
        fn attempt<'a>(&'a self, _record: &'a DeliveryRecord) -> TransportFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.entered.notify_one();
                self.release.notified().await;
                AttemptOutcome::delivered(200, "ok".to_string())
            })
        }
    }

    /// Simulates a stuck worker whose lease was taken over mid-attempt.
    struct StealingTransport {
        store: InMemoryDeliveryStore,
    }

    impl DeliveryTransport for StealingTransport {
        fn attempt<'a>(&'a self, record: &'a DeliveryRecord) -> TransportFuture<'a> {
            Box::pin(async move {
                let mut stolen = record.clone();
                stolen.reserved_by = Some(Uuid::new_v4());
                self.store.put(stolen);
                AttemptOutcome::delivered(200, "ok".to_string())
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    fn seed(
        store: &InMemoryDeliveryStore,
        ttl: Duration,
        edit: impl FnOnce(&mut DeliveryRecord),
    ) -> DeliveryRecord {
        let mut record = DeliveryRecord::pending(
            Uuid::new_v4(),
            NewDelivery {
                url: "https://example.com/webhook".to_string(),
                payload: json!({"event": "payment.status.changed"}),
                secret: "test-secret".to_string(),
                event_type: None,
                ttl_seconds: None,
            },
            now(),
            ttl,
        );
        edit(&mut record);
        store.put(record.clone());
        record
    }

    fn worker(
        store: &InMemoryDeliveryStore,
        transport: Arc<dyn DeliveryTransport>,
        clock: &ManualClock,
    ) -> DeliveryWorker {
        DeliveryWorker::new(
            Arc::new(store.clone()),
            transport,
            Arc::new(clock.clone()),
            BackoffPolicy::default(),
            Duration::seconds(60),
        )
    }

    fn http_500() -> AttemptOutcome {
        AttemptOutcome::rejected(
            500,
            r#"{"error":"Internal Server Error"}"#.to_string(),
            "HTTP 500: Internal Server Error",
        )
    }

    #[tokio::test]
    async fn success_finalizes_and_clears_error() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |record| {
            record.last_error_message = Some("HTTP 502: Bad Gateway".to_string());
        });
        let transport =
            StubTransport::returning(AttemptOutcome::delivered(200, "{\"received\":true}".into()));

        let outcome = worker(&store, transport.clone(), &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Delivered { attempt: 1 });
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Success);
        assert_eq!(updated.attempt, 1);
        assert_eq!(updated.last_http_status_code, Some(200));
        assert_eq!(updated.last_response_body.as_deref(), Some("{\"received\":true}"));
        assert_eq!(updated.last_error_message, None);
        assert_eq!(updated.last_sent_at, Some(now()));
        assert_eq!(updated.reserved_by, None);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn failure_within_ttl_schedules_retry() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |_| {});
        let transport = StubTransport::returning(http_500());

        let outcome = worker(&store, transport, &clock)
            .process(record.id)
            .await
            .unwrap();

        let expected_retry = now() + Duration::minutes(1);
        assert_eq!(
            outcome,
            ProcessOutcome::Rescheduled {
                attempt: 1,
                next_retry_at: expected_retry,
            }
        );
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Pending);
        assert_eq!(updated.attempt, 1);
        assert_eq!(updated.next_retry_at, expected_retry);
        assert_eq!(updated.last_http_status_code, Some(500));
        assert_eq!(
            updated.last_error_message.as_deref(),
            Some("HTTP 500: Internal Server Error")
        );
        assert!(updated.next_retry_at > updated.last_sent_at.unwrap());
    }

    #[tokio::test]
    async fn failure_whose_retry_would_pass_ttl_is_permanent() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::seconds(30), |_| {});
        let transport = StubTransport::returning(AttemptOutcome::transport_error(
            "connection refused",
        ));

        let outcome = worker(&store, transport, &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Exhausted { attempt: 1 });
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Failed);
        assert_eq!(updated.attempt, 1);
        assert_eq!(updated.last_error_message.as_deref(), Some("connection refused"));
        assert_eq!(updated.last_http_status_code, None);
        assert_eq!(updated.last_sent_at, Some(now()));
    }

    #[tokio::test]
    async fn final_records_are_left_untouched() {
        for status in [DeliveryStatus::Success, DeliveryStatus::Failed] {
            let store = InMemoryDeliveryStore::new(DeliveryTable::Deliveries);
            let clock = ManualClock::new(now());
            let record = seed(&store, Duration::days(7), |record| {
                record.status = status;
                record.attempt = 5;
            });
            let transport = StubTransport::returning(http_500());

            let outcome = worker(&store, transport.clone(), &clock)
                .process(record.id)
                .await
                .unwrap();

            assert_eq!(outcome, ProcessOutcome::AlreadyFinal(status));
            assert_eq!(store.get(record.id).unwrap(), record);
            assert_eq!(transport.calls(), 0);
        }
    }

    #[tokio::test]
    async fn expired_record_fails_without_an_attempt() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |record| {
            record.attempt = 2;
            record.expires_at = now() - Duration::hours(1);
        });
        let transport = StubTransport::returning(AttemptOutcome::delivered(200, String::new()));

        let outcome = worker(&store, transport.clone(), &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Expired);
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Failed);
        assert_eq!(
            updated.last_error_message.as_deref(),
            Some("Payload expired after TTL")
        );
        assert_eq!(updated.attempt, 2);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn missing_record_is_dropped() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let transport = StubTransport::returning(http_500());

        let outcome = worker(&store, transport.clone(), &clock)
            .process(Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::NotFound);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn soft_deleted_record_is_treated_as_missing() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |_| {});
        store.soft_delete(record.id, now());
        let transport = StubTransport::returning(http_500());

        let outcome = worker(&store, transport.clone(), &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::NotFound);
        assert_eq!(store.get(record.id).unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn attempt_counter_continues_from_persisted_value() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |record| record.attempt = 3);
        let transport = StubTransport::returning(http_500());

        worker(&store, transport, &clock)
            .process(record.id)
            .await
            .unwrap();

        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.attempt, 4);
        assert_eq!(updated.next_retry_at, now() + Duration::minutes(8));
    }

    #[tokio::test]
    async fn live_reservation_blocks_attempt_and_expiry() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let reserved = seed(&store, Duration::days(7), |record| {
            record.reserved_by = Some(Uuid::new_v4());
            record.reserved_until = Some(now() + Duration::seconds(30));
        });
        let reserved_and_expired = seed(&store, Duration::days(7), |record| {
            record.expires_at = now() - Duration::seconds(1);
            record.reserved_by = Some(Uuid::new_v4());
            record.reserved_until = Some(now() + Duration::seconds(30));
        });
        let transport = StubTransport::returning(http_500());
        let worker = worker(&store, transport.clone(), &clock);

        assert_eq!(worker.process(reserved.id).await.unwrap(), ProcessOutcome::Reserved);
        assert_eq!(
            worker.process(reserved_and_expired.id).await.unwrap(),
            ProcessOutcome::Reserved
        );
        assert_eq!(store.get(reserved.id).unwrap(), reserved);
        assert_eq!(store.get(reserved_and_expired.id).unwrap(), reserved_and_expired);
        assert_eq!(transport.calls(), 0);
    }

    /// Lets another worker deliver the record right before the expiry write
    /// lands, the way a slow invocation racing a fast one would.
    struct FinalizedBeforeExpiryStore {
        inner: InMemoryDeliveryStore,
    }

    impl DeliveryStore for FinalizedBeforeExpiryStore {
        fn table(&self) -> DeliveryTable {
            self.inner.table()
        }

        fn load<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<DeliveryRecord>> {
            self.inner.load(id)
        }

        fn reserve<'a>(
            &'a self,
            id: Uuid,
            owner: Uuid,
            now: DateTime<Utc>,
            reserved_until: DateTime<Utc>,
        ) -> StoreFuture<'a, Option<DeliveryRecord>> {
            self.inner.reserve(id, owner, now, reserved_until)
        }

        fn save<'a>(
            &'a self,
            id: Uuid,
            guard: SaveGuard,
            transition: &'a DeliveryTransition,
            now: DateTime<Utc>,
        ) -> StoreFuture<'a, bool> {
            if let SaveGuard::Unreserved { .. } = guard {
                if let Some(mut record) = self.inner.get(id) {
                    record.status = DeliveryStatus::Success;
                    record.attempt += 1;
                    self.inner.put(record);
                }
            }
            self.inner.save(id, guard, transition, now)
        }

        fn query_due<'a>(
            &'a self,
            now: DateTime<Utc>,
            after: Option<DueDelivery>,
            limit: usize,
        ) -> StoreFuture<'a, Vec<DueDelivery>> {
            self.inner.query_due(now, after, limit)
        }

        fn insert<'a>(
            &'a self,
            id: Uuid,
            new: NewDelivery,
            now: DateTime<Utc>,
            ttl: Duration,
        ) -> StoreFuture<'a, DeliveryRecord> {
            self.inner.insert(id, new, now, ttl)
        }
    }

    #[tokio::test]
    async fn expiry_racing_a_delivery_reports_the_final_status() {
        let inner = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let record = seed(&inner, Duration::days(7), |record| {
            record.expires_at = now() - Duration::seconds(1);
        });
        let transport = StubTransport::returning(http_500());
        let worker = DeliveryWorker::new(
            Arc::new(FinalizedBeforeExpiryStore {
                inner: inner.clone(),
            }),
            transport.clone(),
            Arc::new(ManualClock::new(now())),
            BackoffPolicy::default(),
            Duration::seconds(60),
        );

        let outcome = worker.process(record.id).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlreadyFinal(DeliveryStatus::Success));
        let stored = inner.get(record.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Success);
        assert!(stored.last_error_message.is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn stale_reservation_is_recovered() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |record| {
            record.reserved_by = Some(Uuid::new_v4());
            record.reserved_until = Some(now() - Duration::seconds(1));
        });
        let transport = StubTransport::returning(AttemptOutcome::delivered(204, String::new()));

        let outcome = worker(&store, transport, &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Delivered { attempt: 1 });
    }

    #[tokio::test]
    async fn lost_reservation_discards_the_result() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |_| {});
        let transport = Arc::new(StealingTransport {
            store: store.clone(),
        });

        let outcome = worker(&store, transport, &clock)
            .process(record.id)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::ReservationLost);
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Pending);
        assert_eq!(updated.attempt, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_invocations_attempt_only_once() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::days(7), |_| {});
        let transport = Arc::new(GatedTransport {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });

        let first = worker(&store, transport.clone(), &clock);
        let second = worker(&store, transport.clone(), &clock);

        let in_flight = tokio::spawn(async move { first.process(record.id).await });
        transport.entered.notified().await;

        let overlapping = second.process(record.id).await.unwrap();
        assert_eq!(overlapping, ProcessOutcome::Reserved);

        transport.release.notify_one();
        let completed = in_flight.await.unwrap().unwrap();
        assert_eq!(completed, ProcessOutcome::Delivered { attempt: 1 });

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let updated = store.get(record.id).unwrap();
        assert_eq!(updated.status, DeliveryStatus::Success);
        assert_eq!(updated.attempt, 1);
    }

    #[tokio::test]
    async fn attempts_never_decrease_until_the_record_fails() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Deliveries);
        let clock = ManualClock::new(now());
        let record = seed(&store, Duration::hours(2), |_| {});
        let transport = StubTransport::returning(http_500());
        let worker = worker(&store, transport.clone(), &clock);

        let mut previous_attempt = 0;
        for _ in 0..20 {
            worker.process(record.id).await.unwrap();
            let current = store.get(record.id).unwrap();
            assert!(current.attempt >= previous_attempt);
            previous_attempt = current.attempt;

            if current.status.is_terminal() {
                break;
            }
            assert!(current.next_retry_at <= current.expires_at);
            clock.set(current.next_retry_at);
        }

        let finished = store.get(record.id).unwrap();
        assert_eq!(finished.status, DeliveryStatus::Failed);

        let calls = transport.calls();
        assert_eq!(
            worker.process(record.id).await.unwrap(),
            ProcessOutcome::AlreadyFinal(DeliveryStatus::Failed)
        );
        assert_eq!(store.get(record.id).unwrap(), finished);
        assert_eq!(transport.calls(), calls);
    }

    #[test]
    fn plan_uses_incremented_attempt_for_backoff() {
        let store = InMemoryDeliveryStore::new(DeliveryTable::Payloads);
        let record = seed(&store, Duration::days(7), |record| record.attempt = 1);

        let transition = plan_transition(
            &record,
            &http_500(),
            &BackoffPolicy::exponential(60, 3_600),
            now(),
            now(),
        );

        assert_eq!(transition.resulting_status(), DeliveryStatus::Pending);
        assert!(matches!(
            transition,
            shared::models::DeliveryTransition::Rescheduled { attempt: 2, next_retry_at, .. }
                if next_retry_at == now() + Duration::minutes(2)
        ));
    }
}
