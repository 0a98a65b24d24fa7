use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use shared::models::{
    DeliveryRecord, DeliveryStatus, DeliveryTable, DeliveryTransition, DueDelivery, NewDelivery,
    SaveGuard,
};
use shared::repos::validate_new_delivery;
use uuid::Uuid;

use super::{DeliveryStore, StoreFuture};

/// Process-local [`DeliveryStore`] with the same conditional-write rules as
/// the Postgres store. Clones share the same records.
#[derive(Clone)]
pub struct InMemoryDeliveryStore {
    table: DeliveryTable,
    records: Arc<Mutex<HashMap<Uuid, DeliveryRecord>>>,
}

impl InMemoryDeliveryStore {
    pub fn new(table: DeliveryTable) -> Self {
        Self {
            table,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Inserts or replaces a record as-is, bypassing validation.
    pub fn put(&self, record: DeliveryRecord) {
        self.lock_records().insert(record.id, record);
    }

    /// Raw lookup that also returns soft-deleted records.
    pub fn get(&self, id: Uuid) -> Option<DeliveryRecord> {
        self.lock_records().get(&id).cloned()
    }

    pub fn soft_delete(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.lock_records().get_mut(&id) {
            Some(record) if record.deleted_at.is_none() => {
                record.deleted_at = Some(now);
                record.updated_at = now;
                true
            }
            _ => false,
        }
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DeliveryRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn guard_holds(record: &DeliveryRecord, guard: SaveGuard) -> bool {
    if record.status != DeliveryStatus::Pending {
        return false;
    }

    match guard {
        SaveGuard::ReservedBy(owner) => record.reserved_by == Some(owner),
        SaveGuard::Unreserved { now } => !record.has_live_reservation(now),
    }
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn table(&self) -> DeliveryTable {
        self.table
    }

    fn load<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<DeliveryRecord>> {
        Box::pin(async move {
            Ok(self
                .lock_records()
                .get(&id)
                .filter(|record| record.deleted_at.is_none())
                .cloned())
        })
    }

    fn reserve<'a>(
        &'a self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<DeliveryRecord>> {
        Box::pin(async move {
            let mut records = self.lock_records();
            let Some(record) = records.get_mut(&id) else {
                return Ok(None);
            };
            if record.status != DeliveryStatus::Pending
                || record.deleted_at.is_some()
                || record.has_live_reservation(now)
            {
                return Ok(None);
            }

            record.reserved_by = Some(owner);
            record.reserved_until = Some(reserved_until);
            record.updated_at = now;
            Ok(Some(record.clone()))
        })
    }

    fn save<'a>(
        &'a self,
        id: Uuid,
        guard: SaveGuard,
        transition: &'a DeliveryTransition,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut records = self.lock_records();
            match records.get_mut(&id) {
                Some(record) if guard_holds(record, guard) => {
                    record.apply(transition, now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn query_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        after: Option<DueDelivery>,
        limit: usize,
    ) -> StoreFuture<'a, Vec<DueDelivery>> {
        Box::pin(async move {
            let records = self.lock_records();
            let mut due: Vec<DueDelivery> = records
                .values()
                .filter(|record| {
                    record.deleted_at.is_none()
                        && record.status == DeliveryStatus::Pending
                        && record.next_retry_at <= now
                        && record.expires_at > now
                        && !record.has_live_reservation(now)
                        && after.is_none_or(|cursor| {
                            (record.next_retry_at, record.id) > (cursor.next_retry_at, cursor.id)
                        })
                })
                .map(|record| DueDelivery {
                    id: record.id,
                    next_retry_at: record.next_retry_at,
                })
                .collect();

            due.sort_by_key(|item| (item.next_retry_at, item.id));
            due.truncate(limit);
            Ok(due)
        })
    }

    fn insert<'a>(
        &'a self,
        id: Uuid,
        new: NewDelivery,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreFuture<'a, DeliveryRecord> {
        Box::pin(async move {
            validate_new_delivery(&new)?;
            let record = DeliveryRecord::pending(id, new, now, ttl);
            self.lock_records().insert(id, record.clone());
            Ok(record)
        })
    }
}
