use chrono::{DateTime, Duration, Utc};
use shared::models::{
    DeliveryRecord, DeliveryTable, DeliveryTransition, DueDelivery, NewDelivery, SaveGuard,
};
use shared::repos::Store;
use uuid::Uuid;

use super::{DeliveryStore, StoreFuture};

/// [`DeliveryStore`] over one Postgres table.
#[derive(Clone)]
pub struct PgDeliveryStore {
    store: Store,
    table: DeliveryTable,
}

impl PgDeliveryStore {
    pub fn new(store: Store, table: DeliveryTable) -> Self {
        Self { store, table }
    }
}

impl DeliveryStore for PgDeliveryStore {
    fn table(&self) -> DeliveryTable {
        self.table
    }

    fn load<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<DeliveryRecord>> {
        Box::pin(self.store.get_delivery(self.table, id))
    }

    fn reserve<'a>(
        &'a self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<DeliveryRecord>> {
        Box::pin(
            self.store
                .reserve_delivery(self.table, id, owner, now, reserved_until),
        )
    }

    fn save<'a>(
        &'a self,
        id: Uuid,
        guard: SaveGuard,
        transition: &'a DeliveryTransition,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool> {
        Box::pin(
            self.store
                .save_delivery_transition(self.table, id, guard, transition, now),
        )
    }

    fn query_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        after: Option<DueDelivery>,
        limit: usize,
    ) -> StoreFuture<'a, Vec<DueDelivery>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(self.store.list_due_deliveries(self.table, now, after, limit))
    }

    fn insert<'a>(
        &'a self,
        id: Uuid,
        new: NewDelivery,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreFuture<'a, DeliveryRecord> {
        Box::pin(self.store.insert_delivery(self.table, id, new, now, ttl))
    }
}
