use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};
use shared::models::{
    DeliveryRecord, DeliveryTable, DeliveryTransition, DueDelivery, NewDelivery, SaveGuard,
};
use shared::repos::StoreError;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::InMemoryDeliveryStore;
pub use postgres::PgDeliveryStore;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence seam for one record family.
///
/// Every write is a single-record conditional update: `reserve` only succeeds
/// on an unreserved `PENDING` record and `save` only commits while its
/// [`SaveGuard`] still holds, so overlapping workers cannot both finalize the
/// same record.
pub trait DeliveryStore: Send + Sync {
    fn table(&self) -> DeliveryTable;

    /// Returns the record unless it is missing or soft-deleted.
    fn load<'a>(&'a self, id: Uuid) -> StoreFuture<'a, Option<DeliveryRecord>>;

    fn reserve<'a>(
        &'a self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'a, Option<DeliveryRecord>>;

    fn save<'a>(
        &'a self,
        id: Uuid,
        guard: SaveGuard,
        transition: &'a DeliveryTransition,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, bool>;

    /// Non-deleted `PENDING` records with `next_retry_at <= now`,
    /// `expires_at > now` and no live reservation, ordered by
    /// `(next_retry_at, id)`. `after` resumes past the last item of the
    /// previous page.
    fn query_due<'a>(
        &'a self,
        now: DateTime<Utc>,
        after: Option<DueDelivery>,
        limit: usize,
    ) -> StoreFuture<'a, Vec<DueDelivery>>;

    fn insert<'a>(
        &'a self,
        id: Uuid,
        new: NewDelivery,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreFuture<'a, DeliveryRecord>;
}
