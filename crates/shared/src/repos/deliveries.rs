use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use url::Url;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::{
    DeliveryRecord, DeliveryStatus, DeliveryTable, DeliveryTransition, DueDelivery,
    FailedAttempt, NewDelivery, SaveGuard,
};

const DELIVERY_COLUMNS: &str = "id, url, payload, secret, event_type, status, attempt,
    created_at, updated_at, expires_at, next_retry_at, last_sent_at,
    last_http_status_code, last_response_body, last_error_message,
    reserved_by, reserved_until, deleted_at";

impl Store {
    pub async fn insert_delivery(
        &self,
        table: DeliveryTable,
        id: Uuid,
        new: NewDelivery,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<DeliveryRecord, StoreError> {
        validate_new_delivery(&new)?;
        let record = DeliveryRecord::pending(id, new, now, ttl);

        let sql = format!(
            "INSERT INTO {table} (
               id, url, payload, secret, event_type, status, attempt,
               created_at, updated_at, expires_at, next_retry_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $9, $10)
             RETURNING {DELIVERY_COLUMNS}",
            table = table.table_name(),
        );

        let row = sqlx::query(&sql)
            .bind(record.id)
            .bind(&record.url)
            .bind(&record.payload)
            .bind(&record.secret)
            .bind(record.event_type.as_deref())
            .bind(record.status.as_str())
            .bind(record.attempt)
            .bind(record.created_at)
            .bind(record.expires_at)
            .bind(record.next_retry_at)
            .fetch_one(&self.pool)
            .await?;

        delivery_from_row(row)
    }

    pub async fn get_delivery(
        &self,
        table: DeliveryTable,
        id: Uuid,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS}
             FROM {table}
             WHERE id = $1
               AND deleted_at IS NULL",
            table = table.table_name(),
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(delivery_from_row).transpose()
    }

    /// Takes a lease on a pending record unless another owner holds a live one.
    pub async fn reserve_delivery(
        &self,
        table: DeliveryTable,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let sql = format!(
            "UPDATE {table}
             SET reserved_by = $2,
                 reserved_until = $4,
                 updated_at = $3
             WHERE id = $1
               AND status = 'PENDING'
               AND deleted_at IS NULL
               AND (reserved_until IS NULL OR reserved_until <= $3)
             RETURNING {DELIVERY_COLUMNS}",
            table = table.table_name(),
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(owner)
            .bind(now)
            .bind(reserved_until)
            .fetch_optional(&self.pool)
            .await?;

        row.map(delivery_from_row).transpose()
    }

    /// Persists a worker transition. Returns `false` when the guard no longer
    /// matches, in which case nothing was written.
    pub async fn save_delivery_transition(
        &self,
        table: DeliveryTable,
        id: Uuid,
        guard: SaveGuard,
        transition: &DeliveryTransition,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let guard_clause = match guard {
            SaveGuard::ReservedBy(_) => "reserved_by = $3",
            SaveGuard::Unreserved { .. } => "(reserved_until IS NULL OR reserved_until <= $3)",
        };

        let rows_affected = match transition {
            DeliveryTransition::Expired { message } => {
                let sql = format!(
                    "UPDATE {table}
                     SET status = 'FAILED',
                         last_error_message = $4,
                         reserved_by = NULL,
                         reserved_until = NULL,
                         updated_at = $2
                     WHERE id = $1
                       AND status = 'PENDING'
                       AND {guard_clause}",
                    table = table.table_name(),
                );
                bind_guard(sqlx::query(&sql).bind(id).bind(now), guard)
                    .bind(message.as_str())
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            DeliveryTransition::Delivered {
                attempt,
                sent_at,
                http_status_code,
                response_body,
            } => {
                let columns = TransitionColumns {
                    status: DeliveryStatus::Success,
                    attempt: *attempt,
                    next_retry_at: None,
                    sent_at: *sent_at,
                    http_status_code: *http_status_code,
                    response_body: response_body.as_deref(),
                    error_message: None,
                };
                self.execute_attempt_update(table, id, guard, guard_clause, columns, now)
                    .await?
            }
            DeliveryTransition::Rescheduled {
                attempt,
                next_retry_at,
                failure,
            } => {
                let columns = TransitionColumns::from_failure(
                    DeliveryStatus::Pending,
                    *attempt,
                    Some(*next_retry_at),
                    failure,
                );
                self.execute_attempt_update(table, id, guard, guard_clause, columns, now)
                    .await?
            }
            DeliveryTransition::Exhausted { attempt, failure } => {
                let columns =
                    TransitionColumns::from_failure(DeliveryStatus::Failed, *attempt, None, failure);
                self.execute_attempt_update(table, id, guard, guard_clause, columns, now)
                    .await?
            }
        };

        Ok(rows_affected > 0)
    }

    async fn execute_attempt_update(
        &self,
        table: DeliveryTable,
        id: Uuid,
        guard: SaveGuard,
        guard_clause: &str,
        columns: TransitionColumns<'_>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {table}
             SET status = $4,
                 attempt = $5,
                 next_retry_at = COALESCE($6, next_retry_at),
                 last_sent_at = $7,
                 last_http_status_code = $8,
                 last_response_body = $9,
                 last_error_message = $10,
                 reserved_by = NULL,
                 reserved_until = NULL,
                 updated_at = $2
             WHERE id = $1
               AND status = 'PENDING'
               AND {guard_clause}",
            table = table.table_name(),
        );

        let result = bind_guard(sqlx::query(&sql).bind(id).bind(now), guard)
            .bind(columns.status.as_str())
            .bind(columns.attempt)
            .bind(columns.next_retry_at)
            .bind(columns.sent_at)
            .bind(columns.http_status_code)
            .bind(columns.response_body)
            .bind(columns.error_message)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// One page of due records in `(next_retry_at, id)` order, starting
    /// strictly after `after` when given.
    pub async fn list_due_deliveries(
        &self,
        table: DeliveryTable,
        now: DateTime<Utc>,
        after: Option<DueDelivery>,
        limit: i64,
    ) -> Result<Vec<DueDelivery>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, next_retry_at
             FROM {table}
             WHERE deleted_at IS NULL
               AND status = 'PENDING'
               AND next_retry_at <= $1
               AND expires_at > $1
               AND (reserved_until IS NULL OR reserved_until <= $1)
               AND ($3::timestamptz IS NULL OR (next_retry_at, id) > ($3, $4))
             ORDER BY next_retry_at ASC, id ASC
             LIMIT $2",
            table = table.table_name(),
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .bind(after.map(|cursor| cursor.next_retry_at))
            .bind(after.map(|cursor| cursor.id))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<DueDelivery, StoreError> {
                Ok(DueDelivery {
                    id: row.try_get("id")?,
                    next_retry_at: row.try_get("next_retry_at")?,
                })
            })
            .collect()
    }

    pub async fn count_due_deliveries(
        &self,
        table: DeliveryTable,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*)::bigint
             FROM {table}
             WHERE deleted_at IS NULL
               AND status = 'PENDING'
               AND next_retry_at <= $1
               AND expires_at > $1",
            table = table.table_name(),
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn soft_delete_delivery(
        &self,
        table: DeliveryTable,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {table}
             SET deleted_at = $2,
                 updated_at = $2
             WHERE id = $1
               AND deleted_at IS NULL",
            table = table.table_name(),
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub fn validate_new_delivery(new: &NewDelivery) -> Result<(), StoreError> {
    let url = Url::parse(new.url.trim())
        .map_err(|err| StoreError::InvalidInput(format!("url is not valid: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(StoreError::InvalidInput(format!(
            "url scheme must be http or https, got {}",
            url.scheme()
        )));
    }
    if new.secret.trim().is_empty() {
        return Err(StoreError::InvalidInput("secret must not be empty".to_string()));
    }
    if new.ttl_seconds == Some(0) {
        return Err(StoreError::InvalidInput(
            "ttl_seconds must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_guard(query: PgQuery<'_>, guard: SaveGuard) -> PgQuery<'_> {
    match guard {
        SaveGuard::ReservedBy(owner) => query.bind(owner),
        SaveGuard::Unreserved { now } => query.bind(now),
    }
}

struct TransitionColumns<'a> {
    status: DeliveryStatus,
    attempt: i32,
    next_retry_at: Option<DateTime<Utc>>,
    sent_at: DateTime<Utc>,
    http_status_code: Option<i32>,
    response_body: Option<&'a str>,
    error_message: Option<&'a str>,
}

impl<'a> TransitionColumns<'a> {
    fn from_failure(
        status: DeliveryStatus,
        attempt: i32,
        next_retry_at: Option<DateTime<Utc>>,
        failure: &'a FailedAttempt,
    ) -> Self {
        Self {
            status,
            attempt,
            next_retry_at,
            sent_at: failure.sent_at,
            http_status_code: failure.http_status_code,
            response_body: failure.response_body.as_deref(),
            error_message: Some(failure.error_message.as_str()),
        }
    }
}

fn delivery_from_row(row: sqlx::postgres::PgRow) -> Result<DeliveryRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = DeliveryStatus::from_db(&status).ok_or_else(|| {
        StoreError::InvalidData(format!("unknown delivery status persisted: {status}"))
    })?;

    Ok(DeliveryRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        payload: row.try_get("payload")?,
        secret: row.try_get("secret")?,
        event_type: row.try_get("event_type")?,
        status,
        attempt: row.try_get("attempt")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        last_sent_at: row.try_get("last_sent_at")?,
        last_http_status_code: row.try_get("last_http_status_code")?,
        last_response_body: row.try_get("last_response_body")?,
        last_error_message: row.try_get("last_error_message")?,
        reserved_by: row.try_get("reserved_by")?,
        reserved_until: row.try_get("reserved_until")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}
