use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_delivery_status;
use crate::models::{DeliveryStatus, Event, WebhookDelivery, WebhookEndpoint};

type DeliveryRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    i32,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_delivery(row: DeliveryRow) -> Result<WebhookDelivery, sqlx::Error> {
    Ok(WebhookDelivery {
        id: row.0,
        endpoint_id: row.1,
        event_id: row.2,
        status: parse_delivery_status(&row.3)?,
        attempt_count: row.4,
        last_error: row.5,
        next_retry_at: row.6,
        created_at: row.7,
        updated_at: row.8,
    })
}

pub async fn insert_delivery_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    endpoint_id: Uuid,
    event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO webhook_deliveries (id, endpoint_id, event_id, status, attempt_count)
        VALUES ($1, $2, $3, $4, 0)
        "#,
    )
    .bind(id)
    .bind(endpoint_id)
    .bind(event_id)
    .bind(DeliveryStatus::Pending.as_db())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn find_by_id(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<WebhookDelivery>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeliveryRow>(
        r#"
        SELECT id, endpoint_id, event_id, status, attempt_count, last_error,
               next_retry_at, created_at, updated_at
        FROM webhook_deliveries
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_delivery).transpose()
}

/// Load a delivery with its endpoint and event. `None` when the delivery,
/// its endpoint, or its event no longer exists.
pub async fn load_for_dispatch(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<(WebhookDelivery, WebhookEndpoint, Event)>, sqlx::Error> {
    let Some(delivery) = find_by_id(pool, id).await? else {
        return Ok(None);
    };

    type EndpointRow = (Uuid, String, String, Vec<String>, bool, DateTime<Utc>, DateTime<Utc>);
    let endpoint = sqlx::query_as::<_, EndpointRow>(
        r#"
        SELECT merchant_id, url, secret, events, is_active, created_at, updated_at
        FROM webhook_endpoints
        WHERE id = $1
        "#,
    )
    .bind(delivery.endpoint_id)
    .fetch_optional(pool)
    .await?;
    let Some(ep) = endpoint else {
        return Ok(None);
    };
    let endpoint = WebhookEndpoint {
        id: delivery.endpoint_id,
        merchant_id: ep.0,
        url: ep.1,
        secret: ep.2,
        events: ep.3,
        is_active: ep.4,
        created_at: ep.5,
        updated_at: ep.6,
    };

    let event = sqlx::query_as::<_, (String, JsonValue, DateTime<Utc>)>(
        r#"
        SELECT event_type, payload, created_at
        FROM events
        WHERE id = $1
        "#,
    )
    .bind(delivery.event_id)
    .fetch_optional(pool)
    .await?;
    let Some((event_type, payload, created_at)) = event else {
        return Ok(None);
    };
    let event = Event {
        id: delivery.event_id,
        event_type,
        payload,
        created_at,
    };

    Ok(Some((delivery, endpoint, event)))
}

/// Optimistic claim of the next attempt: increments `attempt_count` only if
/// the observed count still matches and the row is not terminal. Persisted
/// before the HTTP call so a crash mid-POST still counts as one attempt.
/// Returns the claimed attempt number, or `None` when another worker won.
pub async fn claim_attempt(
    pool: &PgPool,
    id: Uuid,
    observed_attempt_count: i32,
) -> Result<Option<i32>, sqlx::Error> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE webhook_deliveries
        SET attempt_count = attempt_count + 1, updated_at = NOW()
        WHERE id = $1
          AND attempt_count = $2
          AND status IN ('PENDING', 'FAILED')
        RETURNING attempt_count
        "#,
    )
    .bind(id)
    .bind(observed_attempt_count)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(count,)| count))
}

pub async fn mark_delivered(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'DELIVERED', last_error = NULL, next_retry_at = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    last_error: &str,
    next_retry_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'FAILED', last_error = $2, next_retry_at = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(last_error)
    .bind(next_retry_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_abandoned(
    pool: &PgPool,
    id: Uuid,
    last_error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'ABANDONED',
            last_error = COALESCE($2, last_error),
            next_retry_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Retry sweep: due FAILED deliveries below the attempt cap. The row locks
/// only guard the selection against a concurrent sweeper; ownership of each
/// delivery is still taken by `claim_attempt`.
pub async fn claim_due_retries(
    pool: &PgPool,
    now: DateTime<Utc>,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM webhook_deliveries
        WHERE status = 'FAILED'
          AND next_retry_at <= $1
          AND attempt_count < $2
        ORDER BY next_retry_at ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Bounded-batch reap of delivered rows past the retention window.
pub async fn delete_delivered_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    batch: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM webhook_deliveries
        WHERE id IN (
            SELECT id FROM webhook_deliveries
            WHERE status = 'DELIVERED' AND created_at < $1
            LIMIT $2
        )
        "#,
    )
    .bind(cutoff)
    .bind(batch)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
