//! Transactional outbox: rows are written in the same transaction as the
//! state change they describe, then drained into externally visible events
//! exactly once.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::OutboxRow;

pub async fn insert_outbox_row(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    payload: &JsonValue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events_outbox (id, aggregate_type, aggregate_id, event_type, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(event_type)
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Oldest-first unprocessed row ids, bounded by `limit`.
pub async fn fetch_unprocessed_ids(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM events_outbox
        WHERE NOT processed
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Claim one unprocessed row for the duration of the caller's transaction.
/// SKIP LOCKED keeps concurrent drainer instances off each other's rows;
/// the processed re-check covers rows finished between poll and claim.
pub async fn lock_unprocessed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<OutboxRow>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, String, String, String, JsonValue, bool, DateTime<Utc>)>(
        r#"
        SELECT id, aggregate_type, aggregate_id, event_type, payload, processed, created_at
        FROM events_outbox
        WHERE id = $1 AND NOT processed
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(
        |(id, aggregate_type, aggregate_id, event_type, payload, processed, created_at)| OutboxRow {
            id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            processed,
            created_at,
        },
    ))
}

pub async fn mark_processed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE events_outbox
        SET processed = TRUE, processed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Bounded-batch reap of processed rows past the retention window.
pub async fn delete_processed_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    batch: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM events_outbox
        WHERE id IN (
            SELECT id FROM events_outbox
            WHERE processed AND created_at < $1
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
