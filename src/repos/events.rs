use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Event;

pub async fn insert_event_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    event_type: &str,
    payload: &JsonValue,
) -> Result<Event, sqlx::Error> {
    let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
        r#"
        INSERT INTO events (id, event_type, payload)
        VALUES ($1, $2, $3)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Event {
        id,
        event_type: event_type.to_string(),
        payload: payload.clone(),
        created_at,
    })
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Event>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, String, JsonValue, DateTime<Utc>)>(
        r#"
        SELECT id, event_type, payload, created_at
        FROM events
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, event_type, payload, created_at)| Event {
        id,
        event_type,
        payload,
        created_at,
    }))
}

/// Reap aged events that no non-terminal delivery still references.
pub async fn delete_aged_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    batch: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM events
        WHERE id IN (
            SELECT e.id FROM events e
            WHERE e.created_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM webhook_deliveries d
                  WHERE d.event_id = e.id
                    AND d.status NOT IN ('DELIVERED', 'ABANDONED')
              )
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
