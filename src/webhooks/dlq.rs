//! Dead-letter log for abandoned deliveries.
//!
//! The Postgres row is the durable record; the queue publish is a
//! best-effort signal for external consumers.

use sqlx::PgPool;

use crate::models::DeadLetterRecord;
use crate::queue::DeliveryQueue;

pub async fn record_abandoned(
    pool: &PgPool,
    queue: &dyn DeliveryQueue,
    record: &DeadLetterRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO dead_letter
            (record_type, delivery_id, endpoint_id, event_id, attempts, last_error, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&record.record_type)
    .bind(record.delivery_id)
    .bind(record.endpoint_id)
    .bind(record.event_id)
    .bind(record.attempts)
    .bind(record.last_error.as_deref())
    .bind(record.timestamp)
    .execute(pool)
    .await?;

    if let Err(e) = queue.publish_dead_letter(record).await {
        tracing::warn!(delivery_id = %record.delivery_id, error = %e, "Dead-letter publish failed");
    }

    tracing::error!(
        delivery_id = %record.delivery_id,
        endpoint_id = %record.endpoint_id,
        event_id = %record.event_id,
        attempts = record.attempts,
        last_error = record.last_error.as_deref().unwrap_or("-"),
        "Webhook delivery abandoned"
    );

    Ok(())
}
