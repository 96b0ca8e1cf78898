use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_refund_status;
use crate::models::{Refund, RefundStatus};

type RefundRow = (
    Uuid,
    Uuid,
    i64,
    String,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const REFUND_COLUMNS: &str =
    "id, payment_id, amount, status, reason, provider_refund_id, created_at, updated_at";

fn row_to_refund(row: RefundRow) -> Result<Refund, sqlx::Error> {
    Ok(Refund {
        id: row.0,
        payment_id: row.1,
        amount: row.2,
        status: parse_refund_status(&row.3)?,
        reason: row.4,
        provider_refund_id: row.5,
        created_at: row.6,
        updated_at: row.7,
    })
}

/// Sum of refunds already settled SUCCEEDED for this payment.
pub async fn sum_succeeded_tx(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> Result<i64, sqlx::Error> {
    let (sum,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount), 0)::BIGINT
        FROM refunds
        WHERE payment_id = $1 AND status = 'SUCCEEDED'
        "#,
    )
    .bind(payment_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(sum)
}

pub async fn insert_refund_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    payment_id: Uuid,
    amount: i64,
    reason: Option<&str>,
) -> Result<Refund, sqlx::Error> {
    let (created_at, updated_at) = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO refunds (id, payment_id, amount, status, reason)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(payment_id)
    .bind(amount)
    .bind(RefundStatus::Pending.as_db())
    .bind(reason)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Refund {
        id,
        payment_id,
        amount,
        status: RefundStatus::Pending,
        reason: reason.map(|s| s.to_string()),
        provider_refund_id: None,
        created_at,
        updated_at,
    })
}

pub async fn mark_processing(pool: &PgPool, refund_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE refunds SET status = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(refund_id)
    .bind(RefundStatus::Processing.as_db())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the gateway outcome inside the caller's transaction so the outbox
/// row commits with the status write.
pub async fn settle_tx(
    tx: &mut Transaction<'_, Postgres>,
    refund_id: Uuid,
    status: RefundStatus,
    provider_refund_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE refunds
        SET status = $2,
            provider_refund_id = COALESCE($3, provider_refund_id),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(refund_id)
    .bind(status.as_db())
    .bind(provider_refund_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Refund>, sqlx::Error> {
    let row = sqlx::query_as::<_, RefundRow>(&format!(
        "SELECT {} FROM refunds WHERE id = $1",
        REFUND_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_refund).transpose()
}

pub async fn list_for_payment(
    pool: &PgPool,
    payment_id: Uuid,
) -> Result<Vec<Refund>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RefundRow>(&format!(
        "SELECT {} FROM refunds WHERE payment_id = $1 ORDER BY created_at ASC",
        REFUND_COLUMNS
    ))
    .bind(payment_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_refund).collect()
}
