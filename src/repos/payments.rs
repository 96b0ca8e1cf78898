use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{parse_attempt_status, parse_gateway_kind, parse_payment_status};
use crate::gateway::GatewayKind;
use crate::models::{AttemptStatus, Payment, PaymentAttempt, PaymentStatus};

/// Constraint backing the idempotency guarantee: two concurrent intakes with
/// the same key yield exactly one payment.
pub const IDEMPOTENCY_CONSTRAINT: &str = "payments_merchant_idempotency_key";

type PaymentRow = (
    Uuid,
    Uuid,
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    JsonValue,
    DateTime<Utc>,
    DateTime<Utc>,
);

const PAYMENT_COLUMNS: &str = "id, merchant_id, amount, currency, status, gateway, \
     provider_payment_id, idempotency_key, error_code, error_message, metadata, \
     created_at, updated_at";

fn row_to_payment(row: PaymentRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        id: row.0,
        merchant_id: row.1,
        amount: row.2,
        currency: row.3,
        status: parse_payment_status(&row.4)?,
        gateway: parse_gateway_kind(&row.5)?,
        provider_payment_id: row.6,
        idempotency_key: row.7,
        error_code: row.8,
        error_message: row.9,
        metadata: row.10,
        created_at: row.11,
        updated_at: row.12,
    })
}

pub struct NewPayment {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub gateway: GatewayKind,
    pub idempotency_key: String,
    pub metadata: JsonValue,
    pub attempt_id: Uuid,
}

/// Insert Payment(PENDING) and Attempt#1(PENDING). The caller owns the
/// transaction so the two rows commit together.
pub async fn insert_payment_with_attempt(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewPayment,
) -> Result<Payment, sqlx::Error> {
    let (created_at, updated_at) = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO payments
            (id, merchant_id, amount, currency, status, gateway, idempotency_key, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING created_at, updated_at
        "#,
    )
    .bind(new.id)
    .bind(new.merchant_id)
    .bind(new.amount)
    .bind(&new.currency)
    .bind(PaymentStatus::Pending.as_db())
    .bind(new.gateway.as_str())
    .bind(&new.idempotency_key)
    .bind(&new.metadata)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO payment_attempts (id, payment_id, attempt_no, status)
        VALUES ($1, $2, 1, $3)
        "#,
    )
    .bind(new.attempt_id)
    .bind(new.id)
    .bind(AttemptStatus::Pending.as_db())
    .execute(&mut **tx)
    .await?;

    Ok(Payment {
        id: new.id,
        merchant_id: new.merchant_id,
        amount: new.amount,
        currency: new.currency.clone(),
        status: PaymentStatus::Pending,
        gateway: new.gateway,
        provider_payment_id: None,
        idempotency_key: new.idempotency_key.clone(),
        error_code: None,
        error_message: None,
        metadata: new.metadata.clone(),
        created_at,
        updated_at,
    })
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE id = $1",
        PAYMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_payment).transpose()
}

pub async fn find_by_idempotency_key(
    pool: &PgPool,
    merchant_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE merchant_id = $1 AND idempotency_key = $2",
        PAYMENT_COLUMNS
    ))
    .bind(merchant_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_payment).transpose()
}

/// Advance payment and first attempt to PROCESSING ahead of the gateway call.
pub async fn mark_processing(
    pool: &PgPool,
    payment_id: Uuid,
    attempt_id: Uuid,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE payments SET status = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(payment_id)
    .bind(PaymentStatus::Processing.as_db())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE payment_attempts SET status = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(attempt_id)
    .bind(AttemptStatus::Processing.as_db())
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

pub struct PaymentSettlement<'a> {
    pub payment_id: Uuid,
    pub attempt_id: Uuid,
    pub payment_status: PaymentStatus,
    pub attempt_status: AttemptStatus,
    pub provider_payment_id: Option<&'a str>,
    pub provider_response: Option<&'a JsonValue>,
    pub error_code: Option<&'a str>,
    pub error_message: Option<&'a str>,
}

/// Record the gateway outcome on the payment and its attempt. Runs inside
/// the caller's transaction so the outbox row commits with it.
pub async fn settle_tx(
    tx: &mut Transaction<'_, Postgres>,
    settlement: &PaymentSettlement<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = $2,
            provider_payment_id = COALESCE($3, provider_payment_id),
            error_code = $4,
            error_message = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(settlement.payment_id)
    .bind(settlement.payment_status.as_db())
    .bind(settlement.provider_payment_id)
    .bind(settlement.error_code)
    .bind(settlement.error_message)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE payment_attempts
        SET status = $2,
            provider_response = $3,
            error_code = $4,
            error_message = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(settlement.attempt_id)
    .bind(settlement.attempt_status.as_db())
    .bind(settlement.provider_response)
    .bind(settlement.error_code)
    .bind(settlement.error_message)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[derive(Debug, Default)]
pub struct PaymentListFilter {
    pub status: Option<PaymentStatus>,
    pub gateway: Option<GatewayKind>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, merchant_id: Uuid, filter: &'a PaymentListFilter) {
    builder.push(" WHERE merchant_id = ").push_bind(merchant_id);
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_db());
    }
    if let Some(gateway) = filter.gateway {
        builder.push(" AND gateway = ").push_bind(gateway.as_str());
    }
    if let Some(start) = filter.start_date {
        builder.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        builder.push(" AND created_at <= ").push_bind(end);
    }
}

pub async fn list_for_merchant(
    pool: &PgPool,
    merchant_id: Uuid,
    filter: &PaymentListFilter,
) -> Result<(Vec<Payment>, i64), sqlx::Error> {
    let mut count_builder: QueryBuilder<Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM payments");
    push_filters(&mut count_builder, merchant_id, filter);
    let (total,): (i64,) = count_builder.build_query_as().fetch_one(pool).await?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM payments", PAYMENT_COLUMNS));
    push_filters(&mut builder, merchant_id, filter);
    builder
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let rows: Vec<PaymentRow> = builder.build_query_as().fetch_all(pool).await?;
    let payments = rows
        .into_iter()
        .map(row_to_payment)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((payments, total))
}

type AttemptRow = (
    Uuid,
    Uuid,
    i32,
    String,
    Option<String>,
    Option<String>,
    Option<JsonValue>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Latest attempts first, bounded by `limit`.
pub async fn attempts_for_payment(
    pool: &PgPool,
    payment_id: Uuid,
    limit: i64,
) -> Result<Vec<PaymentAttempt>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AttemptRow>(
        r#"
        SELECT id, payment_id, attempt_no, status, error_code, error_message,
               provider_response, created_at, updated_at
        FROM payment_attempts
        WHERE payment_id = $1
        ORDER BY attempt_no DESC
        LIMIT $2
        "#,
    )
    .bind(payment_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(PaymentAttempt {
                id: row.0,
                payment_id: row.1,
                attempt_no: row.2,
                status: parse_attempt_status(&row.3)?,
                error_code: row.4,
                error_message: row.5,
                provider_response: row.6,
                created_at: row.7,
                updated_at: row.8,
            })
        })
        .collect()
}

/// Lock the payment row for the duration of the caller's transaction.
/// Serializes concurrent refund creations against the same payment.
pub async fn lock_for_update(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(row_to_payment).transpose()
}
