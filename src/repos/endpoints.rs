use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::WebhookEndpoint;

type EndpointRow = (
    Uuid,
    Uuid,
    String,
    String,
    Vec<String>,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ENDPOINT_COLUMNS: &str =
    "id, merchant_id, url, secret, events, is_active, created_at, updated_at";

fn row_to_endpoint(row: EndpointRow) -> WebhookEndpoint {
    WebhookEndpoint {
        id: row.0,
        merchant_id: row.1,
        url: row.2,
        secret: row.3,
        events: row.4,
        is_active: row.5,
        created_at: row.6,
        updated_at: row.7,
    }
}

pub async fn insert_endpoint(
    pool: &PgPool,
    id: Uuid,
    merchant_id: Uuid,
    url: &str,
    secret: &str,
    events: &[String],
) -> Result<WebhookEndpoint, sqlx::Error> {
    let (created_at, updated_at) = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO webhook_endpoints (id, merchant_id, url, secret, events)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(merchant_id)
    .bind(url)
    .bind(secret)
    .bind(events)
    .fetch_one(pool)
    .await?;

    Ok(WebhookEndpoint {
        id,
        merchant_id,
        url: url.to_string(),
        secret: secret.to_string(),
        events: events.to_vec(),
        is_active: true,
        created_at,
        updated_at,
    })
}

pub async fn find_for_merchant(
    pool: &PgPool,
    merchant_id: Uuid,
    id: Uuid,
) -> Result<Option<WebhookEndpoint>, sqlx::Error> {
    let row = sqlx::query_as::<_, EndpointRow>(&format!(
        "SELECT {} FROM webhook_endpoints WHERE id = $1 AND merchant_id = $2",
        ENDPOINT_COLUMNS
    ))
    .bind(id)
    .bind(merchant_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_endpoint))
}

pub async fn list_for_merchant(
    pool: &PgPool,
    merchant_id: Uuid,
) -> Result<Vec<WebhookEndpoint>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EndpointRow>(&format!(
        "SELECT {} FROM webhook_endpoints WHERE merchant_id = $1 ORDER BY created_at ASC",
        ENDPOINT_COLUMNS
    ))
    .bind(merchant_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_endpoint).collect())
}

pub struct EndpointPatch<'a> {
    pub url: Option<&'a str>,
    pub secret: Option<&'a str>,
    pub events: Option<&'a [String]>,
    pub is_active: Option<bool>,
}

pub async fn update_endpoint(
    pool: &PgPool,
    merchant_id: Uuid,
    id: Uuid,
    patch: &EndpointPatch<'_>,
) -> Result<Option<WebhookEndpoint>, sqlx::Error> {
    let row = sqlx::query_as::<_, EndpointRow>(&format!(
        r#"
        UPDATE webhook_endpoints
        SET url = COALESCE($3, url),
            secret = COALESCE($4, secret),
            events = COALESCE($5, events),
            is_active = COALESCE($6, is_active),
            updated_at = NOW()
        WHERE id = $1 AND merchant_id = $2
        RETURNING {}
        "#,
        ENDPOINT_COLUMNS
    ))
    .bind(id)
    .bind(merchant_id)
    .bind(patch.url)
    .bind(patch.secret)
    .bind(patch.events)
    .bind(patch.is_active)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_endpoint))
}

pub async fn delete_endpoint(
    pool: &PgPool,
    merchant_id: Uuid,
    id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM webhook_endpoints
        WHERE id = $1 AND merchant_id = $2
        "#,
    )
    .bind(id)
    .bind(merchant_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Active endpoints subscribed to the given event type, read inside the
/// drainer's per-row transaction.
pub async fn find_active_subscribed_tx(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
) -> Result<Vec<WebhookEndpoint>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EndpointRow>(&format!(
        "SELECT {} FROM webhook_endpoints WHERE is_active AND $1 = ANY(events)",
        ENDPOINT_COLUMNS
    ))
    .bind(event_type)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().map(row_to_endpoint).collect())
}
