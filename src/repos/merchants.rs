use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Merchant;

pub async fn find_by_api_key_hash(
    pool: &PgPool,
    api_key_hash: &str,
) -> Result<Option<Merchant>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, String, String, DateTime<Utc>)>(
        r#"
        SELECT id, name, api_key_hash, created_at
        FROM merchants
        WHERE api_key_hash = $1
        "#,
    )
    .bind(api_key_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, name, api_key_hash, created_at)| Merchant {
        id,
        name,
        api_key_hash,
        created_at,
    }))
}

pub async fn insert_merchant(
    pool: &PgPool,
    id: Uuid,
    name: &str,
    api_key_hash: &str,
) -> Result<Merchant, sqlx::Error> {
    let (created_at,) = sqlx::query_as::<_, (DateTime<Utc>,)>(
        r#"
        INSERT INTO merchants (id, name, api_key_hash)
        VALUES ($1, $2, $3)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(api_key_hash)
    .fetch_one(pool)
    .await?;

    Ok(Merchant {
        id,
        name: name.to_string(),
        api_key_hash: api_key_hash.to_string(),
        created_at,
    })
}
