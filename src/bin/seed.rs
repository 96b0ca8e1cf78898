//! Provision a merchant and print its raw API key once.
//!
//! Usage: `seed [merchant-name]`

use uuid::Uuid;

use openpayflow::repos::merchants;
use openpayflow::services::auth;
use openpayflow::db;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo-merchant".to_string());

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let api_key = format!("opf_{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let api_key_hash = auth::hash_api_key(&api_key);

    let merchant = merchants::insert_merchant(&pool, Uuid::new_v4(), &name, &api_key_hash).await?;

    println!("merchant id: {}", merchant.id);
    println!("merchant name: {}", merchant.name);
    println!("api key (shown once; only its hash is stored): {}", api_key);

    Ok(())
}
