//! End-to-end spine tests against a real Postgres: intake, outbox drain,
//! webhook delivery, retry, abandonment, refund bounds.
//!
//! Skipped (with a note) when `DATABASE_URL` is not set.

mod common;

use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use openpayflow::cache::TtlCache;
use openpayflow::config::Config;
use openpayflow::db;
use openpayflow::events::drainer;
use openpayflow::gateway::{GatewayKind, GatewayRegistry};
use openpayflow::models::{Merchant, PaymentStatus, RefundStatus};
use openpayflow::queue::{DeliveryQueue, InMemoryQueue};
use openpayflow::repos::endpoints;
use openpayflow::services::auth::hash_api_key;
use openpayflow::services::payments::{self, CreatePaymentInput};
use openpayflow::services::refunds;
use openpayflow::webhooks::scheduler;
use openpayflow::webhooks::RetryPolicy;
use openpayflow::{AppState, ServiceError};

async fn setup_state(success_rate: f64) -> Option<Arc<AppState>> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping orchestration test");
        return None;
    };

    let pool = db::init_pool(&database_url).await.expect("connect test db");
    db::run_migrations(&pool).await.expect("run migrations");

    let config = Config {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 0,
        queue_type: "inmemory".to_string(),
        nats_url: String::new(),
        enable_stripe: false,
        enable_razorpay: false,
        enable_mock: true,
        stripe_secret_key: None,
        razorpay_key_id: None,
        razorpay_key_secret: None,
        rate_limit_max: 10_000,
        rate_limit_window_ms: 60_000,
        webhook_timeout_ms: 5_000,
        webhook_max_retries: 10,
        mock_success_rate: success_rate,
        mock_average_latency_ms: 0,
        mock_enable_chaos: false,
        mock_chaos_rate: 0.0,
    };

    let gateways = GatewayRegistry::from_config(&config).expect("gateway registry");
    let queue: Arc<dyn DeliveryQueue> = Arc::new(InMemoryQueue::new());
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("http client");

    Some(Arc::new(AppState {
        db: pool,
        config,
        gateways,
        queue,
        http,
        merchant_cache: TtlCache::new(),
        idempotency_cache: TtlCache::new(),
        retry_policy: RetryPolicy::default(),
        started_at: Instant::now(),
    }))
}

async fn reset_db(pool: &PgPool) {
    for table in [
        "dead_letter",
        "webhook_deliveries",
        "webhook_endpoints",
        "events",
        "events_outbox",
        "payment_attempts",
        "refunds",
        "payments",
        "merchants",
    ] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(pool)
            .await
            .expect("clean table");
    }
}

async fn seed_merchant(pool: &PgPool) -> (Merchant, String) {
    let api_key = format!("key_{}", Uuid::new_v4().simple());
    let merchant = openpayflow::repos::merchants::insert_merchant(
        pool,
        Uuid::new_v4(),
        "test-merchant",
        &hash_api_key(&api_key),
    )
    .await
    .expect("seed merchant");
    (merchant, api_key)
}

fn intake(amount: i64) -> CreatePaymentInput {
    CreatePaymentInput {
        amount,
        currency: "USD".to_string(),
        gateway: GatewayKind::Mock,
        metadata: Some(json!({"orderId": "o1"})),
    }
}

async fn outbox_count(pool: &PgPool, event_type: &str) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM events_outbox WHERE event_type = $1")
            .bind(event_type)
            .fetch_one(pool)
            .await
            .expect("count outbox");
    count
}

async fn delivery_ids(pool: &PgPool) -> Vec<Uuid> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT id FROM webhook_deliveries ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .expect("list deliveries");
    rows.into_iter().map(|(id,)| id).collect()
}

async fn delivery_row(pool: &PgPool, id: Uuid) -> (String, i32, Option<String>) {
    sqlx::query_as(
        "SELECT status, attempt_count, last_error FROM webhook_deliveries WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("delivery row")
}

/// Happy path: intake settles SUCCEEDED, the outbox drains into exactly one
/// event, and the subscribed endpoint receives one signed delivery.
#[tokio::test]
#[serial]
async fn intake_drain_deliver_happy_path() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (merchant, api_key) = seed_merchant(&state.db).await;

    let receiver = common::spawn_receiver(0).await;
    let secret = "whsec_orchestration";
    endpoints::insert_endpoint(
        &state.db,
        Uuid::new_v4(),
        merchant.id,
        &receiver.url,
        secret,
        &["payment.created".to_string()],
    )
    .await
    .expect("create endpoint");

    // A second endpoint on another event type must see no delivery.
    endpoints::insert_endpoint(
        &state.db,
        Uuid::new_v4(),
        merchant.id,
        &receiver.url,
        secret,
        &["refund.created".to_string()],
    )
    .await
    .expect("create second endpoint");

    let payment = payments::create_payment(&state, &api_key, "idem-1", intake(1999), "corr-s1")
        .await
        .expect("intake");
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert!(payment.provider_payment_id.is_some());
    assert_eq!(outbox_count(&state.db, "payment.created").await, 1);

    let drained = drainer::drain_once(&state).await.expect("drain");
    assert_eq!(drained, 1);

    let (event_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM events WHERE event_type = 'payment.created'")
            .fetch_one(&state.db)
            .await
            .expect("count events");
    assert_eq!(event_count, 1);

    let ids = delivery_ids(&state.db).await;
    assert_eq!(ids.len(), 1, "only the subscribed endpoint gets a delivery");

    scheduler::process_delivery(&state, ids[0])
        .await
        .expect("process delivery");

    let (status, attempts, last_error) = delivery_row(&state.db, ids[0]).await;
    assert_eq!(status, "DELIVERED");
    assert_eq!(attempts, 1);
    assert_eq!(last_error, None);
    assert_eq!(receiver.hits(), 1);

    // Receiver-side signature check over the raw body.
    let captured = receiver.captured().await;
    let signature_header = captured[0]
        .headers
        .get("x-openpayflow-signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(openpayflow::webhooks::signature::verify(
        secret,
        &captured[0].body,
        signature_header
    ));

    // Draining again must not double-produce.
    let drained = drainer::drain_once(&state).await.expect("re-drain");
    assert_eq!(drained, 0);
    let (event_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
        .fetch_one(&state.db)
        .await
        .expect("count events");
    assert_eq!(event_count, 1);
}

/// Concurrent intakes with one idempotency key yield exactly one payment and
/// every caller sees the same id.
#[tokio::test]
#[serial]
async fn concurrent_idempotent_replay() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (_merchant, api_key) = seed_merchant(&state.db).await;

    let (a, b, c) = tokio::join!(
        payments::create_payment(&state, &api_key, "idem-2", intake(1999), "corr-a"),
        payments::create_payment(&state, &api_key, "idem-2", intake(1999), "corr-b"),
        payments::create_payment(&state, &api_key, "idem-2", intake(1999), "corr-c"),
    );

    let a = a.expect("first");
    let b = b.expect("second");
    let c = c.expect("third");
    assert_eq!(a.id, b.id);
    assert_eq!(b.id, c.id);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments")
        .fetch_one(&state.db)
        .await
        .expect("count payments");
    assert_eq!(count, 1);

    // Replay after settlement returns the stored row unchanged.
    let replay = payments::create_payment(&state, &api_key, "idem-2", intake(5), "corr-d")
        .await
        .expect("replay");
    assert_eq!(replay.id, a.id);
    assert_eq!(replay.amount, 1999);
}

/// Gateway decline: the caller sees a 5xx fault, but the payment, its failed
/// attempt, and the outbox row are all persisted.
#[tokio::test]
#[serial]
async fn gateway_failure_persists_failed_payment() {
    let Some(state) = setup_state(0.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (_merchant, api_key) = seed_merchant(&state.db).await;

    let err = payments::create_payment(&state, &api_key, "idem-3", intake(1999), "corr-s3")
        .await
        .expect_err("intake must surface the fault");
    match &err {
        ServiceError::Gateway(fault) => {
            assert_eq!(fault.http_status, Some(502));
        }
        other => panic!("expected gateway fault, got {:?}", other),
    }

    let (status, error_code): (String, Option<String>) =
        sqlx::query_as("SELECT status, error_code FROM payments")
            .fetch_one(&state.db)
            .await
            .expect("payment row");
    assert_eq!(status, "FAILED");
    assert_eq!(error_code.as_deref(), Some("card_declined"));

    let (attempt_status, attempt_error): (String, Option<String>) =
        sqlx::query_as("SELECT status, error_code FROM payment_attempts WHERE attempt_no = 1")
            .fetch_one(&state.db)
            .await
            .expect("attempt row");
    assert_eq!(attempt_status, "FAILED");
    assert!(attempt_error.is_some());

    assert_eq!(outbox_count(&state.db, "payment.created").await, 1);
}

/// Transient receiver failures: three 500s then a 200 leave the delivery
/// DELIVERED at attempt 4, with strictly increasing retry times on the way.
#[tokio::test]
#[serial]
async fn retry_until_delivered() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (merchant, api_key) = seed_merchant(&state.db).await;

    let receiver = common::spawn_receiver(3).await;
    endpoints::insert_endpoint(
        &state.db,
        Uuid::new_v4(),
        merchant.id,
        &receiver.url,
        "whsec_retry",
        &["payment.created".to_string()],
    )
    .await
    .expect("create endpoint");

    payments::create_payment(&state, &api_key, "idem-4", intake(1999), "corr-s4")
        .await
        .expect("intake");
    drainer::drain_once(&state).await.expect("drain");
    let ids = delivery_ids(&state.db).await;
    assert_eq!(ids.len(), 1);

    let mut retry_times = Vec::new();
    for _ in 0..3 {
        scheduler::process_delivery(&state, ids[0])
            .await
            .expect("attempt");
        let (next_retry_at,): (Option<chrono::DateTime<chrono::Utc>>,) =
            sqlx::query_as("SELECT next_retry_at FROM webhook_deliveries WHERE id = $1")
                .bind(ids[0])
                .fetch_one(&state.db)
                .await
                .expect("delivery row");
        retry_times.push(next_retry_at.expect("failed delivery has next_retry_at"));

        let (status, _, last_error) = delivery_row(&state.db, ids[0]).await;
        assert_eq!(status, "FAILED");
        assert_eq!(last_error.as_deref(), Some("http:500"));
    }
    assert!(retry_times.windows(2).all(|w| w[0] < w[1]));

    scheduler::process_delivery(&state, ids[0])
        .await
        .expect("final attempt");
    let (status, attempts, last_error) = delivery_row(&state.db, ids[0]).await;
    assert_eq!(status, "DELIVERED");
    assert_eq!(attempts, 4);
    assert_eq!(last_error, None);
    assert_eq!(receiver.hits(), 4);
}

/// A receiver that never recovers: the delivery is abandoned at the attempt
/// cap and a dead-letter record is written; further work is a no-op.
#[tokio::test]
#[serial]
async fn abandonment_after_max_attempts() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (merchant, api_key) = seed_merchant(&state.db).await;

    let receiver = common::spawn_receiver(usize::MAX).await;
    endpoints::insert_endpoint(
        &state.db,
        Uuid::new_v4(),
        merchant.id,
        &receiver.url,
        "whsec_abandon",
        &["payment.created".to_string()],
    )
    .await
    .expect("create endpoint");

    payments::create_payment(&state, &api_key, "idem-5", intake(1999), "corr-s5")
        .await
        .expect("intake");
    drainer::drain_once(&state).await.expect("drain");
    let ids = delivery_ids(&state.db).await;
    assert_eq!(ids.len(), 1);

    for _ in 0..10 {
        scheduler::process_delivery(&state, ids[0])
            .await
            .expect("attempt");
    }

    let (status, attempts, last_error) = delivery_row(&state.db, ids[0]).await;
    assert_eq!(status, "ABANDONED");
    assert_eq!(attempts, 10);
    assert_eq!(last_error.as_deref(), Some("http:500"));

    let (record_type, recorded_attempts): (String, i32) = sqlx::query_as(
        "SELECT record_type, attempts FROM dead_letter WHERE delivery_id = $1",
    )
    .bind(ids[0])
    .fetch_one(&state.db)
    .await
    .expect("dead letter row");
    assert_eq!(record_type, "webhook_delivery_abandoned");
    assert_eq!(recorded_attempts, 10);

    // Terminal state is sticky: another pass changes nothing.
    scheduler::process_delivery(&state, ids[0])
        .await
        .expect("late arrival");
    let (status, attempts, _) = delivery_row(&state.db, ids[0]).await;
    assert_eq!(status, "ABANDONED");
    assert_eq!(attempts, 10);
    assert_eq!(receiver.hits(), 10);
}

/// Refund bounds: a partial refund settles, an over-refund is rejected with
/// no row created.
#[tokio::test]
#[serial]
async fn over_refund_is_rejected() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;
    let (_merchant, api_key) = seed_merchant(&state.db).await;

    let payment = payments::create_payment(&state, &api_key, "idem-6", intake(1000), "corr-s6")
        .await
        .expect("intake");
    assert_eq!(payment.status, PaymentStatus::Succeeded);

    let refund = refunds::create_refund(
        &state,
        &api_key,
        payment.id,
        Some(600),
        Some("requested_by_customer".to_string()),
        "corr-r1",
    )
    .await
    .expect("partial refund");
    assert_eq!(refund.status, RefundStatus::Succeeded);
    assert_eq!(outbox_count(&state.db, "refund.created").await, 1);

    let err = refunds::create_refund(&state, &api_key, payment.id, Some(500), None, "corr-r2")
        .await
        .expect_err("over-refund must be rejected");
    assert_eq!(err.code(), "REFUND_AMOUNT_EXCEEDS_PAYMENT");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refunds")
        .fetch_one(&state.db)
        .await
        .expect("count refunds");
    assert_eq!(count, 1, "rejected refund must not create a row");

    // The remainder is still refundable.
    let rest = refunds::create_refund(&state, &api_key, payment.id, None, None, "corr-r3")
        .await
        .expect("refund remainder");
    assert_eq!(rest.amount, 400);
}

/// An unknown API key is rejected before any state change.
#[tokio::test]
#[serial]
async fn unknown_api_key_is_unauthorized() {
    let Some(state) = setup_state(1.0).await else {
        return;
    };
    reset_db(&state.db).await;

    let err = payments::create_payment(&state, "not-a-key", "idem-7", intake(100), "corr-x")
        .await
        .expect_err("must reject");
    assert!(matches!(err, ServiceError::InvalidApiKey));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payments")
        .fetch_one(&state.db)
        .await
        .expect("count payments");
    assert_eq!(count, 0);
}
