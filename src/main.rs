use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openpayflow::cache::TtlCache;
use openpayflow::config::Config;
use openpayflow::events::start_outbox_drainer;
use openpayflow::gateway::GatewayRegistry;
use openpayflow::housekeeper::start_housekeeper;
use openpayflow::webhooks::{start_delivery_consumer, start_retry_sweeper, RetryPolicy};
use openpayflow::{db, queue, routes, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,openpayflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cfg = Config::from_env()?;
    tracing::info!("config loaded");

    let pool = db::init_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("db connected + migrations applied");

    let work_queue = queue::build_queue(&cfg).await?;
    let gateways = GatewayRegistry::from_config(&cfg)?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(cfg.webhook_timeout_ms))
        .build()?;

    let addr = format!("{}:{}", cfg.host, cfg.port);

    let state = Arc::new(AppState {
        db: pool,
        config: cfg,
        gateways,
        queue: work_queue,
        http,
        merchant_cache: TtlCache::new(),
        idempotency_cache: TtlCache::new(),
        retry_policy: RetryPolicy::default(),
        started_at: Instant::now(),
    });

    // Background tasks: drainer, queue consumer, retry sweep, housekeeper.
    // Each exits at its next tick once the shutdown flag flips.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = start_delivery_consumer(state.clone(), shutdown_rx.clone());
    let drainer = start_outbox_drainer(state.clone(), shutdown_rx.clone());
    let sweeper = start_retry_sweeper(state.clone(), shutdown_rx.clone());
    let keeper = start_housekeeper(state.clone(), shutdown_rx);

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // New work is refused from here; drain the background tasks within a
    // grace window.
    let _ = shutdown_tx.send(true);
    let tasks = futures::future::join_all([consumer, drainer, sweeper, keeper]);
    if tokio::time::timeout(Duration::from_secs(10), tasks).await.is_err() {
        tracing::warn!("background tasks did not stop within the grace window");
    }
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
