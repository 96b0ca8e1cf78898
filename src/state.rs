use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::gateway::GatewayRegistry;
use crate::models::Merchant;
use crate::queue::DeliveryQueue;
use crate::webhooks::RetryPolicy;

/// Shared handles for HTTP handlers and background tasks. Passed explicitly;
/// no process-global state.
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub gateways: GatewayRegistry,
    pub queue: Arc<dyn DeliveryQueue>,
    /// Client for outbound webhook POSTs.
    pub http: reqwest::Client,
    pub merchant_cache: TtlCache<Merchant>,
    pub idempotency_cache: TtlCache<Uuid>,
    pub retry_policy: RetryPolicy,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.config.webhook_timeout_ms)
    }

    pub fn max_attempts(&self) -> i32 {
        self.config.webhook_max_retries
    }
}
