//! Per-client rate limiting on the /v1 surface.
//!
//! Keyed limiters: each client IP gets its own direct limiter sized from
//! `RATE_LIMIT_MAX` per `RATE_LIMIT_WINDOW_MS`.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use super::request_id::RequestId;
use crate::error::ApiError;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimitState {
    limiters: DashMap<String, Arc<DirectLimiter>>,
    max: u32,
    window: Duration,
}

impl RateLimitState {
    pub fn new(max: u32, window_ms: u64) -> Self {
        Self {
            limiters: DashMap::new(),
            max: max.max(1),
            window: Duration::from_millis(window_ms.max(1)),
        }
    }

    fn limiter_for(&self, key: &str) -> Arc<DirectLimiter> {
        if let Some(limiter) = self.limiters.get(key) {
            return limiter.clone();
        }

        let burst = NonZeroU32::new(self.max).unwrap_or(NonZeroU32::MIN);
        let replenish = self.window / self.max;
        let quota = Quota::with_period(replenish)
            .unwrap_or_else(|| Quota::per_minute(burst))
            .allow_burst(burst);

        let limiter = Arc::new(RateLimiter::direct(quota));
        self.limiters.insert(key.to_string(), limiter.clone());
        limiter
    }

    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.limiter_for(key)
            .check()
            .map_err(|n| n.wait_time_from(DefaultClock::default().now()))
    }
}

/// Prefer X-Forwarded-For (first hop), then X-Real-IP.
fn client_ip(headers: &HeaderMap) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            return ip.to_string();
        }
    }
    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = xri.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    "unknown".to_string()
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers());

    match state.check(&ip) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            let correlation_id = req
                .extensions()
                .get::<RequestId>()
                .map(|r| r.0.clone())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(ip = %ip, wait_ms = wait.as_millis() as u64, "Rate limit exceeded");
            ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests",
                correlation_id,
            )
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_rejects() {
        let state = RateLimitState::new(3, 60_000);
        assert!(state.check("1.2.3.4").is_ok());
        assert!(state.check("1.2.3.4").is_ok());
        assert!(state.check("1.2.3.4").is_ok());
        assert!(state.check("1.2.3.4").is_err());
    }

    #[test]
    fn keys_are_independent() {
        let state = RateLimitState::new(1, 60_000);
        assert!(state.check("1.1.1.1").is_ok());
        assert!(state.check("2.2.2.2").is_ok());
        assert!(state.check("1.1.1.1").is_err());
    }

    #[test]
    fn forwarded_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "9.9.9.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "8.8.8.8".parse().unwrap());
        assert_eq!(client_ip(&headers), "9.9.9.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "8.8.8.8".parse().unwrap());
        assert_eq!(client_ip(&headers), "8.8.8.8");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
