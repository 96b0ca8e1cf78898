pub mod health;
pub mod payments;
pub mod refunds;
pub mod webhook_endpoints;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::rate_limit::{rate_limit_middleware, RateLimitState};
use crate::middleware::request_id::request_id_middleware;
use crate::state::SharedState;

/// `{success:true, data}` envelope shared by every 2xx response.
pub(crate) fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn router(state: SharedState) -> Router {
    let rate_limit = Arc::new(RateLimitState::new(
        state.config.rate_limit_max,
        state.config.rate_limit_window_ms,
    ));

    let v1 = Router::new()
        .route(
            "/v1/payments",
            post(payments::create_payment).get(payments::list_payments),
        )
        .route("/v1/payments/{id}", get(payments::get_payment))
        .route("/v1/refunds", post(refunds::create_refund))
        .route("/v1/refunds/{id}", get(refunds::get_refund))
        .route(
            "/v1/webhook-endpoints",
            post(webhook_endpoints::create_endpoint).get(webhook_endpoints::list_endpoints),
        )
        .route(
            "/v1/webhook-endpoints/{id}",
            get(webhook_endpoints::get_endpoint)
                .patch(webhook_endpoints::update_endpoint)
                .delete(webhook_endpoints::delete_endpoint),
        )
        .layer(from_fn_with_state(rate_limit, rate_limit_middleware));

    Router::new()
        .merge(v1)
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
