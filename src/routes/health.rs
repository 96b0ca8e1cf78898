use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::SharedState;

pub async fn healthz(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// Readiness: every dependency must answer.
pub async fn readyz(State(state): State<SharedState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let database = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let queue = state.queue.is_connected().await;

    let dependencies = json!({
        "database": if database { "connected" } else { "unavailable" },
        "queue": if queue { "connected" } else { "unavailable" },
    });

    if database && queue {
        Ok(Json(json!({ "status": "ready", "dependencies": dependencies })))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "dependencies": dependencies })),
        ))
    }
}
