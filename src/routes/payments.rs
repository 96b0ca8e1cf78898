use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::success;
use crate::error::ApiError;
use crate::gateway::GatewayKind;
use crate::middleware::RequestId;
use crate::models::{Payment, PaymentAttempt, PaymentStatus, Refund};
use crate::repos::payments::PaymentListFilter;
use crate::services;
use crate::services::payments::CreatePaymentInput;
use crate::state::SharedState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub amount: i64,
    pub currency: String,
    pub gateway: String,
    #[serde(default)]
    pub merchant_api_key: String,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

pub async fn create_payment(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if idempotency_key.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_IDEMPOTENCY_KEY",
            "Idempotency-Key header is required",
            correlation_id,
        ));
    }

    let gateway = GatewayKind::parse(&body.gateway).ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_GATEWAY",
            format!("unknown gateway '{}'", body.gateway),
            correlation_id.clone(),
        )
    })?;

    let input = CreatePaymentInput {
        amount: body.amount,
        currency: body.currency,
        gateway,
        metadata: body.metadata,
    };

    let payment = services::payments::create_payment(
        &state,
        &body.merchant_api_key,
        &idempotency_key,
        input,
        &correlation_id,
    )
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok((StatusCode::CREATED, success(payment)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantKeyQuery {
    #[serde(default)]
    pub merchant_api_key: String,
}

/// Payment detail: the row plus its most recent attempts and refunds.
#[derive(Debug, Serialize)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub attempts: Vec<PaymentAttempt>,
    pub refunds: Vec<Refund>,
}

pub async fn get_payment(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<MerchantKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (payment, attempts, refunds) =
        services::payments::get_payment(&state, &query.merchant_api_key, id)
            .await
            .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(PaymentDetail {
        payment,
        attempts,
        refunds,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPaymentsQuery {
    #[serde(default)]
    pub merchant_api_key: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
    pub gateway: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn list_payments(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match &query.status {
        Some(raw) => Some(PaymentStatus::from_wire(raw).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_STATUS",
                format!("unknown status '{}'", raw),
                correlation_id.clone(),
            )
        })?),
        None => None,
    };
    let gateway = match &query.gateway {
        Some(raw) => Some(GatewayKind::parse(raw).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_GATEWAY",
                format!("unknown gateway '{}'", raw),
                correlation_id.clone(),
            )
        })?),
        None => None,
    };

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = PaymentListFilter {
        status,
        gateway,
        start_date: query.start_date,
        end_date: query.end_date,
        limit,
        offset,
    };

    let (items, total) =
        services::payments::list_payments(&state, &query.merchant_api_key, filter)
            .await
            .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    let has_more = offset + (items.len() as i64) < total;
    Ok(Json(json!({
        "success": true,
        "data": items,
        "pagination": {
            "total": total,
            "limit": limit,
            "offset": offset,
            "hasMore": has_more,
        }
    })))
}
