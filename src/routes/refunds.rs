use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::payments::MerchantKeyQuery;
use super::success;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::services;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRefundBody {
    pub payment_id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub merchant_api_key: String,
}

pub async fn create_refund(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Json(body): Json<CreateRefundBody>,
) -> Result<impl IntoResponse, ApiError> {
    let payment_id = body.payment_id.parse::<Uuid>().map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_PAYMENT_ID",
            format!("'{}' is not a valid payment id", body.payment_id),
            correlation_id.clone(),
        )
    })?;

    let refund = services::refunds::create_refund(
        &state,
        &body.merchant_api_key,
        payment_id,
        body.amount,
        body.reason,
        &correlation_id,
    )
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok((StatusCode::CREATED, success(refund)))
}

pub async fn get_refund(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<MerchantKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let refund = services::refunds::get_refund(&state, &query.merchant_api_key, id)
        .await
        .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(refund))
}
