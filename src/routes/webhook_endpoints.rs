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
use crate::error::{ApiError, ServiceError};
use crate::middleware::RequestId;
use crate::models::{is_known_event_type, KNOWN_EVENT_TYPES};
use crate::repos::endpoints::{self, EndpointPatch};
use crate::services::auth;
use crate::state::SharedState;

fn validate_url(url: &str) -> Result<(), ServiceError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "INVALID_URL",
            "url must start with http:// or https://",
        ))
    }
}

fn validate_secret(secret: &str) -> Result<(), ServiceError> {
    if secret.len() >= 8 {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "INVALID_SECRET",
            "secret must be at least 8 characters",
        ))
    }
}

fn validate_events(events: &[String]) -> Result<(), ServiceError> {
    if events.is_empty() {
        return Err(ServiceError::validation(
            "INVALID_EVENT_TYPES",
            "at least one event type is required",
        ));
    }
    for event_type in events {
        if !is_known_event_type(event_type) {
            return Err(ServiceError::validation(
                "INVALID_EVENT_TYPES",
                format!(
                    "unknown event type '{}'; known types: {}",
                    event_type,
                    KNOWN_EVENT_TYPES.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointBody {
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub merchant_api_key: String,
}

pub async fn create_endpoint(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Json(body): Json<CreateEndpointBody>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = async {
        validate_url(&body.url)?;
        validate_secret(&body.secret)?;
        validate_events(&body.events)?;

        let merchant = auth::authenticate_merchant(&state, &body.merchant_api_key).await?;
        let endpoint = endpoints::insert_endpoint(
            &state.db,
            Uuid::new_v4(),
            merchant.id,
            &body.url,
            &body.secret,
            &body.events,
        )
        .await?;

        tracing::info!(
            endpoint_id = %endpoint.id,
            merchant_id = %merchant.id,
            events = ?endpoint.events,
            "Webhook endpoint registered"
        );
        Ok::<_, ServiceError>(endpoint)
    }
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok((StatusCode::CREATED, success(endpoint)))
}

pub async fn list_endpoints(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Query(query): Query<MerchantKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let list = async {
        let merchant = auth::authenticate_merchant(&state, &query.merchant_api_key).await?;
        Ok::<_, ServiceError>(endpoints::list_for_merchant(&state.db, merchant.id).await?)
    }
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(list))
}

pub async fn get_endpoint(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<MerchantKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = async {
        let merchant = auth::authenticate_merchant(&state, &query.merchant_api_key).await?;
        endpoints::find_for_merchant(&state.db, merchant.id, id)
            .await?
            .ok_or(ServiceError::NotFound { entity: "endpoint" })
    }
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(endpoint))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEndpointBody {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub merchant_api_key: Option<String>,
}

pub async fn update_endpoint(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<MerchantKeyQuery>,
    Json(body): Json<UpdateEndpointBody>,
) -> Result<impl IntoResponse, ApiError> {
    let endpoint = async {
        if let Some(url) = &body.url {
            validate_url(url)?;
        }
        if let Some(secret) = &body.secret {
            validate_secret(secret)?;
        }
        if let Some(events) = &body.events {
            validate_events(events)?;
        }

        // The key may arrive in the query string or the body.
        let api_key = if !query.merchant_api_key.is_empty() {
            query.merchant_api_key.clone()
        } else {
            body.merchant_api_key.clone().unwrap_or_default()
        };
        let merchant = auth::authenticate_merchant(&state, &api_key).await?;

        let patch = EndpointPatch {
            url: body.url.as_deref(),
            secret: body.secret.as_deref(),
            events: body.events.as_deref(),
            is_active: body.is_active,
        };
        endpoints::update_endpoint(&state.db, merchant.id, id, &patch)
            .await?
            .ok_or(ServiceError::NotFound { entity: "endpoint" })
    }
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(endpoint))
}

pub async fn delete_endpoint(
    State(state): State<SharedState>,
    Extension(RequestId(correlation_id)): Extension<RequestId>,
    Path(id): Path<Uuid>,
    Query(query): Query<MerchantKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    async {
        let merchant = auth::authenticate_merchant(&state, &query.merchant_api_key).await?;
        let deleted = endpoints::delete_endpoint(&state.db, merchant.id, id).await?;
        if !deleted {
            return Err(ServiceError::NotFound { entity: "endpoint" });
        }
        tracing::info!(endpoint_id = %id, merchant_id = %merchant.id, "Webhook endpoint deleted");
        Ok(())
    }
    .await
    .map_err(|e| ApiError::from_service(e, &correlation_id))?;

    Ok(success(serde_json::json!({ "deleted": true })))
}
