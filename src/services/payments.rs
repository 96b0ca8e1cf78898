//! Payment intake: validation, idempotency, gateway dispatch, settlement.
//!
//! The settlement transaction writes the gateway outcome and exactly one
//! `payment.created` outbox row together, so a committed payment always has
//! its event and a rolled-back one never does.

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::cache::{idempotency_cache_key, IDEMPOTENCY_CACHE_TTL};
use crate::error::ServiceError;
use crate::gateway::{GatewayKind, GatewayPaymentRequest, GatewayPaymentStatus};
use crate::models::{AttemptStatus, Payment, PaymentAttempt, PaymentStatus, Refund};
use crate::repos::payments::{
    NewPayment, PaymentListFilter, PaymentSettlement, IDEMPOTENCY_CONSTRAINT,
};
use crate::repos::{is_unique_violation, outbox, payments, refunds};
use crate::services::auth;
use crate::state::AppState;

pub struct CreatePaymentInput {
    pub amount: i64,
    pub currency: String,
    pub gateway: GatewayKind,
    pub metadata: Option<JsonValue>,
}

pub fn map_payment_status(status: GatewayPaymentStatus) -> PaymentStatus {
    match status {
        GatewayPaymentStatus::Succeeded => PaymentStatus::Succeeded,
        GatewayPaymentStatus::Processing => PaymentStatus::Processing,
        GatewayPaymentStatus::RequiresAction => PaymentStatus::RequiresAction,
        GatewayPaymentStatus::Failed => PaymentStatus::Failed,
    }
}

/// Attempts never hold `requires_action`; both in-flight shapes map to
/// PROCESSING.
pub fn map_attempt_status(status: GatewayPaymentStatus) -> AttemptStatus {
    match status {
        GatewayPaymentStatus::Succeeded => AttemptStatus::Succeeded,
        GatewayPaymentStatus::Processing | GatewayPaymentStatus::RequiresAction => {
            AttemptStatus::Processing
        }
        GatewayPaymentStatus::Failed => AttemptStatus::Failed,
    }
}

/// ISO-4217 alphabetic code, upper-cased for storage.
pub fn validate_currency(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_uppercase())
    } else {
        Err(ServiceError::validation(
            "INVALID_CURRENCY",
            format!("'{}' is not a 3-letter ISO-4217 currency code", raw),
        ))
    }
}

/// Keep primitives plus one level of nested object; drop arrays and deeper
/// nesting.
pub fn sanitize_metadata(value: JsonValue) -> JsonValue {
    let JsonValue::Object(map) = value else {
        return json!({});
    };

    let mut out = serde_json::Map::new();
    for (key, value) in map {
        match value {
            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) | JsonValue::Null => {
                out.insert(key, value);
            }
            JsonValue::Object(inner) => {
                let mut nested = serde_json::Map::new();
                for (ikey, ivalue) in inner {
                    if matches!(
                        ivalue,
                        JsonValue::String(_)
                            | JsonValue::Number(_)
                            | JsonValue::Bool(_)
                            | JsonValue::Null
                    ) {
                        nested.insert(ikey, ivalue);
                    }
                }
                out.insert(key, JsonValue::Object(nested));
            }
            JsonValue::Array(_) => {}
        }
    }
    JsonValue::Object(out)
}

pub async fn create_payment(
    state: &AppState,
    api_key: &str,
    idempotency_key: &str,
    input: CreatePaymentInput,
    correlation_id: &str,
) -> Result<Payment, ServiceError> {
    if input.amount <= 0 {
        return Err(ServiceError::validation(
            "INVALID_AMOUNT",
            "amount must be a positive integer in minor units",
        ));
    }
    let currency = validate_currency(&input.currency)?;
    if !state.gateways.is_enabled(input.gateway) {
        return Err(ServiceError::validation(
            "GATEWAY_NOT_ENABLED",
            format!("gateway '{}' is not enabled", input.gateway),
        ));
    }
    if idempotency_key.trim().is_empty() {
        return Err(ServiceError::validation(
            "MISSING_IDEMPOTENCY_KEY",
            "Idempotency-Key header is required",
        ));
    }

    let merchant = auth::authenticate_merchant(state, api_key).await?;

    // The key is the contract: a hit returns the prior payment unchanged,
    // regardless of the current request body.
    let cache_key = idempotency_cache_key(merchant.id, idempotency_key);
    if let Some(payment_id) = state.idempotency_cache.get(&cache_key).await {
        if let Some(existing) = payments::find_by_id(&state.db, payment_id).await? {
            return Ok(existing);
        }
    }
    if let Some(existing) =
        payments::find_by_idempotency_key(&state.db, merchant.id, idempotency_key).await?
    {
        state
            .idempotency_cache
            .insert(cache_key, existing.id, IDEMPOTENCY_CACHE_TTL)
            .await;
        return Ok(existing);
    }

    let new = NewPayment {
        id: Uuid::new_v4(),
        merchant_id: merchant.id,
        amount: input.amount,
        currency: currency.clone(),
        gateway: input.gateway,
        idempotency_key: idempotency_key.to_string(),
        metadata: sanitize_metadata(input.metadata.unwrap_or(JsonValue::Null)),
        attempt_id: Uuid::new_v4(),
    };

    let mut tx = state.db.begin().await?;
    let payment = match payments::insert_payment_with_attempt(&mut tx, &new).await {
        Ok(payment) => payment,
        Err(e) if is_unique_violation(&e, IDEMPOTENCY_CONSTRAINT) => {
            // A concurrent intake with the same key won; read the winner.
            drop(tx);
            let existing =
                payments::find_by_idempotency_key(&state.db, merchant.id, idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Internal(anyhow::anyhow!(
                            "idempotency winner row missing after unique violation"
                        ))
                    })?;
            state
                .idempotency_cache
                .insert(cache_key, existing.id, IDEMPOTENCY_CACHE_TTL)
                .await;
            return Ok(existing);
        }
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    state
        .idempotency_cache
        .insert(cache_key, payment.id, IDEMPOTENCY_CACHE_TTL)
        .await;

    payments::mark_processing(&state.db, payment.id, new.attempt_id).await?;

    let gateway = state.gateways.get(input.gateway).ok_or_else(|| {
        ServiceError::validation(
            "GATEWAY_NOT_ENABLED",
            format!("gateway '{}' is not enabled", input.gateway),
        )
    })?;

    let request = GatewayPaymentRequest {
        amount: payment.amount,
        currency: currency.clone(),
        metadata: payment.metadata.clone(),
        customer_id: None,
        method_id: None,
    };

    match gateway.create_payment(request).await {
        Ok(response) => {
            let payment_status = map_payment_status(response.status);
            let attempt_status = map_attempt_status(response.status);

            let mut settled = payment;
            settled.status = payment_status;
            settled.provider_payment_id = Some(response.provider_payment_id.clone());
            settled.updated_at = Utc::now();

            let mut tx = state.db.begin().await?;
            payments::settle_tx(
                &mut tx,
                &PaymentSettlement {
                    payment_id: settled.id,
                    attempt_id: new.attempt_id,
                    payment_status,
                    attempt_status,
                    provider_payment_id: Some(&response.provider_payment_id),
                    provider_response: Some(&response.raw),
                    error_code: None,
                    error_message: None,
                },
            )
            .await?;
            append_payment_created(&mut tx, &settled, correlation_id).await?;
            tx.commit().await?;

            tracing::info!(
                payment_id = %settled.id,
                merchant_id = %merchant.id,
                gateway = %settled.gateway,
                status = settled.status.as_db(),
                provider_payment_id = %response.provider_payment_id,
                "Payment settled"
            );

            Ok(settled)
        }
        Err(fault) => {
            let error_code = fault
                .provider_code
                .clone()
                .unwrap_or_else(|| "GATEWAY_ERROR".to_string());

            let mut settled = payment;
            settled.status = PaymentStatus::Failed;
            settled.error_code = Some(error_code.clone());
            settled.error_message = Some(fault.message.clone());
            settled.updated_at = Utc::now();

            // The event describes the creation attempt, not its success, so
            // the outbox row is still appended.
            let mut tx = state.db.begin().await?;
            payments::settle_tx(
                &mut tx,
                &PaymentSettlement {
                    payment_id: settled.id,
                    attempt_id: new.attempt_id,
                    payment_status: PaymentStatus::Failed,
                    attempt_status: AttemptStatus::Failed,
                    provider_payment_id: None,
                    provider_response: None,
                    error_code: Some(&error_code),
                    error_message: Some(&fault.message),
                },
            )
            .await?;
            append_payment_created(&mut tx, &settled, correlation_id).await?;
            tx.commit().await?;

            tracing::warn!(
                payment_id = %settled.id,
                merchant_id = %merchant.id,
                gateway = %settled.gateway,
                error_code = %error_code,
                "Payment failed at gateway"
            );

            Err(ServiceError::Gateway(fault))
        }
    }
}

async fn append_payment_created(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &Payment,
    correlation_id: &str,
) -> Result<(), ServiceError> {
    let payload = json!({
        "paymentSnapshot": serde_json::to_value(payment).map_err(anyhow::Error::from)?,
        "correlationId": correlation_id,
    });
    outbox::insert_outbox_row(
        tx,
        Uuid::new_v4(),
        "payment",
        &payment.id.to_string(),
        "payment.created",
        &payload,
    )
    .await?;
    Ok(())
}

/// Payment with its most recent attempts and refunds, scoped to the caller.
pub async fn get_payment(
    state: &AppState,
    api_key: &str,
    payment_id: Uuid,
) -> Result<(Payment, Vec<PaymentAttempt>, Vec<Refund>), ServiceError> {
    let merchant = auth::authenticate_merchant(state, api_key).await?;

    let payment = payments::find_by_id(&state.db, payment_id)
        .await?
        .filter(|p| p.merchant_id == merchant.id)
        .ok_or(ServiceError::NotFound { entity: "payment" })?;

    let attempts = payments::attempts_for_payment(&state.db, payment.id, 5).await?;
    let refund_rows = refunds::list_for_payment(&state.db, payment.id).await?;

    Ok((payment, attempts, refund_rows))
}

pub async fn list_payments(
    state: &AppState,
    api_key: &str,
    filter: PaymentListFilter,
) -> Result<(Vec<Payment>, i64), ServiceError> {
    let merchant = auth::authenticate_merchant(state, api_key).await?;
    let (items, total) = payments::list_for_merchant(&state.db, merchant.id, &filter).await?;
    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Succeeded),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Processing),
            PaymentStatus::Processing
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::RequiresAction),
            PaymentStatus::RequiresAction
        );
        assert_eq!(
            map_payment_status(GatewayPaymentStatus::Failed),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn attempt_status_collapses_in_flight_shapes() {
        assert_eq!(
            map_attempt_status(GatewayPaymentStatus::RequiresAction),
            AttemptStatus::Processing
        );
        assert_eq!(
            map_attempt_status(GatewayPaymentStatus::Processing),
            AttemptStatus::Processing
        );
        assert_eq!(
            map_attempt_status(GatewayPaymentStatus::Succeeded),
            AttemptStatus::Succeeded
        );
        assert_eq!(
            map_attempt_status(GatewayPaymentStatus::Failed),
            AttemptStatus::Failed
        );
    }

    #[test]
    fn currency_is_uppercased() {
        assert_eq!(validate_currency("usd").unwrap(), "USD");
        assert_eq!(validate_currency(" EUR ").unwrap(), "EUR");
        assert!(validate_currency("US").is_err());
        assert!(validate_currency("USDA").is_err());
        assert!(validate_currency("U5D").is_err());
    }

    #[test]
    fn metadata_keeps_primitives_and_one_nested_level() {
        let sanitized = sanitize_metadata(json!({
            "orderId": "o1",
            "count": 3,
            "flag": true,
            "nothing": null,
            "nested": {"a": 1, "deep": {"b": 2}, "list": [1]},
            "list": [1, 2, 3],
        }));

        assert_eq!(sanitized["orderId"], "o1");
        assert_eq!(sanitized["count"], 3);
        assert_eq!(sanitized["flag"], true);
        assert!(sanitized["nothing"].is_null());
        assert_eq!(sanitized["nested"]["a"], 1);
        assert!(sanitized["nested"].get("deep").is_none());
        assert!(sanitized["nested"].get("list").is_none());
        assert!(sanitized.get("list").is_none());
    }

    #[test]
    fn non_object_metadata_becomes_empty() {
        assert_eq!(sanitize_metadata(json!([1, 2])), json!({}));
        assert_eq!(sanitize_metadata(json!("x")), json!({}));
        assert_eq!(sanitize_metadata(JsonValue::Null), json!({}));
    }
}
