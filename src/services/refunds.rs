//! Refund lifecycle, mirroring payment intake.
//!
//! Creation runs under a lock on the parent payment row so concurrent
//! refunds serialize and the settled-refund sum can never exceed the
//! payment amount.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::gateway::{GatewayRefundRequest, GatewayRefundStatus};
use crate::models::{PaymentStatus, Refund, RefundStatus};
use crate::repos::{outbox, payments, refunds};
use crate::services::auth;
use crate::state::AppState;

pub fn map_refund_status(status: GatewayRefundStatus) -> RefundStatus {
    match status {
        GatewayRefundStatus::Succeeded => RefundStatus::Succeeded,
        GatewayRefundStatus::Pending => RefundStatus::Processing,
        GatewayRefundStatus::Failed => RefundStatus::Failed,
    }
}

pub async fn create_refund(
    state: &AppState,
    api_key: &str,
    payment_id: Uuid,
    amount: Option<i64>,
    reason: Option<String>,
    correlation_id: &str,
) -> Result<Refund, ServiceError> {
    if let Some(requested) = amount {
        if requested <= 0 {
            return Err(ServiceError::validation(
                "INVALID_AMOUNT",
                "amount must be a positive integer in minor units",
            ));
        }
    }

    let merchant = auth::authenticate_merchant(state, api_key).await?;

    let mut tx = state.db.begin().await?;
    let payment = payments::lock_for_update(&mut tx, payment_id)
        .await?
        .filter(|p| p.merchant_id == merchant.id)
        .ok_or(ServiceError::NotFound { entity: "payment" })?;

    if payment.status != PaymentStatus::Succeeded {
        return Err(ServiceError::domain(
            "PAYMENT_NOT_REFUNDABLE",
            format!(
                "payment {} is {} and cannot be refunded",
                payment.id,
                payment.status.as_db()
            ),
        ));
    }
    let provider_payment_id = payment.provider_payment_id.clone().ok_or_else(|| {
        ServiceError::domain(
            "PAYMENT_NOT_REFUNDABLE",
            "payment has no provider reference",
        )
    })?;

    let already_refunded = refunds::sum_succeeded_tx(&mut tx, payment.id).await?;
    let requested = amount.unwrap_or(payment.amount - already_refunded);
    if requested <= 0 || already_refunded + requested > payment.amount {
        // Rejected before any row is created.
        return Err(ServiceError::domain(
            "REFUND_AMOUNT_EXCEEDS_PAYMENT",
            format!(
                "refund of {} exceeds the refundable remainder of {}",
                requested,
                payment.amount - already_refunded
            ),
        ));
    }

    let refund =
        refunds::insert_refund_tx(&mut tx, Uuid::new_v4(), payment.id, requested, reason.as_deref())
            .await?;
    tx.commit().await?;

    refunds::mark_processing(&state.db, refund.id).await?;

    let gateway = state.gateways.get(payment.gateway).ok_or_else(|| {
        ServiceError::domain(
            "GATEWAY_NOT_ENABLED",
            format!("gateway '{}' is no longer enabled", payment.gateway),
        )
    })?;

    let request = GatewayRefundRequest {
        provider_payment_id,
        amount: Some(requested),
        reason: reason.clone(),
        metadata: None,
    };

    match gateway.refund_payment(request).await {
        Ok(response) => {
            let status = map_refund_status(response.status);

            let mut settled = refund;
            settled.status = status;
            settled.provider_refund_id = Some(response.provider_refund_id.clone());
            settled.updated_at = Utc::now();

            let mut tx = state.db.begin().await?;
            refunds::settle_tx(
                &mut tx,
                settled.id,
                status,
                Some(&response.provider_refund_id),
            )
            .await?;
            append_refund_created(&mut tx, &settled, correlation_id).await?;
            tx.commit().await?;

            tracing::info!(
                refund_id = %settled.id,
                payment_id = %settled.payment_id,
                amount = settled.amount,
                status = settled.status.as_db(),
                "Refund settled"
            );

            Ok(settled)
        }
        Err(fault) => {
            let mut settled = refund;
            settled.status = RefundStatus::Failed;
            settled.updated_at = Utc::now();

            let mut tx = state.db.begin().await?;
            refunds::settle_tx(&mut tx, settled.id, RefundStatus::Failed, None).await?;
            append_refund_created(&mut tx, &settled, correlation_id).await?;
            tx.commit().await?;

            tracing::warn!(
                refund_id = %settled.id,
                payment_id = %settled.payment_id,
                error_code = fault.provider_code.as_deref().unwrap_or("-"),
                "Refund failed at gateway"
            );

            Err(ServiceError::Gateway(fault))
        }
    }
}

async fn append_refund_created(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    refund: &Refund,
    correlation_id: &str,
) -> Result<(), ServiceError> {
    let payload = json!({
        "refundSnapshot": serde_json::to_value(refund).map_err(anyhow::Error::from)?,
        "correlationId": correlation_id,
    });
    outbox::insert_outbox_row(
        tx,
        Uuid::new_v4(),
        "refund",
        &refund.id.to_string(),
        "refund.created",
        &payload,
    )
    .await?;
    Ok(())
}

pub async fn get_refund(
    state: &AppState,
    api_key: &str,
    refund_id: Uuid,
) -> Result<Refund, ServiceError> {
    let merchant = auth::authenticate_merchant(state, api_key).await?;

    let refund = refunds::find_by_id(&state.db, refund_id)
        .await?
        .ok_or(ServiceError::NotFound { entity: "refund" })?;

    // Ownership runs through the parent payment.
    let owned = payments::find_by_id(&state.db, refund.payment_id)
        .await?
        .map(|p| p.merchant_id == merchant.id)
        .unwrap_or(false);
    if !owned {
        return Err(ServiceError::NotFound { entity: "refund" });
    }

    Ok(refund)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_status_mapping() {
        assert_eq!(
            map_refund_status(GatewayRefundStatus::Succeeded),
            RefundStatus::Succeeded
        );
        assert_eq!(
            map_refund_status(GatewayRefundStatus::Pending),
            RefundStatus::Processing
        );
        assert_eq!(
            map_refund_status(GatewayRefundStatus::Failed),
            RefundStatus::Failed
        );
    }
}
