//! Webhook scheduler: drains delivery jobs from the work queue and a
//! periodic retry sweep, attempts delivery, and reschedules or abandons.
//!
//! A delivery is owned by whichever worker claims its next attempt; the
//! attempt-count-predicated UPDATE makes concurrent claims safe.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dlq;
use super::sender::{self, DeliveryOutcome};
use crate::models::{DeadLetterRecord, WebhookDelivery};
use crate::repos::deliveries;
use crate::state::AppState;

pub const RETRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const RETRY_SWEEP_BATCH: i64 = 50;

/// Consume delivery ids pushed by the outbox drainer.
pub fn start_delivery_consumer(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match state.queue.subscribe_deliveries().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to subscribe to work queue");
                return;
            }
        };
        tracing::info!("Webhook delivery consumer started");

        loop {
            tokio::select! {
                maybe = stream.next() => match maybe {
                    Some(delivery_id) => {
                        if let Err(e) = process_delivery(&state, delivery_id).await {
                            tracing::error!(
                                delivery_id = %delivery_id,
                                error = format!("{:#}", e),
                                "Delivery processing failed"
                            );
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Webhook delivery consumer stopped");
    })
}

/// Periodically re-discover due FAILED deliveries from the store. Sufficient
/// on its own after a crash; the queue only accelerates delivery.
pub fn start_retry_sweeper(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETRY_SWEEP_INTERVAL);
        tracing::info!("Webhook retry sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match sweep_once(&state).await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(count, "Retry sweep processed deliveries");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = format!("{:#}", e), "Retry sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Webhook retry sweeper stopped");
    })
}

pub async fn sweep_once(state: &AppState) -> anyhow::Result<usize> {
    let ids = deliveries::claim_due_retries(
        &state.db,
        Utc::now(),
        state.max_attempts(),
        RETRY_SWEEP_BATCH,
    )
    .await?;

    let count = ids.len();
    for delivery_id in ids {
        if let Err(e) = process_delivery(state, delivery_id).await {
            tracing::error!(
                delivery_id = %delivery_id,
                error = format!("{:#}", e),
                "Delivery processing failed during sweep"
            );
        }
    }
    Ok(count)
}

/// One attempt for one delivery: load, claim, POST, classify.
pub async fn process_delivery(state: &AppState, delivery_id: Uuid) -> anyhow::Result<()> {
    let Some((delivery, endpoint, event)) =
        deliveries::load_for_dispatch(&state.db, delivery_id).await?
    else {
        tracing::debug!(delivery_id = %delivery_id, "Delivery not found, dropping");
        return Ok(());
    };

    // Idempotent late arrival from a duplicate enqueue.
    if delivery.status.is_terminal() {
        return Ok(());
    }

    if delivery.attempt_count >= state.max_attempts() {
        let last_error = delivery.last_error.clone();
        abandon(state, &delivery, delivery.attempt_count, last_error).await?;
        return Ok(());
    }

    // Claim the attempt before the POST: a crash between POST and record
    // counts as one attempt, so receivers must tolerate duplicates.
    let Some(attempt) =
        deliveries::claim_attempt(&state.db, delivery_id, delivery.attempt_count).await?
    else {
        // Another worker owns this delivery now.
        return Ok(());
    };

    let outcome = sender::send_webhook(
        &state.http,
        &endpoint.url,
        &endpoint.secret,
        &event,
        delivery_id,
        state.webhook_timeout(),
    )
    .await;

    match &outcome {
        DeliveryOutcome::Delivered { status } => {
            deliveries::mark_delivered(&state.db, delivery_id).await?;
            tracing::info!(
                delivery_id = %delivery_id,
                endpoint_id = %endpoint.id,
                event_type = %event.event_type,
                attempt,
                status,
                "Webhook delivered"
            );
        }
        DeliveryOutcome::Failed { kind, detail } => {
            let last_error = outcome
                .error_string()
                .unwrap_or_else(|| "unknown".to_string());

            if attempt >= state.max_attempts() {
                abandon(state, &delivery, attempt, Some(last_error)).await?;
            } else {
                let next_retry_at = state.retry_policy.next_retry_at(Utc::now(), attempt as u32);
                deliveries::mark_failed(&state.db, delivery_id, &last_error, next_retry_at)
                    .await?;
                tracing::warn!(
                    delivery_id = %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    kind,
                    detail = %detail,
                    next_retry_at = %next_retry_at,
                    "Webhook attempt failed, retry scheduled"
                );
            }
        }
    }

    Ok(())
}

async fn abandon(
    state: &AppState,
    delivery: &WebhookDelivery,
    attempts: i32,
    last_error: Option<String>,
) -> anyhow::Result<()> {
    deliveries::mark_abandoned(&state.db, delivery.id, last_error.as_deref()).await?;

    let record = DeadLetterRecord::abandoned(
        delivery.id,
        delivery.endpoint_id,
        delivery.event_id,
        attempts,
        last_error,
    );
    dlq::record_abandoned(&state.db, state.queue.as_ref(), &record).await?;

    Ok(())
}
