//! Outbox drainer: promotes outbox rows into event + delivery rows and
//! enqueues the new delivery ids.
//!
//! Single logical owner; SKIP LOCKED row claims make extra instances safe.
//! Each row is drained in one transaction, so a mid-drain failure re-drains
//! the row on the next poll and duplicate events cannot be created.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::repos::{deliveries, endpoints, events, outbox};
use crate::state::AppState;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const BATCH_SIZE: i64 = 100;

pub fn start_outbox_drainer(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        tracing::info!("Outbox drainer started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match drain_once(&state).await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(count, "Drained outbox rows");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = format!("{:#}", e), "Outbox drain failed");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Outbox drainer stopped");
    })
}

/// Drain one batch, oldest rows first. Returns the number of rows drained.
pub async fn drain_once(state: &AppState) -> anyhow::Result<usize> {
    let ids = outbox::fetch_unprocessed_ids(&state.db, BATCH_SIZE).await?;
    let mut drained = 0;

    for id in ids {
        match drain_row(state, id).await {
            Ok(Some(delivery_ids)) => {
                drained += 1;
                // Enqueue only after the transaction committed so the
                // consumer can never see a phantom delivery id.
                for delivery_id in delivery_ids {
                    if let Err(e) = state.queue.enqueue_delivery(delivery_id).await {
                        tracing::warn!(
                            delivery_id = %delivery_id,
                            error = %e,
                            "Enqueue failed; retry sweep will pick the delivery up"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    outbox_id = %id,
                    error = format!("{:#}", e),
                    "Failed to drain outbox row; will retry on next poll"
                );
            }
        }
    }

    Ok(drained)
}

/// One row, one transaction: insert the event, fan out delivery rows to
/// subscribed endpoints, flip `processed`.
async fn drain_row(state: &AppState, outbox_id: Uuid) -> anyhow::Result<Option<Vec<Uuid>>> {
    let mut tx = state.db.begin().await?;

    let Some(row) = outbox::lock_unprocessed(&mut tx, outbox_id).await? else {
        // Processed by another instance, or still locked there.
        return Ok(None);
    };

    let event_id = Uuid::new_v4();
    let event = events::insert_event_tx(&mut tx, event_id, &row.event_type, &row.payload).await?;

    let subscribed = endpoints::find_active_subscribed_tx(&mut tx, &row.event_type).await?;
    let mut delivery_ids = Vec::with_capacity(subscribed.len());
    for endpoint in &subscribed {
        let delivery_id = Uuid::new_v4();
        deliveries::insert_delivery_tx(&mut tx, delivery_id, endpoint.id, event_id).await?;
        delivery_ids.push(delivery_id);
    }

    outbox::mark_processed(&mut tx, outbox_id).await?;
    tx.commit().await?;

    tracing::info!(
        outbox_id = %outbox_id,
        event_id = %event.id,
        event_type = %event.event_type,
        deliveries = delivery_ids.len(),
        "Outbox row drained"
    );

    Ok(Some(delivery_ids))
}
