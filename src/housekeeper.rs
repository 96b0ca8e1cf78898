//! Periodic reaper for processed outbox rows, delivered webhook rows, and
//! aged events. All three jobs are idempotent bounded-batch deletes.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::repos::{deliveries, events, outbox};
use crate::state::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DELETE_BATCH: i64 = 500;
/// Safety valve: batches per table per sweep.
const MAX_BATCHES: u32 = 20;

pub const OUTBOX_RETENTION_DAYS: i64 = 7;
pub const DELIVERY_RETENTION_DAYS: i64 = 30;
pub const EVENT_RETENTION_DAYS: i64 = 90;

pub fn start_housekeeper(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        tracing::info!("Housekeeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sweep_once(&state).await {
                        tracing::error!(error = format!("{:#}", e), "Housekeeping sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Housekeeper stopped");
    })
}

pub async fn sweep_once(state: &AppState) -> anyhow::Result<()> {
    let now = Utc::now();

    let outbox_cutoff = now - ChronoDuration::days(OUTBOX_RETENTION_DAYS);
    let mut reaped = 0u64;
    for _ in 0..MAX_BATCHES {
        let n = outbox::delete_processed_before(&state.db, outbox_cutoff, DELETE_BATCH).await?;
        reaped += n;
        if n < DELETE_BATCH as u64 {
            break;
        }
    }
    if reaped > 0 {
        tracing::info!(reaped, "Reaped processed outbox rows");
    }

    let delivery_cutoff = now - ChronoDuration::days(DELIVERY_RETENTION_DAYS);
    let mut reaped = 0u64;
    for _ in 0..MAX_BATCHES {
        let n =
            deliveries::delete_delivered_before(&state.db, delivery_cutoff, DELETE_BATCH).await?;
        reaped += n;
        if n < DELETE_BATCH as u64 {
            break;
        }
    }
    if reaped > 0 {
        tracing::info!(reaped, "Reaped delivered webhook rows");
    }

    let event_cutoff = now - ChronoDuration::days(EVENT_RETENTION_DAYS);
    let mut reaped = 0u64;
    for _ in 0..MAX_BATCHES {
        let n = events::delete_aged_before(&state.db, event_cutoff, DELETE_BATCH).await?;
        reaped += n;
        if n < DELETE_BATCH as u64 {
            break;
        }
    }
    if reaped > 0 {
        tracing::info!(reaped, "Reaped aged events");
    }

    Ok(())
}
