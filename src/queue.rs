//! Work queue for webhook delivery jobs.
//!
//! The queue is a delivery hint: after any crash the retry sweep alone
//! re-discovers due work from the store, so a dropped message only delays a
//! delivery. Two implementations, selected by `QUEUE_TYPE`: an in-process
//! broadcast queue and NATS.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::models::DeadLetterRecord;

pub const DELIVERY_SUBJECT: &str = "webhook.delivery";
pub const DEAD_LETTER_SUBJECT: &str = "dead.letter";

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Enqueue a delivery id for immediate dispatch.
    async fn enqueue_delivery(&self, delivery_id: Uuid) -> anyhow::Result<()>;

    /// FIFO stream of enqueued delivery ids. Subscribe before the drainer
    /// starts publishing.
    async fn subscribe_deliveries(&self) -> anyhow::Result<BoxStream<'static, Uuid>>;

    /// Publish an abandoned-delivery record on the dead-letter subject.
    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()>;

    async fn is_connected(&self) -> bool {
        true
    }
}

pub async fn build_queue(config: &Config) -> anyhow::Result<Arc<dyn DeliveryQueue>> {
    match config.queue_type.as_str() {
        "nats" => {
            tracing::info!(url = %config.nats_url, "Connecting to NATS work queue");
            let client = async_nats::connect(&config.nats_url).await?;
            Ok(Arc::new(NatsQueue::new(client)))
        }
        _ => {
            tracing::info!("Using in-memory work queue");
            Ok(Arc::new(InMemoryQueue::new()))
        }
    }
}

#[derive(Debug, Clone)]
struct QueueMessage {
    subject: &'static str,
    payload: Vec<u8>,
}

/// In-process queue backed by a Tokio broadcast channel.
///
/// Messages published while no subscriber exists are dropped; the retry
/// sweep covers that window.
#[derive(Clone)]
pub struct InMemoryQueue {
    sender: Arc<broadcast::Sender<QueueMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryQueue {
    async fn enqueue_delivery(&self, delivery_id: Uuid) -> anyhow::Result<()> {
        let _ = self.sender.send(QueueMessage {
            subject: DELIVERY_SUBJECT,
            payload: delivery_id.to_string().into_bytes(),
        });
        Ok(())
    }

    async fn subscribe_deliveries(&self) -> anyhow::Result<BoxStream<'static, Uuid>> {
        let mut receiver = self.sender.subscribe();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) if msg.subject == DELIVERY_SUBJECT => {
                        match std::str::from_utf8(&msg.payload).ok().and_then(|s| s.parse::<Uuid>().ok()) {
                            Some(id) => yield id,
                            None => tracing::warn!("Dropping malformed delivery message"),
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Work queue subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(stream.boxed())
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(record)?;
        let _ = self.sender.send(QueueMessage {
            subject: DEAD_LETTER_SUBJECT,
            payload,
        });
        Ok(())
    }
}

/// NATS-backed queue for multi-process deployments.
pub struct NatsQueue {
    client: async_nats::Client,
}

impl NatsQueue {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeliveryQueue for NatsQueue {
    async fn enqueue_delivery(&self, delivery_id: Uuid) -> anyhow::Result<()> {
        self.client
            .publish(DELIVERY_SUBJECT, delivery_id.to_string().into_bytes().into())
            .await?;
        Ok(())
    }

    async fn subscribe_deliveries(&self) -> anyhow::Result<BoxStream<'static, Uuid>> {
        let subscriber = self.client.subscribe(DELIVERY_SUBJECT).await?;
        let stream = subscriber
            .filter_map(|msg| async move {
                match std::str::from_utf8(&msg.payload)
                    .ok()
                    .and_then(|s| s.parse::<Uuid>().ok())
                {
                    Some(id) => Some(id),
                    None => {
                        tracing::warn!("Dropping malformed delivery message");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(record)?;
        self.client
            .publish(DEAD_LETTER_SUBJECT, payload.into())
            .await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_ids_in_fifo_order() {
        let queue = InMemoryQueue::new();
        let mut stream = queue.subscribe_deliveries().await.unwrap();

        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue_delivery(*id).await.unwrap();
        }

        for expected in &ids {
            let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");
            assert_eq!(got, *expected);
        }
    }

    #[tokio::test]
    async fn dead_letters_do_not_reach_delivery_subscribers() {
        let queue = InMemoryQueue::new();
        let mut stream = queue.subscribe_deliveries().await.unwrap();

        let record = DeadLetterRecord::abandoned(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            10,
            None,
        );
        queue.publish_dead_letter(&record).await.unwrap();

        let delivery_id = Uuid::new_v4();
        queue.enqueue_delivery(delivery_id).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(got, delivery_id);
    }

    #[tokio::test]
    async fn enqueue_without_subscriber_is_not_an_error() {
        let queue = InMemoryQueue::new();
        assert!(queue.enqueue_delivery(Uuid::new_v4()).await.is_ok());
    }
}
