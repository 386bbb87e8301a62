//! Durable job queue. Realised as a `JobQueue` trait with a tabular-store
//! backed implementation so messages survive a worker restart, and an
//! in-memory `mpsc`-backed implementation for tests.

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub message_id: String,
    pub job_id: String,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: &str) -> Result<()>;
    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<LeasedMessage>>;
    async fn ack(&self, message_id: &str) -> Result<()>;
}

/// Store-backed queue: a row per message in `queue_messages`, leased with a
/// visibility timeout so a crashed worker's in-flight messages eventually
/// become visible again.
pub struct StoreJobQueue {
    store: Store,
    visibility_timeout_secs: i64,
}

impl StoreJobQueue {
    pub fn new(store: Store, visibility_timeout_secs: i64) -> Self {
        Self {
            store,
            visibility_timeout_secs,
        }
    }
}

#[async_trait]
impl JobQueue for StoreJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<()> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.store.enqueue_job(&message_id, job_id).await
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<LeasedMessage>> {
        let rows = self
            .store
            .dequeue_batch(limit as i64, Duration::seconds(self.visibility_timeout_secs))
            .await?;
        Ok(rows
            .into_iter()
            .map(|m| LeasedMessage {
                message_id: m.id,
                job_id: m.job_id,
            })
            .collect())
    }

    async fn ack(&self, message_id: &str) -> Result<()> {
        self.store.ack_message(message_id).await
    }
}

/// In-memory queue backed by an `mpsc` channel, for tests that don't need
/// persistence across a restart.
pub struct InMemoryJobQueue {
    sender: tokio::sync::mpsc::UnboundedSender<String>,
    receiver: Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &str) -> Result<()> {
        let _ = self.sender.send(job_id.to_string());
        Ok(())
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<LeasedMessage>> {
        let mut receiver = self.receiver.lock().await;
        let mut out = Vec::new();
        while out.len() < limit {
            match receiver.try_recv() {
                Ok(job_id) => out.push(LeasedMessage {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    job_id,
                }),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    async fn ack(&self, _message_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn store_queue_round_trips_a_job() {
        let store = test_store().await;
        let queue = StoreJobQueue::new(store, 300);
        queue.enqueue("job-1").await.unwrap();

        let leased = queue.dequeue_batch(10).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].job_id, "job-1");

        queue.ack(&leased[0].message_id).await.unwrap();
    }

    #[tokio::test]
    async fn in_memory_queue_respects_batch_limit() {
        let queue = InMemoryJobQueue::new();
        for i in 0..5 {
            queue.enqueue(&format!("job-{i}")).await.unwrap();
        }

        let first_batch = queue.dequeue_batch(3).await.unwrap();
        assert_eq!(first_batch.len(), 3);

        let second_batch = queue.dequeue_batch(10).await.unwrap();
        assert_eq!(second_batch.len(), 2);
    }
}
