use chrono::Utc;

use super::Store;
use crate::error::Result;
use crate::types::WebhookDeadLetter;

impl Store {
    pub async fn insert_webhook_dead_letter(
        &self,
        id: &str,
        job_id: Option<&str>,
        url: &str,
        payload_json: &str,
        last_error: &str,
        attempts: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_dead_letters (id, job_id, url, payload_json, last_error, attempts, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(job_id)
        .bind(url)
        .bind(payload_json)
        .bind(last_error)
        .bind(attempts)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_webhook_dead_letters(&self, limit: i64) -> Result<Vec<WebhookDeadLetter>> {
        let rows = sqlx::query_as::<_, WebhookDeadLetter>(
            "SELECT * FROM webhook_dead_letters ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn dead_letters_round_trip_newest_first() {
        let store = test_store().await;
        store
            .insert_webhook_dead_letter("dl-1", Some("job-1"), "https://client.example/hook", "{}", "connect timeout", 5)
            .await
            .unwrap();
        store
            .insert_webhook_dead_letter("dl-2", Some("job-2"), "https://client.example/hook2", "{}", "connection refused", 5)
            .await
            .unwrap();

        let letters = store.list_webhook_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].id, "dl-2");
    }
}
