use chrono::{DateTime, Utc};

use super::Store;
use crate::error::Result;
use crate::types::IdempotencyEntry;

impl Store {
    pub async fn get_idempotency_entry(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        let row = sqlx::query_as::<_, IdempotencyEntry>(
            "SELECT * FROM idempotency_entries WHERE idempotency_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Record a replayable response. Ignored if the key is already taken -
    /// the caller decides what to do with the pre-existing entry.
    pub async fn insert_idempotency_entry(
        &self,
        key: &str,
        request_hash: &str,
        status_code: i64,
        response_body: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO idempotency_entries (idempotency_key, request_hash, status_code, response_body, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(key)
        .bind(request_hash)
        .bind(status_code)
        .bind(response_body)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn purge_expired_idempotency(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency_entries WHERE rowid IN (SELECT rowid FROM idempotency_entries WHERE expires_at <= ? LIMIT ?)",
        )
        .bind(now)
        .bind(batch_size)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use chrono::Duration;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = test_store().await;
        store
            .insert_idempotency_entry("idem-1", "hash-a", 200, "{\"ok\":true}", Utc::now() + Duration::hours(48))
            .await
            .unwrap();

        let entry = store.get_idempotency_entry("idem-1").await.unwrap().unwrap();
        assert_eq!(entry.request_hash, "hash-a");
        assert_eq!(entry.status_code, 200);
    }

    #[tokio::test]
    async fn second_insert_with_same_key_is_ignored() {
        let store = test_store().await;
        store
            .insert_idempotency_entry("idem-2", "hash-a", 200, "first", Utc::now() + Duration::hours(48))
            .await
            .unwrap();
        store
            .insert_idempotency_entry("idem-2", "hash-b", 201, "second", Utc::now() + Duration::hours(48))
            .await
            .unwrap();

        let entry = store.get_idempotency_entry("idem-2").await.unwrap().unwrap();
        assert_eq!(entry.response_body, "first");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = test_store().await;
        store
            .insert_idempotency_entry("idem-3", "hash-a", 200, "body", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert!(store.get_idempotency_entry("idem-3").await.unwrap().is_none());
    }
}
