use chrono::{DateTime, Utc};

use super::Store;
use crate::error::Result;
use crate::types::CacheEntry;

impl Store {
    pub async fn get_cache_entry(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheEntry>("SELECT * FROM cache_entries WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Insert or replace the cache row for `fingerprint`, preserving
    /// `hit_count` across a replacement so a refreshed entry doesn't look
    /// cold.
    pub async fn upsert_cache_entry(
        &self,
        fingerprint: &str,
        result_path: &str,
        token_usage: i64,
        content_chars: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let existing_hits = self
            .get_cache_entry(fingerprint)
            .await?
            .map(|e| e.hit_count)
            .unwrap_or(0);

        sqlx::query(
            "INSERT INTO cache_entries (fingerprint, result_path, token_usage, content_chars, created_at, expires_at, hit_count, last_hit_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
             ON CONFLICT(fingerprint) DO UPDATE SET
                result_path = excluded.result_path,
                token_usage = excluded.token_usage,
                content_chars = excluded.content_chars,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hit_count = excluded.hit_count",
        )
        .bind(fingerprint)
        .bind(result_path)
        .bind(token_usage)
        .bind(content_chars)
        .bind(Utc::now())
        .bind(expires_at)
        .bind(existing_hits)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_cache_hit(&self, fingerprint: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_hit_at = ? WHERE fingerprint = ?",
        )
        .bind(Utc::now())
        .bind(fingerprint)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn purge_expired_cache(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE rowid IN (SELECT rowid FROM cache_entries WHERE expires_at <= ? LIMIT ?)",
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
    async fn upsert_preserves_hit_count_across_replacement() {
        let store = test_store().await;
        let fp = "fp-1";
        store
            .upsert_cache_entry(fp, "cache/fp-1.json", 10, 500, Utc::now() + Duration::minutes(15))
            .await
            .unwrap();
        store.record_cache_hit(fp).await.unwrap();
        store.record_cache_hit(fp).await.unwrap();

        store
            .upsert_cache_entry(fp, "cache/fp-1.json", 12, 520, Utc::now() + Duration::minutes(15))
            .await
            .unwrap();

        let entry = store.get_cache_entry(fp).await.unwrap().unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.token_usage, 12);
    }

    #[tokio::test]
    async fn purge_expired_cache_only_removes_past_entries() {
        let store = test_store().await;
        store
            .upsert_cache_entry("stale", "cache/stale.json", 1, 1, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        store
            .upsert_cache_entry("fresh", "cache/fresh.json", 1, 1, Utc::now() + Duration::minutes(30))
            .await
            .unwrap();

        let purged = store.purge_expired_cache(Utc::now(), 100).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_cache_entry("fresh").await.unwrap().is_some());
        assert!(store.get_cache_entry("stale").await.unwrap().is_none());
    }
}
