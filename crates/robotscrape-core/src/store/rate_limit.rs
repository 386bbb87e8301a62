use chrono::{DateTime, Utc};

use super::Store;
use crate::error::Result;

/// Outcome of a fixed-window check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { count: i64 },
    Exceeded { retry_after: chrono::Duration },
}

impl Store {
    /// Atomically increment `identifier`'s counter within its current
    /// window, or open a fresh window if the previous one has lapsed.
    /// Implemented as upsert-then-check rather than read-then-write so two
    /// concurrent requests for the same identifier can't both observe room
    /// under the limit.
    pub async fn check_and_increment_rate_limit(
        &self,
        identifier: &str,
        limit: i64,
        window: chrono::Duration,
    ) -> Result<RateLimitOutcome> {
        let now = Utc::now();
        let window_end = now + window;

        sqlx::query(
            "INSERT INTO rate_limits (identifier, request_count, window_end, updated_at)
             VALUES (?, 1, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET
                request_count = CASE WHEN rate_limits.window_end <= ? THEN 1 ELSE rate_limits.request_count + 1 END,
                window_end = CASE WHEN rate_limits.window_end <= ? THEN ? ELSE rate_limits.window_end END,
                updated_at = ?",
        )
        .bind(identifier)
        .bind(window_end)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(window_end)
        .bind(now)
        .execute(self.pool())
        .await?;

        let row: (i64, DateTime<Utc>) = sqlx::query_as(
            "SELECT request_count, window_end FROM rate_limits WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_one(self.pool())
        .await?;

        if row.0 > limit {
            let retry_after = row.1 - now;
            Ok(RateLimitOutcome::Exceeded { retry_after })
        } else {
            Ok(RateLimitOutcome::Allowed { count: row.0 })
        }
    }

    pub async fn purge_expired_rate_limits(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM rate_limits WHERE rowid IN (SELECT rowid FROM rate_limits WHERE window_end <= ? LIMIT ?)",
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
    async fn allows_requests_under_the_limit() {
        let store = test_store().await;
        for expected in 1..=3 {
            let outcome = store
                .check_and_increment_rate_limit("key-a", 5, Duration::seconds(60))
                .await
                .unwrap();
            assert_eq!(outcome, RateLimitOutcome::Allowed { count: expected });
        }
    }

    #[tokio::test]
    async fn rejects_once_the_limit_is_exceeded() {
        let store = test_store().await;
        for _ in 0..3 {
            store
                .check_and_increment_rate_limit("key-b", 3, Duration::seconds(60))
                .await
                .unwrap();
        }
        let outcome = store
            .check_and_increment_rate_limit("key-b", 3, Duration::seconds(60))
            .await
            .unwrap();
        assert!(matches!(outcome, RateLimitOutcome::Exceeded { .. }));
    }

    #[tokio::test]
    async fn window_resets_independently_per_identifier() {
        let store = test_store().await;
        store
            .check_and_increment_rate_limit("key-c", 1, Duration::seconds(60))
            .await
            .unwrap();
        let outcome = store
            .check_and_increment_rate_limit("key-d", 1, Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(outcome, RateLimitOutcome::Allowed { count: 1 });
    }
}
