//! Retention janitor: periodic bounded-batch purge of rows past their
//! retention window. Safe to re-run; every purge caps the rows it touches
//! per pass so a large backlog doesn't block the tick.

use chrono::{Duration, Utc};

use crate::error::Result;
use crate::store::Store;

const DEFAULT_BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone, Copy, Default)]
pub struct JanitorReport {
    pub cache_purged: u64,
    pub idempotency_purged: u64,
    pub rate_limit_purged: u64,
    pub logs_purged: u64,
}

pub struct Janitor {
    store: Store,
    log_retention: Duration,
    batch_size: i64,
}

impl Janitor {
    pub fn new(store: Store, log_retention_days: i64) -> Self {
        Self {
            store,
            log_retention: Duration::days(log_retention_days),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub async fn run_once(&self) -> Result<JanitorReport> {
        let now = Utc::now();
        let cache_purged = self.store.purge_expired_cache(now, self.batch_size).await?;
        let idempotency_purged = self.store.purge_expired_idempotency(now, self.batch_size).await?;
        let rate_limit_purged = self.store.purge_expired_rate_limits(now, self.batch_size).await?;
        let logs_purged = self.store.purge_old_logs(now - self.log_retention, self.batch_size).await?;

        Ok(JanitorReport {
            cache_purged,
            idempotency_purged,
            rate_limit_purged,
            logs_purged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use crate::types::ScrapeLog;

    #[tokio::test]
    async fn run_once_purges_all_expired_categories() {
        let store = test_store().await;
        store
            .upsert_cache_entry("fp-1", "cache/fp-1.json", 1, 1, now_minus_minutes(1))
            .await
            .unwrap();
        store
            .insert_idempotency_entry("idem-1", "hash", 200, "body", now_minus_minutes(1))
            .await
            .unwrap();

        let mut log = ScrapeLog {
            id: "log-1".into(),
            api_key_id: None,
            url: "https://example.com".into(),
            params_json: "{}".into(),
            token_usage: None,
            latency_ms: None,
            status: "completed".into(),
            error_msg: None,
            content_blob_key: None,
            result_blob_key: None,
            blocked: false,
            created_at: Utc::now(),
        };
        log.created_at = Utc::now() - Duration::days(400);
        store.insert_scrape_log(&log).await.unwrap();

        let janitor = Janitor::new(store, 30);
        let report = janitor.run_once().await.unwrap();

        assert_eq!(report.cache_purged, 1);
        assert_eq!(report.idempotency_purged, 1);
        assert_eq!(report.logs_purged, 1);
    }

    #[tokio::test]
    async fn run_once_is_idempotent_on_an_empty_store() {
        let store = test_store().await;
        let janitor = Janitor::new(store, 30);
        let report = janitor.run_once().await.unwrap();
        assert_eq!(report.cache_purged, 0);

        let report_again = janitor.run_once().await.unwrap();
        assert_eq!(report_again.cache_purged, 0);
    }

    fn now_minus_minutes(mins: i64) -> chrono::DateTime<Utc> {
        Utc::now() - Duration::minutes(mins)
    }
}
