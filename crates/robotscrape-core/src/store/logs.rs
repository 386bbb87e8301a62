use chrono::{DateTime, Utc};

use super::Store;
use crate::error::Result;
use crate::types::{EventLog, ScrapeLog};

#[allow(clippy::too_many_arguments)]
impl Store {
    pub async fn insert_scrape_log(&self, log: &ScrapeLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO scrape_logs (id, api_key_id, url, params_json, token_usage, latency_ms, status, error_msg, content_blob_key, result_blob_key, blocked, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.api_key_id)
        .bind(&log.url)
        .bind(&log.params_json)
        .bind(log.token_usage)
        .bind(log.latency_ms)
        .bind(&log.status)
        .bind(&log.error_msg)
        .bind(&log.content_blob_key)
        .bind(&log.result_blob_key)
        .bind(log.blocked)
        .bind(log.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_scrape_logs(&self, api_key_id: Option<&str>, limit: i64) -> Result<Vec<ScrapeLog>> {
        let rows = match api_key_id {
            Some(k) => {
                sqlx::query_as::<_, ScrapeLog>(
                    "SELECT * FROM scrape_logs WHERE api_key_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(k)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, ScrapeLog>("SELECT * FROM scrape_logs ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn insert_event_log(&self, id: &str, api_key_id: Option<&str>, kind: &str, metadata_json: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO event_logs (id, api_key_id, kind, metadata_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(api_key_id)
        .bind(kind)
        .bind(metadata_json)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_event_logs(&self, api_key_id: Option<&str>, limit: i64) -> Result<Vec<EventLog>> {
        let rows = match api_key_id {
            Some(k) => {
                sqlx::query_as::<_, EventLog>(
                    "SELECT * FROM event_logs WHERE api_key_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(k)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, EventLog>("SELECT * FROM event_logs ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn purge_old_logs(&self, before: DateTime<Utc>, batch_size: i64) -> Result<u64> {
        let a = sqlx::query(
            "DELETE FROM scrape_logs WHERE rowid IN (SELECT rowid FROM scrape_logs WHERE created_at <= ? LIMIT ?)",
        )
        .bind(before)
        .bind(batch_size)
        .execute(self.pool())
        .await?
        .rows_affected();

        let b = sqlx::query(
            "DELETE FROM event_logs WHERE rowid IN (SELECT rowid FROM event_logs WHERE created_at <= ? LIMIT ?)",
        )
        .bind(before)
        .bind(batch_size)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(a + b)
    }
}
