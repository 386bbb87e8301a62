use chrono::Utc;

use super::Store;
use crate::error::Result;
use crate::types::{ExtractParams, Job, JobStatus};

impl Store {
    pub async fn create_job(
        &self,
        id: &str,
        api_key_id: Option<&str>,
        url: &str,
        params: &ExtractParams,
        webhook_url: Option<&str>,
        webhook_secret: Option<&str>,
    ) -> Result<()> {
        let params_json = serde_json::to_string(params)
            .map_err(|e| crate::Error::Server(format!("failed to serialize job params: {e}")))?;
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO jobs (id, api_key_id, url, params_json, webhook_url, webhook_secret, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'queued', ?)",
        )
        .bind(id)
        .bind(api_key_id)
        .bind(url)
        .bind(params_json)
        .bind(webhook_url)
        .bind(webhook_secret)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    pub async fn list_jobs(
        &self,
        api_key_id: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let rows = match (api_key_id, status) {
            (Some(k), Some(s)) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE api_key_id = ? AND status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(k)
                .bind(s.as_str())
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (Some(k), None) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE api_key_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(k)
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (None, Some(s)) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(s.as_str())
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            (None, None) => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn mark_job_processing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'processing', started_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_job_completed(
        &self,
        id: &str,
        result_path: &str,
        token_usage: i64,
        latency_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', result_path = ?, token_usage = ?, latency_ms = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(result_path)
        .bind(token_usage)
        .bind(latency_ms)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_job_failed(&self, id: &str, error_msg: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'failed', error_msg = ?, completed_at = ? WHERE id = ?")
            .bind(error_msg)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_job_blocked(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'blocked', blocked = 1, completed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    fn sample_params() -> ExtractParams {
        ExtractParams {
            url: "https://example.com".into(),
            fields: vec!["title".into()],
            schema: None,
            instructions: None,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn job_lifecycle_transitions() {
        let store = test_store().await;
        let id = "job-1";
        store
            .create_job(id, None, "https://example.com", &sample_params(), None, None)
            .await
            .unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.started_at.is_none());

        store.mark_job_processing(id).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.started_at.is_some());

        store.mark_job_completed(id, "results/job-1.json", 42, 1200).await.unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result_path.as_deref(), Some("results/job-1.json"));
        assert!(job.completed_at.unwrap() >= job.started_at.unwrap());
    }

    #[tokio::test]
    async fn list_jobs_filters_by_owner_and_status() {
        let store = test_store().await;
        store
            .create_job("a", Some("key-1"), "https://a.example", &sample_params(), None, None)
            .await
            .unwrap();
        store
            .create_job("b", Some("key-2"), "https://b.example", &sample_params(), None, None)
            .await
            .unwrap();
        store.mark_job_failed("a", "boom").await.unwrap();

        let mine = store.list_jobs(Some("key-1"), None, 10).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "a");

        let failed = store.list_jobs(None, Some(JobStatus::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "a");
    }
}
