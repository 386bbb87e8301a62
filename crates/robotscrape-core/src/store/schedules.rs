use chrono::{DateTime, Utc};

use super::Store;
use crate::error::Result;
use crate::types::{ExtractParams, Schedule};

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_schedule(
        &self,
        id: &str,
        api_key_id: Option<&str>,
        cron_expr: &str,
        url: &str,
        params: &ExtractParams,
        webhook_url: Option<&str>,
        webhook_secret: Option<&str>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let params_json = serde_json::to_string(params)
            .map_err(|e| crate::Error::Server(format!("failed to serialize schedule params: {e}")))?;
        sqlx::query(
            "INSERT INTO schedules (id, api_key_id, cron_expr, url, params_json, webhook_url, webhook_secret, is_active, next_run_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(id)
        .bind(api_key_id)
        .bind(cron_expr)
        .bind(url)
        .bind(params_json)
        .bind(webhook_url)
        .bind(webhook_secret)
        .bind(next_run_at)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    pub async fn list_schedules(&self, api_key_id: Option<&str>) -> Result<Vec<Schedule>> {
        let rows = match api_key_id {
            Some(k) => {
                sqlx::query_as::<_, Schedule>(
                    "SELECT * FROM schedules WHERE api_key_id = ? ORDER BY created_at DESC",
                )
                .bind(k)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, Schedule>("SELECT * FROM schedules ORDER BY created_at DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn set_schedule_active(&self, id: &str, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE schedules SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Apply a partial update: `None` leaves a field unchanged, matching
    /// PATCH semantics at the HTTP layer. Recomputes nothing about
    /// `next_run_at` - callers pass it explicitly when `cron_expr` changes.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_schedule(
        &self,
        id: &str,
        cron_expr: Option<&str>,
        url: Option<&str>,
        params: Option<&ExtractParams>,
        webhook_url: Option<Option<&str>>,
        webhook_secret: Option<Option<&str>>,
        next_run_at: Option<DateTime<Utc>>,
        is_active: Option<bool>,
    ) -> Result<()> {
        let params_json = params
            .map(|p| {
                serde_json::to_string(p).map_err(|e| crate::Error::Server(format!("failed to serialize schedule params: {e}")))
            })
            .transpose()?;

        sqlx::query(
            "UPDATE schedules SET
                cron_expr = COALESCE(?, cron_expr),
                url = COALESCE(?, url),
                params_json = COALESCE(?, params_json),
                webhook_url = CASE WHEN ? THEN ? ELSE webhook_url END,
                webhook_secret = CASE WHEN ? THEN ? ELSE webhook_secret END,
                next_run_at = COALESCE(?, next_run_at),
                is_active = COALESCE(?, is_active)
             WHERE id = ?",
        )
        .bind(cron_expr)
        .bind(url)
        .bind(params_json)
        .bind(webhook_url.is_some())
        .bind(webhook_url.flatten())
        .bind(webhook_secret.is_some())
        .bind(webhook_secret.flatten())
        .bind(next_run_at)
        .bind(is_active)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Select up to `limit` active schedules due at or before `now`.
    pub async fn due_schedules(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT * FROM schedules WHERE is_active = 1 AND next_run_at <= ?
             ORDER BY next_run_at ASC LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Advance `next_run_at` iff it still equals `expected_prev` - a
    /// compare-and-set that prevents two concurrent scheduler ticks from
    /// both dispatching the same due instance.
    pub async fn advance_schedule(
        &self,
        id: &str,
        expected_prev: DateTime<Utc>,
        new_next_run_at: DateTime<Utc>,
        ran_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET next_run_at = ?, last_run_at = ? WHERE id = ? AND next_run_at = ?",
        )
        .bind(new_next_run_at)
        .bind(ran_at)
        .bind(id)
        .bind(expected_prev)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use chrono::Duration;

    fn sample_params() -> ExtractParams {
        ExtractParams {
            url: "https://example.com".into(),
            fields: vec!["price".into()],
            schema: None,
            instructions: None,
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn advance_schedule_only_wins_once() {
        let store = test_store().await;
        let prev = Utc::now() - Duration::minutes(5);
        store
            .create_schedule("sched-1", None, "0 * * * *", "https://example.com", &sample_params(), None, None, prev)
            .await
            .unwrap();

        let next = prev + Duration::hours(1);
        let now = Utc::now();
        let first = store.advance_schedule("sched-1", prev, next, now).await.unwrap();
        assert!(first);

        // A second tick racing on the same stale `prev` loses the CAS.
        let second = store.advance_schedule("sched-1", prev, next + Duration::hours(1), now).await.unwrap();
        assert!(!second);

        let sched = store.get_schedule("sched-1").await.unwrap().unwrap();
        assert_eq!(sched.next_run_at, next);
    }

    #[tokio::test]
    async fn update_schedule_leaves_unspecified_fields_untouched() {
        let store = test_store().await;
        store
            .create_schedule("sched-2", None, "0 * * * *", "https://example.com", &sample_params(), None, None, Utc::now())
            .await
            .unwrap();

        store.update_schedule("sched-2", None, None, None, None, None, None, Some(false)).await.unwrap();

        let sched = store.get_schedule("sched-2").await.unwrap().unwrap();
        assert!(!sched.is_active);
        assert_eq!(sched.cron_expr, "0 * * * *");
        assert_eq!(sched.url, "https://example.com");
    }

    #[tokio::test]
    async fn due_schedules_only_returns_active_and_due() {
        let store = test_store().await;
        let past = Utc::now() - Duration::minutes(1);
        let future = Utc::now() + Duration::hours(1);
        store
            .create_schedule("due", None, "* * * * *", "https://a.example", &sample_params(), None, None, past)
            .await
            .unwrap();
        store
            .create_schedule("not-due", None, "* * * * *", "https://b.example", &sample_params(), None, None, future)
            .await
            .unwrap();

        let due = store.due_schedules(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "due");
    }
}
