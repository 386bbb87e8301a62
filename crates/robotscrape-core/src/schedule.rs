//! Cron-driven recurring extractions. Next-fire-time computation uses the
//! `cron` crate rather than a hand-rolled parser.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::error::{Error, Result};
use crate::queue::JobQueue;
use crate::store::Store;
use crate::types::ExtractParams;

/// Parse a five-field cron expression and return the first fire time
/// strictly after `after`.
pub fn next_fire_after(cron_expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse(cron_expr)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::InvalidCron(format!("{cron_expr} has no future fire time")))
}

pub fn validate(cron_expr: &str) -> Result<()> {
    parse(cron_expr).map(|_| ())
}

fn parse(cron_expr: &str) -> Result<CronSchedule> {
    // The `cron` crate expects a leading seconds field; a plain five-field
    // minute-hour-dom-month-dow expression gets `0` prepended.
    let normalized = if cron_expr.split_whitespace().count() == 5 {
        format!("0 {cron_expr}")
    } else {
        cron_expr.to_string()
    };
    CronSchedule::from_str(&normalized).map_err(|e| Error::InvalidCron(format!("{cron_expr}: {e}")))
}

/// Select due schedules and dispatch each as a queued job, advancing
/// `next_run_at` under the compare-and-set guard so two overlapping ticks
/// cannot both dispatch the same instance.
pub async fn tick(store: &Store, queue: &dyn JobQueue, batch_size: i64, credit_cost: i64) -> Result<usize> {
    let now = Utc::now();
    let due = store.due_schedules(now, batch_size).await?;
    let mut dispatched = 0;

    for schedule in due {
        let next_run_at = match next_fire_after(&schedule.cron_expr, schedule.next_run_at) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(schedule_id = %schedule.id, error = %e, "failed to compute next fire time, skipping");
                continue;
            }
        };

        let won = store
            .advance_schedule(&schedule.id, schedule.next_run_at, next_run_at, now)
            .await?;
        if !won {
            // Another tick already claimed this instance.
            continue;
        }

        let params: ExtractParams = match schedule.params() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(schedule_id = %schedule.id, error = %e, "corrupt schedule params, skipping");
                continue;
            }
        };

        let job_id = uuid::Uuid::new_v4().to_string();

        store
            .create_job(
                &job_id,
                schedule.api_key_id.as_deref(),
                &schedule.url,
                &params,
                schedule.webhook_url.as_deref(),
                schedule.webhook_secret.as_deref(),
            )
            .await?;

        if let Some(key_id) = schedule.api_key_id.as_deref() {
            match store.consume_credits_by_id(key_id, credit_cost).await {
                Ok(crate::store::api_keys::ConsumeOutcome::Ok { .. }) => {}
                _ => {
                    store
                        .mark_job_failed(&job_id, "schedule owner has insufficient credits")
                        .await?;
                    continue;
                }
            }
        }

        queue.enqueue(&job_id).await?;
        dispatched += 1;
    }

    Ok(dispatched)
}
