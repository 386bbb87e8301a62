//! Domain types for robotscrape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job lifecycle state. Transitions are monotonic: `Queued -> Processing ->
/// {Completed | Failed | Blocked}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Blocked,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Blocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "blocked" => Some(JobStatus::Blocked),
            _ => None,
        }
    }
}

/// Options requested alongside an extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractOptions {
    #[serde(default)]
    pub screenshot: bool,
    #[serde(default)]
    pub store_content: bool,
    pub wait_until: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// A validated, canonicalized extraction request. This is the shape both
/// the synchronous HTTP path and a dispatched queue message carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractParams {
    pub url: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub schema: Option<Value>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub options: ExtractOptions,
}

/// Issued credential. Authenticated by the SHA-256 of the raw key string,
/// never by the raw string itself.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub key_hash: String,
    pub owner: String,
    pub tier: String,
    pub remaining_credits: i64,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One asynchronous extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub api_key_id: Option<String>,
    pub url: String,
    pub params_json: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub status: String,
    pub result_path: Option<String>,
    pub token_usage: Option<i64>,
    pub latency_ms: Option<i64>,
    pub blocked: bool,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Queued)
    }

    pub fn params(&self) -> crate::Result<ExtractParams> {
        serde_json::from_str(&self.params_json)
            .map_err(|e| crate::Error::Server(format!("corrupt job params: {e}")))
    }
}

/// A recurring extraction, dispatched by the cron scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: String,
    pub api_key_id: Option<String>,
    pub cron_expr: String,
    pub url: String,
    pub params_json: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_active: bool,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn params(&self) -> crate::Result<ExtractParams> {
        serde_json::from_str(&self.params_json)
            .map_err(|e| crate::Error::Server(format!("corrupt schedule params: {e}")))
    }
}

/// Content-addressed cache row. Not owned by any caller; shared across keys
/// because the fingerprint excludes per-caller context.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub result_path: String,
    pub token_usage: i64,
    pub content_chars: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
    pub last_hit_at: Option<DateTime<Utc>>,
}

/// A stored idempotent-replay record keyed by the client-supplied key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyEntry {
    pub idempotency_key: String,
    pub request_hash: String,
    pub status_code: i64,
    pub response_body: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Append-only record of one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapeLog {
    pub id: String,
    pub api_key_id: Option<String>,
    pub url: String,
    pub params_json: String,
    pub token_usage: Option<i64>,
    pub latency_ms: Option<i64>,
    pub status: String,
    pub error_msg: Option<String>,
    pub content_blob_key: Option<String>,
    pub result_blob_key: Option<String>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only semantic event (cache hit/miss, idempotency hit, ...).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventLog {
    pub id: String,
    pub api_key_id: Option<String>,
    pub kind: String,
    pub metadata_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A webhook delivery that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookDeadLetter {
    pub id: String,
    pub job_id: Option<String>,
    pub url: String,
    pub payload_json: String,
    pub last_error: String,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
}

/// Fixed-window rate-limit counter, persisted when the limiter runs against
/// the tabular store rather than an in-process map.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RateLimitEntry {
    pub identifier: String,
    pub request_count: i64,
    pub window_end: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_roundtrips_through_str() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Blocked,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn only_completed_failed_blocked_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Blocked.is_terminal());
    }

    #[test]
    fn extract_options_default_is_false_and_none() {
        let opts = ExtractOptions::default();
        assert!(!opts.screenshot);
        assert!(!opts.store_content);
        assert!(opts.wait_until.is_none());
        assert!(opts.timeout_ms.is_none());
    }
}
