//! Webhook delivery: SSRF-checked, DNS-pinned, HMAC-signed, with an
//! exponential backoff retry ladder and dead-letter persistence on
//! exhaustion. Mirrors the teacher's own `fire_webhooks`/`send_webhook`
//! pattern, generalised from a single fixed retry count to a configurable
//! ladder and from a fire-and-forget void return to a tracked outcome.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::crypto::hmac_sha256_hex;
use crate::error::{Error, Result};
use crate::security::validate_outbound_url;
use crate::store::Store;

/// Backoff ladder in seconds: 1, 2, 4, 8, 16 - five retries after the first
/// attempt.
const BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 16];
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    ClientRejected,
    Exhausted,
}

pub struct WebhookPayload {
    pub job_id: String,
    pub status: String,
    pub result_path: Option<String>,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl WebhookPayload {
    fn to_json(&self) -> Value {
        serde_json::json!({
            "job_id": self.job_id,
            "status": self.status,
            "result_path": self.result_path,
            "data": self.data,
            "error": self.error,
        })
    }
}

/// Deliver `payload` to `url`, signing with `secret` if present. Retries
/// 5xx/network failures on the backoff ladder; never retries 4xx. On final
/// exhaustion, persists a dead-letter row. Webhook outcomes never revert a
/// job's terminal state - the caller has already committed that before
/// calling this.
pub async fn send_webhook(store: &Store, url: &str, secret: Option<&str>, payload: &WebhookPayload) -> Result<DeliveryOutcome> {
    let safe = match validate_outbound_url(url, true).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%url, error = %e, "skipping webhook: failed SSRF validation");
            return Ok(DeliveryOutcome::ClientRejected);
        }
    };

    let client = reqwest::Client::builder()
        .resolve(&safe.host, safe.pinned_addr)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let body = serde_json::to_vec(&payload.to_json())
        .map_err(|e| Error::Server(format!("failed to serialize webhook payload: {e}")))?;
    let signature = secret.map(|s| hmac_sha256_hex(s, &body));
    let timestamp_ms = Utc::now().timestamp_millis();

    let mut last_error = String::new();
    let max_attempts = BACKOFF_SECS.len() + 1;

    for attempt in 0..max_attempts {
        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-robot-event", format!("job.{}", payload.status))
            .header("x-robot-timestamp", timestamp_ms.to_string());

        if attempt > 0 {
            request = request.header("x-robot-retry-attempt", attempt.to_string());
        }
        if let Some(sig) = &signature {
            request = request.header("x-robot-signature-256", sig.clone());
        }

        match request.body(body.clone()).send().await {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                return Ok(DeliveryOutcome::Delivered);
            }
            Ok(response) if response.status().is_client_error() => {
                tracing::warn!(%url, status = %response.status(), "webhook rejected by receiver, not retrying");
                return Ok(DeliveryOutcome::ClientRejected);
            }
            Ok(response) => {
                last_error = format!("received status {}", response.status());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        if attempt < BACKOFF_SECS.len() {
            tokio::time::sleep(Duration::from_secs(BACKOFF_SECS[attempt])).await;
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let payload_json = serde_json::to_string(&payload.to_json())
        .map_err(|e| Error::Server(format!("failed to serialize dead letter payload: {e}")))?;
    store
        .insert_webhook_dead_letter(&id, Some(&payload.job_id), url, &payload_json, &last_error, max_attempts as i64)
        .await?;

    tracing::error!(%url, job_id = %payload.job_id, "webhook delivery exhausted retries, dead-lettered");
    Ok(DeliveryOutcome::Exhausted)
}

/// Verify an inbound `x-robot-signature-256` header, used by the
/// `/webhook/test` endpoint to prove a secret round-trips correctly.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    crate::crypto::verify_hmac_sha256_hex(secret, body, signature_hex)
}
