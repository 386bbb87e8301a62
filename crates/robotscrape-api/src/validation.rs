//! Request-body validation for the extraction and schedule endpoints. Shape
//! errors surface as `Error::BadRequest`; SSRF checks delegate to
//! `robotscrape_core::security`.

use robotscrape_core::{Error, ExtractOptions, ExtractParams, Result};
use robotscrape_core::security::validate_outbound_url;
use serde::Deserialize;
use serde_json::Value;

const MAX_FIELDS: usize = 50;
const MAX_INSTRUCTIONS_CHARS: usize = 2000;
const MIN_TIMEOUT_MS: u64 = 1000;
const MAX_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
pub struct ExtractRequestBody {
    pub url: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub schema: Option<Value>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub r#async: bool,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub options: ExtractOptions,
}

/// Validates and canonicalizes one extract request body, checking the
/// target URL against the SSRF guard and the webhook URL (if present)
/// against the same guard plus an https requirement.
pub async fn validate_extract(body: ExtractRequestBody) -> Result<(ExtractParams, bool, Option<String>, Option<String>)> {
    validate_outbound_url(&body.url, false).await?;

    if body.fields.is_empty() && body.schema.is_none() {
        return Err(Error::BadRequest("at least one of fields or schema is required".into()));
    }
    if body.fields.len() > MAX_FIELDS {
        return Err(Error::BadRequest(format!("fields must not exceed {MAX_FIELDS} entries")));
    }
    if body.fields.iter().any(|f| f.trim().is_empty()) {
        return Err(Error::BadRequest("fields must not contain empty strings".into()));
    }
    if let Some(schema) = &body.schema {
        if !schema.is_object() {
            return Err(Error::BadRequest("schema must be a JSON object".into()));
        }
    }
    if let Some(instructions) = &body.instructions {
        if instructions.chars().count() > MAX_INSTRUCTIONS_CHARS {
            return Err(Error::BadRequest(format!("instructions must not exceed {MAX_INSTRUCTIONS_CHARS} characters")));
        }
    }
    if let Some(timeout) = body.options.timeout_ms {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout) {
            return Err(Error::BadRequest(format!("options.timeoutMs must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS}")));
        }
    }
    if let Some(wait_until) = &body.options.wait_until {
        if wait_until != "domcontentloaded" && wait_until != "networkidle0" {
            return Err(Error::BadRequest("options.waitUntil must be domcontentloaded or networkidle0".into()));
        }
    }

    if let Some(webhook_url) = &body.webhook_url {
        validate_outbound_url(webhook_url, true).await?;
    }

    let params = ExtractParams {
        url: body.url,
        fields: body.fields,
        schema: body.schema,
        instructions: body.instructions.map(|s| s.trim().to_string()),
        options: body.options,
    };

    Ok((params, body.r#async, body.webhook_url, body.webhook_secret))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequestBody {
    pub urls: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    pub schema: Option<Value>,
    pub instructions: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub options: ExtractOptions,
}

pub async fn validate_batch(body: &BatchRequestBody, max_batch_size: usize) -> Result<()> {
    if body.urls.is_empty() {
        return Err(Error::BadRequest("urls must not be empty".into()));
    }
    if body.urls.len() > max_batch_size {
        return Err(Error::BadRequest(format!("batch must not exceed {max_batch_size} urls")));
    }
    for url in &body.urls {
        validate_outbound_url(url, false).await?;
    }
    if body.fields.is_empty() && body.schema.is_none() {
        return Err(Error::BadRequest("at least one of fields or schema is required".into()));
    }
    if let Some(webhook_url) = &body.webhook_url {
        validate_outbound_url(webhook_url, true).await?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequestBody {
    pub cron: String,
    pub url: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub schema: Option<Value>,
    pub instructions: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub options: ExtractOptions,
}

pub async fn validate_schedule(body: &ScheduleRequestBody) -> Result<()> {
    robotscrape_core::schedule::validate(&body.cron)?;
    validate_outbound_url(&body.url, false).await?;
    if body.fields.is_empty() && body.schema.is_none() {
        return Err(Error::BadRequest("at least one of fields or schema is required".into()));
    }
    if let Some(webhook_url) = &body.webhook_url {
        validate_outbound_url(webhook_url, true).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(url: &str) -> ExtractRequestBody {
        ExtractRequestBody {
            url: url.to_string(),
            fields: vec!["title".into()],
            schema: None,
            instructions: None,
            r#async: false,
            webhook_url: None,
            webhook_secret: None,
            options: ExtractOptions::default(),
        }
    }

    #[tokio::test]
    async fn rejects_private_targets() {
        assert!(validate_extract(body("http://127.0.0.1/admin")).await.is_err());
        assert!(validate_extract(body("http://169.254.169.254/latest/meta-data")).await.is_err());
    }

    #[tokio::test]
    async fn accepts_a_well_formed_request() {
        let (params, is_async, webhook_url, _) = validate_extract(body("https://example.com")).await.unwrap();
        assert_eq!(params.url, "https://example.com");
        assert!(!is_async);
        assert!(webhook_url.is_none());
    }

    #[tokio::test]
    async fn requires_fields_or_schema() {
        let mut b = body("https://example.com");
        b.fields = vec![];
        assert!(validate_extract(b).await.is_err());
    }

    #[tokio::test]
    async fn rejects_http_webhook_urls() {
        let mut b = body("https://example.com");
        b.webhook_url = Some("http://example.com/hook".into());
        assert!(validate_extract(b).await.is_err());
    }

    #[tokio::test]
    async fn preserves_caller_field_order_for_the_prompt() {
        let mut b = body("https://example.com");
        b.fields = vec!["price".into(), "title".into()];
        let (params, ..) = validate_extract(b).await.unwrap();
        assert_eq!(params.fields, vec!["price".to_string(), "title".to_string()]);
    }
}
