//! Error types and the redaction applied before an error crosses a trust boundary.

use thiserror::Error;

/// Result type for robotscrape-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy. Each variant maps to one HTTP status in robotscrape-api.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("blocked by target site")]
    Blocked,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job not ready")]
    NotReady,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("config error: {0}")]
    Config(String),

    #[error("config not found. searched: {searched:?}")]
    ConfigNotFound { searched: Vec<std::path::PathBuf> },

    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("blob store error: {0}")]
    Blob(String),

    #[error("browser adapter error: {0}")]
    Browser(String),

    #[error("llm adapter error: {0}")]
    Llm(String),

    #[error("llm circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Stable machine-readable code for the JSON error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized => "unauthorized",
            Error::InsufficientCredits => "insufficient_credits",
            Error::Blocked => "blocked",
            Error::NotFound(_) => "not_found",
            Error::NotReady => "not_ready",
            Error::PayloadTooLarge => "payload_too_large",
            Error::RateLimitExceeded => "rate_limit_exceeded",
            Error::QueueUnavailable(_) => "queue_unavailable",
            Error::Config(_)
            | Error::ConfigNotFound { .. }
            | Error::ConfigParse { .. }
            | Error::Store(_)
            | Error::Migrate(_)
            | Error::Blob(_)
            | Error::Browser(_)
            | Error::Llm(_)
            | Error::CircuitOpen(_)
            | Error::Io(_)
            | Error::InvalidCron(_)
            | Error::Server(_) => "server_error",
        }
    }

    /// Whether a client may reasonably retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::Server(_)
                | Error::QueueUnavailable(_)
                | Error::RateLimitExceeded
                | Error::Store(_)
                | Error::Browser(_)
                | Error::Llm(_)
                | Error::CircuitOpen(_)
        )
    }

    /// User-facing message with internal detail stripped out.
    pub fn public_message(&self) -> String {
        redact(&self.to_string())
    }
}

/// Strip substrings that should never leave the process boundary: filesystem
/// paths, email addresses, bearer tokens, and provider-key-shaped strings.
pub fn redact(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for word in input.split_inclusive(' ') {
        let (core, trailing_space) = match word.strip_suffix(' ') {
            Some(c) => (c, true),
            None => (word, false),
        };
        let replacement = redact_token(core);
        out.push_str(&replacement);
        if trailing_space {
            out.push(' ');
        }
    }
    out
}

fn redact_token(token: &str) -> std::borrow::Cow<'_, str> {
    let trimmed = token.trim_matches(|c: char| ",.;:()[]{}\"'".contains(c));
    if trimmed.is_empty() {
        return std::borrow::Cow::Borrowed(token);
    }

    if looks_like_path(trimmed) {
        return std::borrow::Cow::Borrowed("[REDACTED_PATH]");
    }
    if trimmed.contains('@') && trimmed.contains('.') && !trimmed.contains('/') {
        return std::borrow::Cow::Borrowed("[REDACTED_EMAIL]");
    }
    if looks_like_secret(trimmed) {
        return std::borrow::Cow::Borrowed("[REDACTED_TOKEN]");
    }
    std::borrow::Cow::Borrowed(token)
}

fn looks_like_path(s: &str) -> bool {
    (s.starts_with('/') || s.starts_with("./") || s.starts_with("../")) && s.len() > 1
}

fn looks_like_secret(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    let prefixed = lower.starts_with("sk-")
        || lower.starts_with("bearer")
        || lower.starts_with("api-key")
        || lower.starts_with("key-");
    let long_opaque = s.len() >= 20
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    prefixed || (long_opaque && s.chars().any(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_file_path() {
        let msg = redact("failed to read /etc/robotscrape/secrets.toml: denied");
        assert!(!msg.contains("/etc/robotscrape"));
        assert!(msg.contains("[REDACTED_PATH]"));
    }

    #[test]
    fn redacts_email() {
        let msg = redact("notify owner@example.com about the failure");
        assert!(msg.contains("[REDACTED_EMAIL]"));
    }

    #[test]
    fn redacts_bearer_token() {
        let msg = redact("request failed with Bearer sk-proj-AbCdEf1234567890XyZ");
        assert!(!msg.contains("AbCdEf1234567890XyZ"));
    }

    #[test]
    fn leaves_plain_text_alone() {
        let msg = redact("navigation timed out after 15000ms");
        assert_eq!(msg, "navigation timed out after 15000ms");
    }

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(Error::InsufficientCredits.code(), "insufficient_credits");
        assert_eq!(Error::RateLimitExceeded.code(), "rate_limit_exceeded");
        assert!(Error::RateLimitExceeded.retryable());
        assert!(!Error::Unauthorized.retryable());
    }
}
