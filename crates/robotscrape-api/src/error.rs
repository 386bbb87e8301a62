//! Conversion from `robotscrape_core::Error` (and request-validation failures)
//! into the JSON error envelope every route returns.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use robotscrape_core::Error as CoreError;
use serde::Serialize;

/// Wraps a core error plus the request id to correlate with logs.
pub struct ApiError {
    pub request_id: String,
    pub error: CoreError,
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, error: CoreError) -> Self {
        Self {
            request_id: request_id.into(),
            error,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docs_url: Option<&'static str>,
    request_id: String,
    retryable: bool,
}

#[derive(Serialize)]
struct Envelope {
    success: bool,
    error: ErrorBody,
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
        CoreError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
        CoreError::Blocked => StatusCode::FORBIDDEN,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::NotReady => StatusCode::CONFLICT,
        CoreError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        CoreError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        CoreError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn suggestion_for(error: &CoreError) -> Option<&'static str> {
    match error {
        CoreError::InsufficientCredits => Some("purchase additional credits or reduce request volume"),
        CoreError::RateLimitExceeded => Some("retry after the window indicated by Retry-After"),
        CoreError::Blocked => Some("the target site blocked automated access; try a fallback renderer"),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(request_id = %self.request_id, error = %self.error, "request failed");
        } else {
            tracing::warn!(request_id = %self.request_id, error = %self.error, "request rejected");
        }

        let body = Envelope {
            success: false,
            error: ErrorBody {
                code: self.error.code(),
                message: self.error.public_message(),
                suggestion: suggestion_for(&self.error),
                docs_url: None,
                request_id: self.request_id,
                retryable: self.error.retryable(),
            },
        };
        (status, Json(body)).into_response()
    }
}
