//! Request-scoped middleware: assigns a request id, resolves the caller's
//! API key (without consuming credits), and enforces the per-identifier
//! rate limit before the handler runs.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

const REQUEST_ID_HEADER: &str = "x-request-id";
const API_KEY_HEADER: &str = "x-api-key";

/// Caller identity as resolved by [`request_context`]. `Public` covers both
/// anonymous-mode traffic and requests with no key on an unauthenticated route.
#[derive(Debug, Clone)]
pub enum AuthContext {
    Public,
    Authenticated {
        api_key_id: String,
        raw_key: String,
        owner: String,
        tier: String,
    },
}

impl AuthContext {
    pub fn api_key_id(&self) -> Option<&str> {
        match self {
            AuthContext::Authenticated { api_key_id, .. } => Some(api_key_id),
            AuthContext::Public => None,
        }
    }

    pub fn raw_key(&self) -> Option<&str> {
        match self {
            AuthContext::Authenticated { raw_key, .. } => Some(raw_key),
            AuthContext::Public => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthContext::Authenticated { .. })
    }
}

/// Per-request metadata threaded through extensions: the request id, the
/// resolved caller, and the rate-limit decision made for this request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub auth: AuthContextHandle,
}

pub type AuthContextHandle = Arc<AuthContext>;

pub async fn request_context(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let raw_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let auth = match raw_key {
        Some(raw_key) => match state.robot.verify_key(&raw_key).await {
            Ok(key) => AuthContext::Authenticated {
                api_key_id: key.id,
                raw_key,
                owner: key.owner,
                tier: key.tier,
            },
            Err(e) => return ApiError::new(request_id, e).into_response(),
        },
        None => AuthContext::Public,
    };

    let identifier = match &auth {
        AuthContext::Authenticated { raw_key, .. } => {
            format!("key:{}", &raw_key[..raw_key.len().min(8)])
        }
        AuthContext::Public => client_ip(&request, peer, &state)
            .map(|ip| format!("ip:{ip}"))
            .unwrap_or_else(|| format!("anon:{}", Uuid::new_v4())),
    };

    let decision = match state.robot.check_rate_limit(&identifier, auth.is_authenticated()).await {
        Ok(d) => d,
        Err(e) => return ApiError::new(request_id, e).into_response(),
    };

    let auth = Arc::new(auth);
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        auth: auth.clone(),
    });

    if !decision.allowed {
        let retry_at = chrono::Utc::now() + chrono::Duration::seconds(decision.retry_after_secs);
        let error = ApiError::new(request_id.clone(), robotscrape_core::Error::RateLimitExceeded).into_response();
        let mut response = error;
        insert_header(&mut response, header::RETRY_AFTER, &decision.retry_after_secs.to_string());
        insert_header(&mut response, "x-ratelimit-limit", &decision.limit.to_string());
        insert_header(&mut response, "x-ratelimit-remaining", "0");
        insert_header(&mut response, "x-ratelimit-reset", &retry_at.to_rfc3339());
        insert_header(&mut response, "x-request-id", &request_id);
        return response;
    }

    let mut response = next.run(request).await;
    insert_header(&mut response, "x-request-id", &request_id);
    insert_header(&mut response, "x-ratelimit-limit", &decision.limit.to_string());
    insert_header(&mut response, "x-ratelimit-remaining", &decision.remaining.to_string());
    response
}

fn client_ip(request: &Request, peer: SocketAddr, state: &AppState) -> Option<std::net::IpAddr> {
    let behind_proxy = state
        .robot
        .config()
        .server
        .as_ref()
        .map(|s| s.behind_proxy)
        .unwrap_or(false);

    if behind_proxy {
        if let Some(forwarded) = request.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return Some(ip);
                }
            }
        }
        if let Some(real_ip) = request.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = real_ip.parse() {
                return Some(ip);
            }
        }
    }
    Some(peer.ip())
}

fn insert_header(response: &mut Response, name: impl TryInto<header::HeaderName>, value: &str) {
    if let (Ok(name), Ok(value)) = (name.try_into().map_err(|_| ()), HeaderValue::from_str(value)) {
        response.headers_mut().insert(name, value);
    }
}

/// Require that the caller authenticated, unless the server runs in
/// anonymous mode (in which case public callers are treated as authorized
/// with no owning key).
pub fn require_auth(ctx: &RequestContext, anonymous_mode: bool) -> Result<AuthContext, ApiError> {
    match ctx.auth.as_ref() {
        authenticated @ AuthContext::Authenticated { .. } => Ok(authenticated.clone()),
        AuthContext::Public if anonymous_mode => Ok(AuthContext::Public),
        AuthContext::Public => Err(ApiError::new(ctx.request_id.clone(), robotscrape_core::Error::Unauthorized)),
    }
}
