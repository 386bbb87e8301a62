//! Fixed-window rate limiting, keyed by API key id for authenticated
//! traffic or by remote IP for anonymous traffic.

use chrono::Duration;

use crate::error::{Error, Result};
use crate::store::rate_limit::RateLimitOutcome;
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: i64,
    pub limit: i64,
    pub remaining: i64,
}

pub struct RateLimiter {
    store: Store,
    anonymous_per_minute: u32,
    authenticated_per_minute: u32,
}

impl RateLimiter {
    pub fn new(store: Store, anonymous_per_minute: u32, authenticated_per_minute: u32) -> Self {
        Self {
            store,
            anonymous_per_minute,
            authenticated_per_minute,
        }
    }

    pub async fn check(&self, identifier: &str, authenticated: bool) -> Result<RateLimitDecision> {
        let limit = if authenticated {
            self.authenticated_per_minute
        } else {
            self.anonymous_per_minute
        };

        let outcome = self
            .store
            .check_and_increment_rate_limit(identifier, limit as i64, Duration::seconds(60))
            .await?;

        match outcome {
            RateLimitOutcome::Allowed { count } => Ok(RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
                limit: limit as i64,
                remaining: (limit as i64 - count).max(0),
            }),
            RateLimitOutcome::Exceeded { retry_after } => Ok(RateLimitDecision {
                allowed: false,
                retry_after_secs: retry_after.num_seconds().max(1),
                limit: limit as i64,
                remaining: 0,
            }),
        }
    }

    pub async fn enforce(&self, identifier: &str, authenticated: bool) -> Result<()> {
        if self.check(identifier, authenticated).await?.allowed {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded)
        }
    }
}
