//! Per-provider circuit breaker guarding calls to LLM adapters. Three
//! explicit states: `Closed` (normal), `Open` (failing fast until a cooldown
//! elapses), `HalfOpen` (trial calls are allowed through to decide whether
//! to close or re-open).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct ProviderState {
    state: State,
    consecutive_failures: u32,
    consecutive_half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            consecutive_half_open_successes: 0,
            opened_at: None,
        }
    }
}

/// A registry of independent breakers, one per provider name, rather than a
/// single process-wide singleton. Guarding a provider that's down shouldn't
/// trip requests to a healthy one.
pub struct CircuitBreakerRegistry {
    failure_threshold: u32,
    half_open_success_threshold: u32,
    cooldown: Duration,
    providers: Mutex<HashMap<String, ProviderState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self::with_half_open_threshold(failure_threshold, cooldown_secs, 3)
    }

    pub fn with_half_open_threshold(
        failure_threshold: u32,
        cooldown_secs: u64,
        half_open_success_threshold: u32,
    ) -> Self {
        Self {
            failure_threshold,
            half_open_success_threshold: half_open_success_threshold.max(1),
            cooldown: Duration::from_secs(cooldown_secs),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `provider` currently permits a call, transitioning
    /// `Open -> HalfOpen` if the cooldown has elapsed.
    pub fn allow(&self, provider: &str) -> Result<()> {
        let mut providers = self.providers.lock().expect("circuit breaker mutex poisoned");
        let entry = providers.entry(provider.to_string()).or_default();

        match entry.state {
            State::Closed => Ok(()),
            State::HalfOpen => Ok(()),
            State::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    entry.state = State::HalfOpen;
                    entry.consecutive_half_open_successes = 0;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen(provider.to_string()))
                }
            }
        }
    }

    /// Record a successful call. In `HalfOpen`, only closes after
    /// `half_open_success_threshold` consecutive successes.
    pub fn record_success(&self, provider: &str) {
        let mut providers = self.providers.lock().expect("circuit breaker mutex poisoned");
        let entry = providers.entry(provider.to_string()).or_default();

        match entry.state {
            State::HalfOpen => {
                entry.consecutive_half_open_successes += 1;
                if entry.consecutive_half_open_successes >= self.half_open_success_threshold {
                    entry.state = State::Closed;
                    entry.consecutive_failures = 0;
                    entry.opened_at = None;
                }
            }
            State::Closed => {
                entry.consecutive_failures = 0;
            }
            State::Open => {}
        }
    }

    pub fn record_failure(&self, provider: &str) {
        let mut providers = self.providers.lock().expect("circuit breaker mutex poisoned");
        let entry = providers.entry(provider.to_string()).or_default();

        match entry.state {
            State::HalfOpen => {
                entry.state = State::Open;
                entry.opened_at = Some(Instant::now());
                entry.consecutive_half_open_successes = 0;
            }
            State::Closed | State::Open => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = State::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
        }
    }
}
