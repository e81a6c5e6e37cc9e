//! Single-window cooldown limiter.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the action may proceed
    pub allowed: bool,
    /// Time left in the cooldown (zero when allowed)
    pub remaining: Duration,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            remaining: Duration::ZERO,
        }
    }

    fn deny(remaining: Duration) -> Self {
        Self {
            allowed: false,
            remaining,
        }
    }
}

/// Cooldown limiter.
///
/// The window starts at the last *allowed* call; denied calls leave it
/// untouched.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Check without starting a window.
    ///
    /// The first call is always allowed. Later calls are allowed only once
    /// strictly more than `cooldown` has elapsed since the last commit.
    pub fn check(&self, cooldown: Duration) -> RateLimitDecision {
        let last = *self
            .last_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::evaluate(last, Instant::now(), cooldown)
    }

    /// Start a new window now.
    pub fn commit(&self) {
        *self
            .last_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Check and, if allowed, start a new window.
    pub fn try_acquire(&self, cooldown: Duration) -> RateLimitDecision {
        let now = Instant::now();
        let mut last = self
            .last_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let decision = Self::evaluate(*last, now, cooldown);
        if decision.allowed {
            *last = Some(now);
        }
        decision
    }

    fn evaluate(last: Option<Instant>, now: Instant, cooldown: Duration) -> RateLimitDecision {
        let Some(previous) = last else {
            return RateLimitDecision::allow();
        };
        let elapsed = now.saturating_duration_since(previous);
        if elapsed > cooldown {
            RateLimitDecision::allow()
        } else {
            RateLimitDecision::deny(cooldown.saturating_sub(elapsed))
        }
    }

    /// Forget the last allowed call
    pub fn reset(&self) {
        *self
            .last_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
