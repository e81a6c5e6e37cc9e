//! One limiter per action category.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::limiter::{RateLimitDecision, RateLimiter};
use crate::config::RateLimitConfig;
use crate::protocol::OpCode;

/// Groups of user actions that share a cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    /// Login, account creation, verification and auto-login requests
    PreAuthentication,
    /// Friend/block/pending changes
    RelationshipUpdate,
}

impl ActionCategory {
    /// Category an outbound opcode is throttled under, if any
    pub fn for_op_code(op_code: OpCode) -> Option<Self> {
        match op_code {
            OpCode::RequestCreateAccount
            | OpCode::RequestLogin
            | OpCode::VerificationProcess
            | OpCode::AutoLoginRequest => Some(Self::PreAuthentication),
            OpCode::UpdateRelationship => Some(Self::RelationshipUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCategory::PreAuthentication => write!(f, "pre-authentication"),
            ActionCategory::RelationshipUpdate => write!(f, "relationship-update"),
        }
    }
}

/// Independent limiters keyed by category
#[derive(Debug)]
pub struct RateLimiterRegistry {
    limiters: HashMap<ActionCategory, (RateLimiter, Duration)>,
}

impl RateLimiterRegistry {
    /// Build from explicit cooldowns
    pub fn new(cooldowns: impl IntoIterator<Item = (ActionCategory, Duration)>) -> Self {
        Self {
            limiters: cooldowns
                .into_iter()
                .map(|(category, cooldown)| (category, (RateLimiter::new(), cooldown)))
                .collect(),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new([
            (
                ActionCategory::PreAuthentication,
                Duration::from_millis(config.pre_authentication_cooldown_ms),
            ),
            (
                ActionCategory::RelationshipUpdate,
                Duration::from_millis(config.relationship_update_cooldown_ms),
            ),
        ])
    }

    /// Cooldown configured for a category
    pub fn cooldown(&self, category: ActionCategory) -> Option<Duration> {
        self.limiters.get(&category).map(|(_, cooldown)| *cooldown)
    }

    /// Check a category. Categories without a limiter are always allowed.
    pub fn try_acquire(&self, category: ActionCategory) -> RateLimitDecision {
        match self.limiters.get(&category) {
            Some((limiter, cooldown)) => limiter.try_acquire(*cooldown),
            None => RateLimitDecision {
                allowed: true,
                remaining: Duration::ZERO,
            },
        }
    }

    /// Check the category an outbound opcode belongs to, without starting
    /// its window. Pair with [`commit`](Self::commit) once the action went
    /// through.
    pub fn check(&self, op_code: OpCode) -> RateLimitDecision {
        let decision = match self.limiter_for(op_code) {
            Some((limiter, cooldown)) => limiter.check(*cooldown),
            None => RateLimitDecision {
                allowed: true,
                remaining: Duration::ZERO,
            },
        };
        if !decision.allowed {
            tracing::debug!(
                %op_code,
                remaining_ms = decision.remaining.as_millis() as u64,
                "Action throttled"
            );
        }
        decision
    }

    /// Start the cooldown for the opcode's category, if it has one.
    pub fn commit(&self, op_code: OpCode) {
        if let Some((limiter, _)) = self.limiter_for(op_code) {
            limiter.commit();
        }
    }

    fn limiter_for(&self, op_code: OpCode) -> Option<&(RateLimiter, Duration)> {
        ActionCategory::for_op_code(op_code).and_then(|category| self.limiters.get(&category))
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
