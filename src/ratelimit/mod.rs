//! Client-side cooldown rate limiting.
//!
//! Sensitive actions (login attempts, relationship changes) are throttled
//! locally before they reach the wire. A rejection is a value carrying the
//! time left, not an error.
//!
//! | Category             | Opcodes                                          |
//! |----------------------|--------------------------------------------------|
//! | `PreAuthentication`  | create account, login, verification, auto-login  |
//! | `RelationshipUpdate` | `UpdateRelationship`                             |
//!
//! Time is read from `tokio::time::Instant`, so tests can drive cooldowns
//! with a paused clock.

mod limiter;
mod registry;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use registry::{ActionCategory, RateLimiterRegistry};
