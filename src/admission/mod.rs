//! Request admission control
//!
//! - RateLimiter: per-client dual sliding-window admission
//! - DeadlineGuard: cancellable deadlines around guarded work
//! - RequestContext: identity, arrival time and deadline of one call

mod context;
mod deadline;
mod rate_limit;

pub use context::{client_key, RequestContext};
pub use deadline::DeadlineGuard;
pub use rate_limit::{ClientWindowCounter, Quota, RateLimiter};
