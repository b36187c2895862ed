//! Failure handling as data.
//!
//! Three small pieces compose around any fallible operation:
//!
//! - [`RetryPolicy`]: pure backoff schedule. Attempt + failure kind in,
//!   "retry after D" or "give up" out.
//! - [`RecoveryPolicy`]: stateless mapping from failure kind to recovery
//!   action (retry, abort, escalate).
//! - [`TimeoutGuard`]: runs any operation under its own deadline and a
//!   cancellation token, turning expiry into a labeled timeout failure
//!   plus a recovery decision.
//!
//! Nothing here throws control flow through the stack; retry decisions
//! are values the caller consumes.

mod recovery;
mod retry;
mod timeout;

pub use recovery::{RecoveryAction, RecoveryPolicy};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use timeout::{GuardOutcome, TimeoutGuard};
