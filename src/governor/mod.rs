//! Request governor: admission control plus retry for costly upstream calls.

mod clock;
mod retry;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::{RetryExecutor, RetryPolicy, Sleeper, TokioSleeper};
pub use window::{RateLimitStatus, SlidingWindowLimiter};

/// Whether an upstream call may safely run more than once.
///
/// Each call site declares this explicitly; only idempotent calls go through
/// the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSafety {
    /// Repeating the call has the same effect as making it once
    Idempotent,
    /// Every call has a side effect of its own, such as a billed prediction
    NonIdempotent,
}

impl CallSafety {
    /// The policy a call with this safety runs under.
    pub fn policy(&self, executor: &RetryExecutor) -> RetryPolicy {
        match self {
            CallSafety::Idempotent => *executor.policy(),
            CallSafety::NonIdempotent => RetryPolicy::single_attempt(),
        }
    }
}
