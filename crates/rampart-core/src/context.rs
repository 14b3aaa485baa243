//! Per-call execution context.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Metadata threaded through every policy for one top-level call.
///
/// A context is created when a call starts and dropped when it finishes.
/// It is never shared between calls; the attempt counter is atomic only so
/// that futures borrowing the context stay `Send`.
#[derive(Debug)]
pub struct ExecutionContext {
    attempt: AtomicU32,
    started_at: DateTime<Utc>,
    started: Instant,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Create a context with its own cancellation token.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a context that is cancelled when `token` is.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            attempt: AtomicU32::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
            cancellation: token,
        }
    }

    /// Create a context for a nested call, cancelled along with this one.
    pub fn child(&self) -> Self {
        Self::with_cancellation(self.cancellation.child_token())
    }

    /// The current 1-based attempt number, or 0 before the first attempt.
    ///
    /// Every retry layer sharing this context writes to the same counter, so
    /// with nested retries this is the innermost layer's attempt. Give an
    /// inner layer a [`child`](Self::child) context to keep the outer
    /// layer's count intact.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    /// Record that the given attempt is starting.
    pub fn begin_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
    }

    /// Wall-clock time at which the call started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this call. Further retries and waits stop.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_no_attempts() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.attempt(), 0);
        assert!(!ctx.is_cancelled());
        assert!(ctx.started_at() <= Utc::now());
    }

    #[test]
    fn test_begin_attempt() {
        let ctx = ExecutionContext::new();
        ctx.begin_attempt(1);
        ctx.begin_attempt(2);
        assert_eq!(ctx.attempt(), 2);
    }

    #[test]
    fn test_external_token_cancels_context() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::with_cancellation(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = ExecutionContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_cancel_parent() {
        let parent = ExecutionContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }
}
