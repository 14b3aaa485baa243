//! Observability callbacks.
//!
//! Callbacks are fire-and-forget. A panicking callback is logged and
//! swallowed; it never turns into a policy failure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Details passed to `on_break` when a circuit opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakInfo {
    /// Consecutive failures that tripped the breaker (1 when a probe failed)
    pub consecutive_failures: u32,

    /// How long the circuit will stay open
    pub break_duration: Duration,

    /// True when a half-open probe failed and the circuit reopened
    pub reopened: bool,

    /// True when the circuit was forced open and stays open until reset
    pub isolated: bool,
}

pub type OnBreak = Arc<dyn Fn(&BreakInfo) + Send + Sync>;
pub type OnTransition = Arc<dyn Fn() + Send + Sync>;

/// Run a callback, logging and discarding any panic.
pub fn invoke_callback(name: &'static str, callback: impl FnOnce()) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::warn!(callback = name, panic = %message, "Observability callback panicked");
    }
}
