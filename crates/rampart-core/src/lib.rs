//! # rampart-core
//!
//! Runtime-agnostic building blocks for protecting calls to unreliable
//! operations.
//!
//! This crate holds the data model and the state that policies share:
//! - Failure classification ([`Classification`], [`ClassifiedError`])
//! - The terminal error taxonomy ([`PolicyError`])
//! - Backoff strategies ([`Backoff`])
//! - The circuit-breaker state machine ([`CircuitBreaker`])
//! - Per-call metadata ([`ExecutionContext`]) and an injectable [`Clock`]
//! - Serializable configuration ([`PolicyConfig`])
//!
//! The async policies that execute operations live in `rampart-runtime`.
//!
//! ## Key Guarantees
//!
//! 1. **No background work**: breaker transitions happen lazily at call time
//! 2. **One lock per breaker**: state, counter and timestamp change together
//! 3. **Typed failures**: callers can tell "never ran" from "ran and failed"
//! 4. **Silent hooks**: observability callbacks never fail a call

pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod outcome;

// Re-export main types at crate root
pub use backoff::{Backoff, BackoffKind};
pub use breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerStats, CircuitState, Permit,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CircuitBreakerConfig, PolicyConfig, PolicyKind, RetryConfig, TimeoutConfig};
pub use context::ExecutionContext;
pub use error::{CircuitOpenError, ConfigError, PolicyError};
pub use hooks::{invoke_callback, BreakInfo};
pub use outcome::{transient_classifier, Classification, ClassifiedError, Classifier, Outcome};
pub use tokio_util::sync::CancellationToken;
