//! # rampart-runtime
//!
//! Async resilience policies built on `rampart-core`.
//!
//! This crate executes operations under:
//! - [`RetryPolicy`]: bounded retries with a [`Backoff`] between attempts
//! - [`CircuitBreakerPolicy`]: fail fast while a dependency is unhealthy
//! - [`TimeoutPolicy`]: a per-execution time limit
//!
//! Policies compose with [`PolicyExt::wrap`] or, when the order comes from
//! configuration, a [`CompositePolicy`]. Order matters: the outer policy
//! decides what the inner one is asked to do.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_runtime::{
//!     Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, Classification, Pipeline,
//!     PolicyExt, RetryConfig, RetryPolicy,
//! };
//! use std::time::Duration;
//!
//! let retry = RetryPolicy::new(
//!     RetryConfig::new(3).with_backoff(Backoff::exponential(Duration::from_millis(100))),
//! )?;
//! let breaker = CircuitBreakerPolicy::from_config(CircuitBreakerConfig::default())?;
//!
//! // Each retry attempt goes through the breaker.
//! let pipeline = Pipeline::new(retry.wrap(breaker)).with_classifier(|err: &ApiError| {
//!     if err.is_client_error() {
//!         Classification::Permanent
//!     } else {
//!         Classification::Transient
//!     }
//! });
//!
//! let body = pipeline.execute(|| client.fetch("/orders")).await?;
//! ```

pub mod breaker;
pub mod composite;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod sleeper;
pub mod timeout;

pub use breaker::{counts_as_failure, CircuitBreakerPolicy, FailurePredicate};
pub use composite::{CompositePolicy, ConfiguredPolicy};
pub use pipeline::Pipeline;
pub use policy::{Policy, PolicyExt, Wrap};
pub use retry::{OnRetry, RetryPolicy, RetryPredicate};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::TimeoutPolicy;

// Core types, so most users only need this crate
pub use rampart_core::{
    Backoff, BackoffKind, BreakInfo, CancellationToken, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerStats, CircuitState, Classification, ClassifiedError, Classifier, Clock,
    ConfigError, ExecutionContext, ManualClock, Outcome, PolicyConfig, PolicyError, PolicyKind,
    RetryConfig, SystemClock, TimeoutConfig,
};
