//! Bounded retry with backoff.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rampart_core::{
    invoke_callback, ConfigError, ExecutionContext, Outcome, PolicyError, RetryConfig,
};

use crate::policy::Policy;
use crate::sleeper::{Sleeper, TokioSleeper};

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;

/// Observes each retry: the attempt that just failed and its error.
pub type OnRetry<E> = Arc<dyn Fn(u32, &PolicyError<E>) + Send + Sync>;

/// Repeats an operation until it succeeds, fails permanently, or the attempt
/// budget runs out.
///
/// The policy holds only read-only configuration, so one instance can be
/// shared by any number of concurrent callers. Per-call state lives in the
/// [`ExecutionContext`].
///
/// By default transient failures are retried and permanent ones are returned
/// after the first attempt. An open circuit reported by a wrapped breaker
/// uses up an attempt without waiting out the backoff, because no call
/// reached the dependency.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    predicate: RetryPredicate<E>,
    on_retry: Option<OnRetry<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            predicate: self.predicate.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Create a retry policy. Rejects `max_attempts == 0`.
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            predicate: Arc::new(PolicyError::is_transient),
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Replace the default "retry transient failures" predicate.
    ///
    /// Cancellation is never retried regardless of the predicate.
    pub fn with_retry_predicate(
        mut self,
        predicate: impl Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Register a callback invoked before each backoff wait.
    pub fn on_retry(mut self, callback: impl Fn(u32, &PolicyError<E>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

#[async_trait]
impl<E> Policy<E> for RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 1;
        let mut executions = 0;
        // Most recent failure in which the operation ran. Rejections by an
        // open circuit must not hide it.
        let mut last_ran: Option<PolicyError<E>> = None;

        loop {
            if ctx.is_cancelled() {
                return Err(PolicyError::Cancelled);
            }
            ctx.begin_attempt(attempt);

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.operation_ran() {
                executions += 1;
            }

            if error.is_cancelled() || !(self.predicate)(&error) {
                tracing::debug!(attempt, error = %error, "Failure is not retryable");
                return Err(error);
            }

            if attempt >= max_attempts {
                let circuit_open = error.is_circuit_open();
                let last = match last_ran {
                    Some(ran) if !error.operation_ran() => ran,
                    _ => error,
                };
                tracing::warn!(
                    attempts = attempt,
                    executions,
                    circuit_open,
                    error = %last,
                    "Retries exhausted"
                );
                return Err(PolicyError::RetriesExhausted {
                    attempts: attempt,
                    executions,
                    circuit_open,
                    last: Box::new(last),
                });
            }

            if let Some(on_retry) = &self.on_retry {
                invoke_callback("on_retry", || on_retry(attempt, &error));
            }

            if error.is_circuit_open() {
                tracing::debug!(attempt, "Circuit open, retrying without backoff");
            } else {
                let delay = self.config.backoff.delay_for(attempt);
                tracing::debug!(attempt, delay = ?delay, error = %error, "Retrying after backoff");

                tokio::select! {
                    biased;
                    _ = ctx.cancellation_token().cancelled() => {
                        tracing::debug!(attempt, "Cancelled during backoff");
                        return Err(PolicyError::Cancelled);
                    }
                    _ = self.sleeper.sleep(delay) => {}
                }
            }

            if error.operation_ran() {
                last_ran = Some(error);
            }
            attempt += 1;
        }
    }
}
