//! Circuit breaker as an executable policy.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rampart_core::{
    CircuitBreaker, CircuitBreakerConfig, ConfigError, ExecutionContext, Outcome, PolicyError,
};

use crate::policy::Policy;

/// Decides whether a failed call counts against the breaker.
pub type FailurePredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;

/// Counts every failure where the protected operation actually ran:
/// operation errors of either classification, exhausted retries and timeouts.
pub fn counts_as_failure<E>(error: &PolicyError<E>) -> bool {
    matches!(
        error,
        PolicyError::Operation(_) | PolicyError::RetriesExhausted { .. } | PolicyError::TimedOut(_)
    ) && error.operation_ran()
}

/// Runs an operation behind a [`CircuitBreaker`].
///
/// The breaker only observes outcomes. It does not know whether its caller
/// will retry, so permanent failures count the same as transient ones unless
/// a different predicate is installed.
pub struct CircuitBreakerPolicy<E> {
    breaker: CircuitBreaker,
    predicate: FailurePredicate<E>,
}

impl<E> Clone for CircuitBreakerPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<E> fmt::Debug for CircuitBreakerPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl<E> CircuitBreakerPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Guard calls with an existing breaker. Clones of the breaker share state.
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            breaker,
            predicate: Arc::new(counts_as_failure),
        }
    }

    /// Build a breaker on the system clock from config.
    pub fn from_config(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(CircuitBreaker::new(config)?))
    }

    /// Replace the failure predicate.
    pub fn with_failure_predicate(
        mut self,
        predicate: impl Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Count only transient failures, letting permanent ones through uncounted.
    pub fn count_transient_only(self) -> Self {
        self.with_failure_predicate(|error| counts_as_failure(error) && error.is_transient())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<E> Policy<E> for CircuitBreakerPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, _ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                tracing::debug!(state = %rejected.state, "Circuit breaker rejected call");
                return Err(PolicyError::CircuitOpen);
            }
        };

        let result = operation().await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(error) if (self.predicate)(error) => permit.record_failure(),
            Err(_) => permit.release(),
        }
        result
    }
}
