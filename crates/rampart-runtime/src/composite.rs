//! Ordered policy lists built at runtime, typically from a [`PolicyConfig`].
//!
//! [`Wrap`](crate::Wrap) composes policies whose types are known at compile
//! time. `CompositePolicy` does the same for an ordered list chosen at
//! runtime: `[a, b, c]` behaves like `a.wrap(b.wrap(c))`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use rampart_core::{
    CircuitBreaker, ConfigError, ExecutionContext, Outcome, PolicyConfig, PolicyKind,
};

use crate::breaker::CircuitBreakerPolicy;
use crate::policy::Policy;
use crate::retry::RetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::timeout::TimeoutPolicy;

/// One entry of a [`CompositePolicy`].
#[derive(Debug, Clone)]
pub enum ConfiguredPolicy<E> {
    Retry(RetryPolicy<E>),
    CircuitBreaker(CircuitBreakerPolicy<E>),
    Timeout(TimeoutPolicy),
}

impl<E> From<RetryPolicy<E>> for ConfiguredPolicy<E> {
    fn from(policy: RetryPolicy<E>) -> Self {
        Self::Retry(policy)
    }
}

impl<E> From<CircuitBreakerPolicy<E>> for ConfiguredPolicy<E> {
    fn from(policy: CircuitBreakerPolicy<E>) -> Self {
        Self::CircuitBreaker(policy)
    }
}

impl<E> From<TimeoutPolicy> for ConfiguredPolicy<E> {
    fn from(policy: TimeoutPolicy) -> Self {
        Self::Timeout(policy)
    }
}

impl<E> ConfiguredPolicy<E> {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Retry(_) => PolicyKind::Retry,
            Self::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            Self::Timeout(_) => PolicyKind::Timeout,
        }
    }
}

#[async_trait]
impl<E> Policy<E> for ConfiguredPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        match self {
            Self::Retry(policy) => policy.execute(ctx, operation).await,
            Self::CircuitBreaker(policy) => policy.execute(ctx, operation).await,
            Self::Timeout(policy) => policy.execute(ctx, operation).await,
        }
    }
}

/// An ordered list of policies, outermost first.
///
/// Owns no state beyond what each policy owns. An empty list runs the
/// operation once, unprotected.
#[derive(Debug, Clone)]
pub struct CompositePolicy<E> {
    policies: Vec<ConfiguredPolicy<E>>,
}

impl<E> Default for CompositePolicy<E> {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
        }
    }
}

impl<E> CompositePolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy inside all policies added so far.
    pub fn push(mut self, policy: impl Into<ConfiguredPolicy<E>>) -> Self {
        self.policies.push(policy.into());
        self
    }

    /// Build the policies a config describes, in its resolved order.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_sleeper(config, TokioSleeper)
    }

    /// Like [`CompositePolicy::from_config`] with a custom sleeper for retries.
    pub fn from_config_with_sleeper(
        config: &PolicyConfig,
        sleeper: impl Sleeper + Clone + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut composite = Self::new();
        for kind in config.resolved_order() {
            composite = match kind {
                PolicyKind::Retry => {
                    let retry_config = config
                        .retry
                        .clone()
                        .ok_or_else(|| ConfigError::MissingSection(kind.to_string()))?;
                    composite.push(RetryPolicy::new(retry_config)?.with_sleeper(sleeper.clone()))
                }
                PolicyKind::CircuitBreaker => {
                    let breaker_config = config
                        .circuit_breaker
                        .clone()
                        .ok_or_else(|| ConfigError::MissingSection(kind.to_string()))?;
                    composite.push(CircuitBreakerPolicy::from_config(breaker_config)?)
                }
                PolicyKind::Timeout => {
                    let timeout_config = config
                        .timeout
                        .clone()
                        .ok_or_else(|| ConfigError::MissingSection(kind.to_string()))?;
                    composite.push(TimeoutPolicy::from_config(timeout_config)?)
                }
            };
        }
        Ok(composite)
    }

    pub fn policies(&self) -> &[ConfiguredPolicy<E>] {
        &self.policies
    }

    /// The first circuit breaker in the list, if any.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.policies.iter().find_map(|policy| match policy {
            ConfiguredPolicy::CircuitBreaker(policy) => Some(policy.breaker()),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Run `operation` through `policies[0]`, which wraps `policies[1..]`.
fn run_chain<'a, E, T, F, Fut>(
    policies: &'a [ConfiguredPolicy<E>],
    ctx: &'a ExecutionContext,
    operation: &'a F,
) -> BoxFuture<'a, Outcome<T, E>>
where
    E: std::error::Error + Send + Sync + 'static,
    T: Send + 'a,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Outcome<T, E>> + Send + 'a,
{
    match policies.split_first() {
        None => Box::pin(operation()),
        Some((outer, rest)) => outer.execute(ctx, move || run_chain(rest, ctx, operation)),
    }
}

#[async_trait]
impl<E> Policy<E> for CompositePolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        run_chain(&self.policies, ctx, &operation).await
    }
}
