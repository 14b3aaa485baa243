//! The policy abstraction and its composition primitive.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use rampart_core::{ExecutionContext, Outcome};

/// A resilience policy wrapping an operation.
///
/// The operation is a zero-argument async callable producing an
/// [`Outcome`]. A policy may call it any number of times (retry), not at all
/// (an open circuit), or exactly once with extra conditions (timeout).
///
/// Operations are `Fn` rather than `FnMut` so that a wrapping policy can
/// hand a shared reference of the operation to the policy it wraps.
#[async_trait]
pub trait Policy<E>: Send + Sync
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send;
}

/// Two policies chained into one: `outer.execute(|| inner.execute(op))`.
///
/// Ordering changes behavior. A retry wrapping a circuit breaker sends each
/// attempt through the breaker; a circuit breaker wrapping a retry sees only
/// the final result of the whole retry sequence.
#[derive(Debug, Clone)]
pub struct Wrap<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Wrap<O, I> {
    pub fn new(outer: O, inner: I) -> Self {
        Self { outer, inner }
    }

    pub fn outer(&self) -> &O {
        &self.outer
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn into_parts(self) -> (O, I) {
        (self.outer, self.inner)
    }
}

#[async_trait]
impl<E, O, I> Policy<E> for Wrap<O, I>
where
    E: std::error::Error + Send + Sync + 'static,
    O: Policy<E>,
    I: Policy<E>,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        let inner = &self.inner;
        let operation = &operation;
        self.outer
            .execute(ctx, move || inner.execute(ctx, operation))
            .await
    }
}

#[async_trait]
impl<E, P> Policy<E> for Arc<P>
where
    E: std::error::Error + Send + Sync + 'static,
    P: Policy<E>,
{
    async fn execute<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        (**self).execute(ctx, operation).await
    }
}

/// Composition helpers available on every policy.
pub trait PolicyExt: Sized {
    /// Wrap `inner` with `self` as the outer policy.
    fn wrap<I>(self, inner: I) -> Wrap<Self, I> {
        Wrap::new(self, inner)
    }
}

impl<P> PolicyExt for P {}
