//! Entry point for plain fallible operations.
//!
//! Policies speak [`Outcome`]. Application code usually returns
//! `Result<T, E>`. A [`Pipeline`] bridges the two: it classifies each raw
//! error with a [`Classifier`] and runs the classified operation through a
//! policy (often a [`Wrap`](crate::Wrap) or [`CompositePolicy`](crate::CompositePolicy)).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rampart_core::{
    transient_classifier, CancellationToken, Classification, ClassifiedError, Classifier,
    ExecutionContext, Outcome, PolicyError,
};

use crate::policy::Policy;

/// A policy paired with the classifier for its operation's errors.
pub struct Pipeline<P, E> {
    policy: P,
    classifier: Classifier<E>,
}

impl<P: Clone, E> Clone for Pipeline<P, E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<P: fmt::Debug, E> fmt::Debug for Pipeline<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<P, E> Pipeline<P, E>
where
    P: Policy<E>,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Create a pipeline that treats every error as transient.
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            classifier: transient_classifier(),
        }
    }

    /// Replace the classifier.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&E) -> Classification + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Run `operation` with a fresh [`ExecutionContext`].
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let ctx = ExecutionContext::new();
        self.execute_in(&ctx, operation).await
    }

    /// Run `operation` under a caller-owned context.
    ///
    /// An execution that would start after the context was cancelled returns
    /// [`PolicyError::Cancelled`] without calling `operation`.
    pub async fn execute_in<T, F, Fut>(&self, ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let classifier = self.classifier.as_ref();
        let operation = &operation;

        self.policy
            .execute(ctx, move || async move {
                if ctx.is_cancelled() {
                    return Err(PolicyError::Cancelled);
                }
                operation()
                    .await
                    .map_err(|error| PolicyError::Operation(ClassifiedError::classify(error, classifier)))
            })
            .await
    }

    /// Like [`Pipeline::execute_in`], handing the operation the context's
    /// cancellation token so it can abort in-flight work.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        operation: F,
    ) -> Outcome<T, E>
    where
        T: Send,
        F: Fn(CancellationToken) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let token = ctx.cancellation_token();
        self.execute_in(ctx, move || operation(token.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::sleeper::InstantSleeper;
    use rampart_core::RetryConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum ApiError {
        #[error("service unavailable")]
        Unavailable,
        #[error("bad request")]
        BadRequest,
    }

    fn classify(error: &ApiError) -> Classification {
        match error {
            ApiError::Unavailable => Classification::Transient,
            ApiError::BadRequest => Classification::Permanent,
        }
    }

    fn pipeline(max_attempts: u32) -> Pipeline<RetryPolicy<ApiError>, ApiError> {
        let retry = RetryPolicy::new(RetryConfig::new(max_attempts))
            .unwrap()
            .with_sleeper(InstantSleeper);
        Pipeline::new(retry).with_classifier(classify)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let result = pipeline(3)
            .execute(|| async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::Unavailable)
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_returned_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Outcome<(), ApiError> = pipeline(3)
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::BadRequest)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert_eq!(err.classification(), Some(Classification::Permanent));
        assert_eq!(err.into_operation_error(), Some(ApiError::BadRequest));
    }

    #[tokio::test]
    async fn test_default_classifier_retries_everything() {
        let retry = RetryPolicy::new(RetryConfig::new(2))
            .unwrap()
            .with_sleeper(InstantSleeper);
        let calls = &AtomicU32::new(0);
        let result: Outcome<(), ApiError> = Pipeline::new(retry)
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::BadRequest)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(PolicyError::RetriesExhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_operation() {
        let ctx = ExecutionContext::new();
        ctx.cancel();

        let calls = &AtomicU32::new(0);
        let result: Outcome<(), ApiError> = pipeline(3)
            .execute_in(&ctx, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PolicyError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_observes_cancellation_token() {
        let ctx = ExecutionContext::new();
        let pipeline = pipeline(1);
        let (result, _) = tokio::join!(
            pipeline.execute_cancellable(&ctx, |token| async move {
                tokio::select! {
                    _ = token.cancelled() => Err(ApiError::Unavailable),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(()),
                }
            }),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                ctx.cancel();
            }
        );

        // The operation bailed out on its own; the failure is still classified.
        assert!(matches!(result, Err(PolicyError::RetriesExhausted { executions: 1, .. })));
        assert!(ctx.is_cancelled());
    }
}
