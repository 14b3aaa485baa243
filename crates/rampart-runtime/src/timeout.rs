//! Per-execution time limit.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use rampart_core::{ConfigError, ExecutionContext, Outcome, PolicyError, TimeoutConfig};

use crate::policy::Policy;

/// Fails a single execution that runs longer than its limit.
///
/// The timed-out future is dropped, so anything it was holding (including a
/// breaker probe slot) is released.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    limit: Duration,
}

impl TimeoutPolicy {
    pub fn new(limit: Duration) -> Result<Self, ConfigError> {
        Self::from_config(TimeoutConfig::new(limit))
    }

    pub fn from_config(config: TimeoutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            limit: config.duration,
        })
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl<E> Policy<E> for TimeoutPolicy
where
    E: std::error::Error + Send + Sync + 'static,
{
    async fn execute<T, F, Fut>(&self, _ctx: &ExecutionContext, operation: F) -> Outcome<T, E>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Outcome<T, E>> + Send,
    {
        match tokio::time::timeout(self.limit, operation()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(limit = ?self.limit, "Operation timed out");
                Err(PolicyError::TimedOut(self.limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_rejects_zero_limit() {
        assert!(matches!(
            TimeoutPolicy::new(Duration::ZERO),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
        let result: Outcome<(), io::Error> = policy
            .execute(&ExecutionContext::new(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PolicyError::TimedOut(limit)) if limit == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_passes_through() {
        let policy = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();
        let result: Outcome<u8, io::Error> = policy
            .execute(&ExecutionContext::new(), || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
    }
}
