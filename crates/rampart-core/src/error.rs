//! Error types shared by every policy.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::breaker::CircuitState;
use crate::outcome::{Classification, ClassifiedError};

/// Terminal failure of a call made through one or more policies.
///
/// The variants separate calls where the operation never ran
/// ([`PolicyError::CircuitOpen`], [`PolicyError::Cancelled`]) from calls where
/// it ran and failed ([`PolicyError::Operation`],
/// [`PolicyError::RetriesExhausted`], [`PolicyError::TimedOut`]).
#[derive(Debug, Clone)]
pub enum PolicyError<E> {
    /// The operation ran and failed
    Operation(ClassifiedError<E>),

    /// The retry budget was consumed without a success
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,

        /// Attempts in which the operation actually ran
        executions: u32,

        /// True when the final attempt was rejected by an open circuit
        circuit_open: bool,

        /// Most recent failure of an attempt that ran the operation, or the
        /// final attempt's failure when none ran
        last: Box<PolicyError<E>>,
    },

    /// A circuit breaker rejected the call without running the operation
    CircuitOpen,

    /// The execution context was cancelled before or between attempts
    Cancelled,

    /// A single execution exceeded its time limit
    TimedOut(Duration),
}

impl<E> PolicyError<E> {
    /// Wrap an operation error as transient.
    pub fn transient(error: E) -> Self {
        Self::Operation(ClassifiedError::transient(error))
    }

    /// Wrap an operation error as permanent.
    pub fn permanent(error: E) -> Self {
        Self::Operation(ClassifiedError::permanent(error))
    }

    /// Whether the wrapped operation was invoked at least once.
    pub fn operation_ran(&self) -> bool {
        match self {
            Self::Operation(_) | Self::TimedOut(_) => true,
            Self::RetriesExhausted { executions, .. } => *executions > 0,
            Self::CircuitOpen | Self::Cancelled => false,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Open circuits and timeouts are transient; cancellation never is.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Operation(err) => err.is_transient(),
            Self::RetriesExhausted { last, .. } => last.is_transient(),
            Self::CircuitOpen | Self::TimedOut(_) => true,
            Self::Cancelled => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classification of the underlying operation error, if there is one.
    pub fn classification(&self) -> Option<Classification> {
        match self {
            Self::Operation(err) => Some(err.classification),
            Self::RetriesExhausted { last, .. } => last.classification(),
            _ => None,
        }
    }

    /// The innermost failure, following retry exhaustion chains.
    pub fn last_error(&self) -> &Self {
        match self {
            Self::RetriesExhausted { last, .. } => last.last_error(),
            other => other,
        }
    }

    /// The underlying operation error, if the final failure carried one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err.error),
            Self::RetriesExhausted { last, .. } => last.into_operation_error(),
            _ => None,
        }
    }
}

impl<E> From<ClassifiedError<E>> for PolicyError<E> {
    fn from(err: ClassifiedError<E>) -> Self {
        Self::Operation(err)
    }
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(err) => write!(f, "{err}"),
            Self::RetriesExhausted {
                attempts,
                circuit_open: true,
                last,
                ..
            } => write!(
                f,
                "retries exhausted after {attempts} attempts, circuit open: {last}"
            ),
            Self::RetriesExhausted { attempts, last, .. } => {
                write!(f, "retries exhausted after {attempts} attempts: {last}")
            }
            Self::CircuitOpen => write!(f, "circuit breaker is open, operation not attempted"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::TimedOut(limit) => write!(f, "operation timed out after {limit:?}"),
        }
    }
}

impl<E> std::error::Error for PolicyError<E>
where
    E: std::error::Error + 'static,
{
    // Display already includes the wrapped failure, so the chain continues
    // below it.
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Operation(err) => err.error.source(),
            Self::RetriesExhausted { last, .. } => last.source(),
            _ => None,
        }
    }
}

/// Returned by a circuit breaker that refuses to admit a call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("circuit breaker rejected call while {state}")]
pub struct CircuitOpenError {
    /// State the breaker was in when it rejected the call
    pub state: CircuitState,
}

/// Errors raised while loading or validating policy configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read policy config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("max_attempts must be greater than zero")]
    ZeroMaxAttempts,

    #[error("failure_threshold must be greater than zero")]
    ZeroFailureThreshold,

    #[error("break_duration must be greater than zero")]
    ZeroBreakDuration,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max_delay {max:?} is shorter than base_delay {base:?}")]
    MaxDelayBelowBase { base: Duration, max: Duration },

    #[error("Policy listed twice in order: {0}")]
    DuplicatePolicy(String),

    #[error("Policy listed in order has no config section: {0}")]
    MissingSection(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    fn io_err(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, msg.to_string())
    }

    #[test]
    fn test_operation_ran_distinguishes_rejections() {
        assert!(PolicyError::transient(io_err("boom")).operation_ran());
        assert!(!PolicyError::<io::Error>::CircuitOpen.operation_ran());
        assert!(!PolicyError::<io::Error>::Cancelled.operation_ran());

        let exhausted_without_runs = PolicyError::<io::Error>::RetriesExhausted {
            attempts: 3,
            executions: 0,
            circuit_open: true,
            last: Box::new(PolicyError::CircuitOpen),
        };
        assert!(!exhausted_without_runs.operation_ran());
    }

    #[test]
    fn test_exhausted_chain() {
        let err = PolicyError::RetriesExhausted {
            attempts: 3,
            executions: 3,
            circuit_open: false,
            last: Box::new(PolicyError::transient(io_err("timeout"))),
        };

        assert_eq!(err.classification(), Some(Classification::Transient));
        assert!(matches!(err.last_error(), PolicyError::Operation(_)));
        assert_eq!(
            err.to_string(),
            "retries exhausted after 3 attempts: transient failure: timeout"
        );

        assert_eq!(
            err.into_operation_error().map(|e| e.to_string()),
            Some("timeout".to_string())
        );
    }

    #[test]
    fn test_exhausted_behind_open_circuit_keeps_operation_error() {
        let err = PolicyError::RetriesExhausted {
            attempts: 5,
            executions: 2,
            circuit_open: true,
            last: Box::new(PolicyError::permanent(io_err("unavailable"))),
        };

        assert_eq!(
            err.to_string(),
            "retries exhausted after 5 attempts, circuit open: permanent failure: unavailable"
        );
        assert_eq!(err.classification(), Some(Classification::Permanent));
        assert_eq!(
            err.into_operation_error().map(|e| e.to_string()),
            Some("unavailable".to_string())
        );
    }

    #[test]
    fn test_source_chain_does_not_repeat_messages() {
        #[derive(Debug, Error)]
        #[error("request failed")]
        struct RequestFailed(#[source] io::Error);

        let inner = RequestFailed(io_err("connection reset"));
        let err = PolicyError::RetriesExhausted {
            attempts: 2,
            executions: 2,
            circuit_open: false,
            last: Box::new(PolicyError::transient(inner)),
        };

        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        assert_eq!(
            chain,
            vec![
                "retries exhausted after 2 attempts: transient failure: request failed",
                "connection reset",
            ]
        );
    }

    #[test]
    fn test_transience() {
        assert!(PolicyError::transient(io_err("x")).is_transient());
        assert!(!PolicyError::permanent(io_err("x")).is_transient());
        assert!(PolicyError::<io::Error>::CircuitOpen.is_transient());
        assert!(PolicyError::<io::Error>::TimedOut(Duration::from_secs(1)).is_transient());
        assert!(!PolicyError::<io::Error>::Cancelled.is_transient());
    }

    #[test]
    fn test_circuit_open_error_display() {
        let err = CircuitOpenError {
            state: CircuitState::HalfOpen,
        };
        assert_eq!(err.to_string(), "circuit breaker rejected call while half_open");
    }
}
