//! Backoff strategies for spacing out retry attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{duration_str, option_duration_str};
use crate::error::ConfigError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay every time: `base`
    Fixed,

    /// Grows with the attempt number: `base * attempt`
    Linear,

    /// Doubles each attempt: `base * 2^(attempt - 1)`
    Exponential,

    /// Exponential ceiling with full jitter: uniform in `[0, base * 2^(attempt - 1)]`
    ExponentialJitter,
}

impl std::fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
            Self::ExponentialJitter => write!(f, "exponential_jitter"),
        }
    }
}

/// A backoff strategy.
///
/// `delay_for` is a pure function of the attempt number (apart from the
/// random draw for jitter) and is safe to call from any number of callers.
///
/// # Example
///
/// ```
/// use rampart_core::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::exponential(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(30));
///
/// assert_eq!(backoff.delay_for(1), Duration::from_secs(1));
/// assert_eq!(backoff.delay_for(2), Duration::from_secs(2));
/// assert_eq!(backoff.delay_for(3), Duration::from_secs(4));
/// assert_eq!(backoff.delay_for(10), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Growth curve
    pub kind: BackoffKind,

    /// Delay after the first failed attempt
    #[serde(with = "duration_str")]
    pub base_delay: Duration,

    /// Upper bound applied to every computed delay
    #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100)).with_max_delay(Duration::from_secs(10))
    }
}

impl Backoff {
    fn new(kind: BackoffKind, base_delay: Duration) -> Self {
        Self {
            kind,
            base_delay,
            max_delay: None,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffKind::Fixed, delay)
    }

    pub fn linear(base: Duration) -> Self {
        Self::new(BackoffKind::Linear, base)
    }

    pub fn exponential(base: Duration) -> Self {
        Self::new(BackoffKind::Exponential, base)
    }

    pub fn exponential_jitter(base: Duration) -> Self {
        Self::new(BackoffKind::ExponentialJitter, base)
    }

    /// Cap every delay at `max`.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Delay to wait after the given 1-based attempt failed.
    ///
    /// Attempt `0` is treated as attempt `1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        match self.kind {
            BackoffKind::ExponentialJitter => full_jitter(ceiling),
            _ => ceiling,
        }
    }

    /// The deterministic upper bound of `delay_for`, after capping.
    ///
    /// For every kind except `ExponentialJitter` this equals `delay_for`.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Linear => self
                .base_delay
                .checked_mul(attempt)
                .unwrap_or(Duration::MAX),
            BackoffKind::Exponential | BackoffKind::ExponentialJitter => 1u32
                .checked_shl(attempt - 1)
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX),
        };

        match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        }
    }

    /// Delays for attempts `1..=attempts`.
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (1..=attempts).map(|attempt| self.delay_for(attempt)).collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max) = self.max_delay {
            if max < self.base_delay {
                return Err(ConfigError::MaxDelayBelowBase {
                    base: self.base_delay,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// Uniform draw in `[0, ceiling]`.
fn full_jitter(ceiling: Duration) -> Duration {
    let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
}
