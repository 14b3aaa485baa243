//! Policy configuration.
//!
//! Configuration covers the serializable part of each policy: counts,
//! durations and composition order. Predicates and callbacks are attached in
//! code.
//!
//! ```yaml
//! order: [retry, circuit_breaker, timeout]
//! retry:
//!   max_attempts: 4
//!   backoff:
//!     kind: exponential_jitter
//!     base_delay: 200ms
//!     max_delay: 5s
//! circuit_breaker:
//!   failure_threshold: 5
//!   break_duration: 30s
//! timeout:
//!   duration: 2s
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    pub max_attempts: u32,

    /// Delay between attempts
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        self.backoff.validate()
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe
    #[serde(with = "duration_str")]
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            failure_threshold,
            break_duration,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::ZeroBreakDuration);
        }
        Ok(())
    }
}

/// Per-execution time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(with = "duration_str")]
    pub duration: Duration,
}

impl TimeoutConfig {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Names a policy section in [`PolicyConfig::order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Retry,
    CircuitBreaker,
    Timeout,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::CircuitBreaker => write!(f, "circuit_breaker"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A full policy pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Composition order, outermost first.
    ///
    /// Empty means every configured section in the order
    /// retry, circuit_breaker, timeout.
    #[serde(default)]
    pub order: Vec<PolicyKind>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub timeout: Option<TimeoutConfig>,
}

impl PolicyConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`, `.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// The composition order with the default applied.
    pub fn resolved_order(&self) -> Vec<PolicyKind> {
        if !self.order.is_empty() {
            return self.order.clone();
        }

        let mut order = Vec::new();
        if self.retry.is_some() {
            order.push(PolicyKind::Retry);
        }
        if self.circuit_breaker.is_some() {
            order.push(PolicyKind::CircuitBreaker);
        }
        if self.timeout.is_some() {
            order.push(PolicyKind::Timeout);
        }
        order
    }

    fn has_section(&self, kind: PolicyKind) -> bool {
        match kind {
            PolicyKind::Retry => self.retry.is_some(),
            PolicyKind::CircuitBreaker => self.circuit_breaker.is_some(),
            PolicyKind::Timeout => self.timeout.is_some(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate()?;
        }

        for (index, kind) in self.order.iter().enumerate() {
            if self.order[..index].contains(kind) {
                return Err(ConfigError::DuplicatePolicy(kind.to_string()));
            }
            if !self.has_section(*kind) {
                return Err(ConfigError::MissingSection(kind.to_string()));
            }
        }

        Ok(())
    }
}

/// Serde support for Duration as a human-readable string ("250ms", "30s")
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Serde support for Option<Duration> as a human-readable string
pub(crate) mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::duration_str::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffKind;

    const FULL: &str = r#"
order: [retry, circuit_breaker, timeout]
retry:
  max_attempts: 4
  backoff:
    kind: exponential_jitter
    base_delay: 200ms
    max_delay: 5s
circuit_breaker:
  failure_threshold: 5
  break_duration: 30s
timeout:
  duration: 2s
"#;

    #[test]
    fn test_parse_full_yaml() {
        let config = PolicyConfig::from_yaml(FULL).unwrap();

        let retry = config.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.backoff.kind, BackoffKind::ExponentialJitter);
        assert_eq!(retry.backoff.base_delay, Duration::from_millis(200));

        let breaker = config.circuit_breaker.as_ref().unwrap();
        assert_eq!(breaker.break_duration, Duration::from_secs(30));

        assert_eq!(
            config.timeout,
            Some(TimeoutConfig::new(Duration::from_secs(2)))
        );
        assert_eq!(
            config.resolved_order(),
            vec![PolicyKind::Retry, PolicyKind::CircuitBreaker, PolicyKind::Timeout]
        );
    }

    #[test]
    fn test_default_order_follows_sections() {
        let config = PolicyConfig::from_yaml(
            "circuit_breaker:\n  failure_threshold: 2\n  break_duration: 1s\nretry:\n  max_attempts: 2\n",
        )
        .unwrap();
        assert_eq!(
            config.resolved_order(),
            vec![PolicyKind::Retry, PolicyKind::CircuitBreaker]
        );
        assert_eq!(config.retry.unwrap().backoff, Backoff::default());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let result = PolicyConfig::from_yaml("retry:\n  max_attempts: 0\n");
        assert!(matches!(result, Err(ConfigError::ZeroMaxAttempts)));
    }

    #[test]
    fn test_rejects_zero_break_duration() {
        let result = PolicyConfig::from_yaml(
            "circuit_breaker:\n  failure_threshold: 1\n  break_duration: 0s\n",
        );
        assert!(matches!(result, Err(ConfigError::ZeroBreakDuration)));
    }

    #[test]
    fn test_rejects_duplicate_and_missing_order_entries() {
        let duplicate = PolicyConfig::from_yaml(
            "order: [retry, retry]\nretry:\n  max_attempts: 2\n",
        );
        assert!(matches!(duplicate, Err(ConfigError::DuplicatePolicy(name)) if name == "retry"));

        let missing = PolicyConfig::from_yaml("order: [timeout]\nretry:\n  max_attempts: 2\n");
        assert!(matches!(missing, Err(ConfigError::MissingSection(name)) if name == "timeout"));
    }

    #[test]
    fn test_rejects_unknown_policy_name() {
        let result = PolicyConfig::from_yaml("order: [bulkhead]\n");
        assert!(matches!(result, Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_json_roundtrip_uses_human_durations() {
        let config = PolicyConfig::from_yaml(FULL).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"30s\""));

        let parsed = PolicyConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let path = std::env::temp_dir().join(format!("rampart-config-{}.toml", std::process::id()));
        fs::write(&path, "retry = 1").unwrap();
        let result = PolicyConfig::from_file(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "toml"));
    }
}
