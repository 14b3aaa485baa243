//! Circuit breaker to prevent cascade failures.
//!
//! When calls fail repeatedly the circuit opens and subsequent calls are
//! rejected immediately. After the break duration the next incoming call is
//! admitted as a single probe; its outcome decides whether the circuit closes
//! or opens again.
//!
//! There is no background timer. The Open → Half-Open transition is computed
//! lazily against an injectable [`Clock`] whenever a call arrives.
//!
//! ```text
//! ┌────────┐  failures ≥ threshold  ┌──────┐  break elapsed  ┌──────────┐
//! │ Closed │ ─────────────────────► │ Open │ ──────────────► │ HalfOpen │
//! └────────┘                        └──────┘                 └──────────┘
//!      ▲                                ▲     probe failed        │
//!      │                                └─────────────────────────┤
//!      │                 probe succeeded                          │
//!      └──────────────────────────────────────────────────────────┘
//! ```

mod state;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::CircuitBreakerConfig;
use crate::error::{CircuitOpenError, ConfigError};
use crate::hooks::{invoke_callback, BreakInfo, OnBreak, OnTransition};
use state::{Admission, BreakerState, Transition};

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected without running the operation
    Open,

    /// One probe call is testing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    /// Calls rejected since the breaker was created
    pub rejected_calls: u64,
    /// Times the circuit has opened (including reopenings)
    pub times_opened: u64,
    /// True while forced open by `isolate`
    pub isolated: bool,
}

#[derive(Default)]
struct Hooks {
    on_break: Option<OnBreak>,
    on_reset: Option<OnTransition>,
    on_half_open: Option<OnTransition>,
}

struct Inner {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    hooks: Hooks,
}

/// A circuit breaker shared by every caller of one dependency.
///
/// Cloning is cheap and clones share state. The state, failure counter and
/// `opened_at` timestamp live in one struct behind one lock, so every caller
/// observes transitions in the same order.
///
/// # Example
///
/// ```
/// use rampart_core::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(2, Duration::from_secs(30)))?;
///
/// for _ in 0..2 {
///     let permit = breaker.try_acquire()?;
///     permit.record_failure();
/// }
///
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.try_acquire().is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker on the system clock with no callbacks.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        CircuitBreakerBuilder::new(config).build()
    }

    pub fn builder(config: CircuitBreakerConfig) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(config)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Ask to run one call.
    ///
    /// Closed admits every call. Open rejects until the break duration has
    /// elapsed, then exactly one caller becomes the Half-Open probe; everyone
    /// else is rejected until the probe reports back.
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpenError> {
        let now = self.inner.clock.now();
        let (admission, transition) = {
            let mut state = self.inner.state.lock();
            state.admit(now, self.inner.config.break_duration)
        };
        self.notify(transition);

        match admission {
            Admission::Admitted { generation, probe } => Ok(Permit {
                breaker: self.clone(),
                generation,
                probe,
                settled: false,
            }),
            Admission::Rejected(state) => Err(CircuitOpenError { state }),
        }
    }

    /// Current state, without evaluating a pending Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.inner.state.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.state.lock().consecutive_failures
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.inner.state.lock();
        CircuitBreakerStats {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at,
            rejected_calls: state.rejected_calls,
            times_opened: state.times_opened,
            isolated: state.isolated,
        }
    }

    /// Force the circuit closed and clear its counters.
    pub fn reset(&self) {
        let transition = self.inner.state.lock().reset();
        self.notify(transition);
    }

    /// Force the circuit open until [`CircuitBreaker::reset`] is called.
    pub fn isolate(&self) {
        let now = self.inner.clock.now();
        let transition = self.inner.state.lock().isolate(now);
        self.notify(transition);
    }

    fn settle(&self, generation: u64, probe: bool, success: bool) {
        let now = self.inner.clock.now();
        let transition = {
            let mut state = self.inner.state.lock();
            if success {
                state.record_success(generation, probe)
            } else {
                state.record_failure(generation, probe, now, self.inner.config.failure_threshold)
            }
        };
        self.notify(transition);
    }

    fn release(&self, generation: u64) {
        self.inner.state.lock().release_probe(generation);
    }

    /// Log and fire callbacks for a transition. Runs with the lock released.
    fn notify(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        let hooks = &self.inner.hooks;
        let break_duration = self.inner.config.break_duration;

        match transition {
            Transition::Opened { failures } => {
                tracing::warn!(
                    failures,
                    break_duration = ?break_duration,
                    "Circuit opened after repeated failures"
                );
                if let Some(on_break) = &hooks.on_break {
                    let info = BreakInfo {
                        consecutive_failures: failures,
                        break_duration,
                        reopened: false,
                        isolated: false,
                    };
                    invoke_callback("on_break", || on_break(&info));
                }
            }
            Transition::Reopened => {
                tracing::warn!(break_duration = ?break_duration, "Circuit reopened after failed recovery probe");
                if let Some(on_break) = &hooks.on_break {
                    let info = BreakInfo {
                        consecutive_failures: 1,
                        break_duration,
                        reopened: true,
                        isolated: false,
                    };
                    invoke_callback("on_break", || on_break(&info));
                }
            }
            Transition::HalfOpened => {
                tracing::info!("Circuit transitioning to half-open for recovery probe");
                if let Some(on_half_open) = &hooks.on_half_open {
                    invoke_callback("on_half_open", || on_half_open());
                }
            }
            Transition::Isolated { failures } => {
                tracing::warn!(failures, "Circuit isolated manually");
                if let Some(on_break) = &hooks.on_break {
                    let info = BreakInfo {
                        consecutive_failures: failures,
                        break_duration,
                        reopened: false,
                        isolated: true,
                    };
                    invoke_callback("on_break", || on_break(&info));
                }
            }
            Transition::Closed => {
                tracing::info!("Circuit closed");
                if let Some(on_reset) = &hooks.on_reset {
                    invoke_callback("on_reset", || on_reset());
                }
            }
        }
    }
}

/// Permission to run one call, returned by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with `record_success`, `record_failure` or `release`.
/// Dropping an unsettled probe permit frees the probe slot so the breaker
/// cannot get stuck in Half-Open.
#[must_use = "a permit must report the call's outcome"]
pub struct Permit {
    breaker: CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl Permit {
    /// Whether this call is the Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, true);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, false);
    }

    /// Report an outcome the breaker should not count either way.
    pub fn release(mut self) {
        self.settled = true;
        if self.probe {
            self.breaker.release(self.generation);
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            tracing::debug!("Probe abandoned before reporting an outcome");
            self.breaker.release(self.generation);
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("generation", &self.generation)
            .field("probe", &self.probe)
            .finish()
    }
}

/// Builder for [`CircuitBreaker`].
pub struct CircuitBreakerBuilder {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    hooks: Hooks,
}

impl CircuitBreakerBuilder {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            hooks: Hooks::default(),
        }
    }

    /// Use a custom time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Called whenever the circuit opens or reopens.
    pub fn on_break(mut self, callback: impl Fn(&BreakInfo) + Send + Sync + 'static) -> Self {
        self.hooks.on_break = Some(Arc::new(callback));
        self
    }

    /// Called whenever the circuit closes.
    pub fn on_reset(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_reset = Some(Arc::new(callback));
        self
    }

    /// Called when the circuit moves to Half-Open.
    pub fn on_half_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_half_open = Some(Arc::new(callback));
        self
    }

    /// Validate the config and build the breaker.
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;
        Ok(CircuitBreaker {
            inner: Arc::new(Inner {
                config: self.config,
                clock: self.clock,
                state: Mutex::new(BreakerState::new()),
                hooks: self.hooks,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const BREAK: Duration = Duration::from_secs(30);

    fn breaker_with_clock(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::builder(CircuitBreakerConfig::new(threshold, BREAK))
            .clock(clock.clone())
            .build()
            .unwrap();
        (breaker, clock)
    }

    fn fail(breaker: &CircuitBreaker) {
        breaker.try_acquire().unwrap().record_failure();
    }

    #[test]
    fn test_circuit_starts_closed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default()).unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let zero_threshold = CircuitBreaker::new(CircuitBreakerConfig::new(0, BREAK));
        assert!(matches!(zero_threshold, Err(ConfigError::ZeroFailureThreshold)));

        let zero_break = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::ZERO));
        assert!(matches!(zero_break, Err(ConfigError::ZeroBreakDuration)));
    }

    #[test]
    fn test_opens_after_threshold_and_rejects() {
        let (breaker, clock) = breaker_with_clock(3);

        for _ in 0..3 {
            fail(&breaker);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(BREAK - Duration::from_millis(1));
        let rejected = breaker.try_acquire().unwrap_err();
        assert_eq!(rejected.state, CircuitState::Open);
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let (breaker, _clock) = breaker_with_clock(3);

        fail(&breaker);
        fail(&breaker);
        breaker.try_acquire().unwrap().record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_success_closes() {
        let (breaker, clock) = breaker_with_clock(1);
        fail(&breaker);

        clock.advance(BREAK);
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        probe.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_timestamp() {
        let (breaker, clock) = breaker_with_clock(1);
        fail(&breaker);
        let first_opened = breaker.stats().opened_at;

        clock.advance(BREAK);
        breaker.try_acquire().unwrap().record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.times_opened, 2);
        assert!(stats.opened_at > first_opened);

        // The new break period starts from the reopening, not the first opening.
        clock.advance(BREAK / 2);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_dropped_probe_frees_slot() {
        let (breaker, clock) = breaker_with_clock(1);
        fail(&breaker);
        clock.advance(BREAK);

        let probe = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
        drop(probe);

        let next = breaker.try_acquire().unwrap();
        assert!(next.is_probe());
    }

    #[test]
    fn test_callbacks_fire_on_transitions() {
        let breaks = Arc::new(AtomicU32::new(0));
        let resets = Arc::new(AtomicU32::new(0));
        let half_opens = Arc::new(AtomicU32::new(0));
        let clock = Arc::new(ManualClock::new());

        let breaker = CircuitBreaker::builder(CircuitBreakerConfig::new(1, BREAK))
            .clock(clock.clone())
            .on_break({
                let breaks = breaks.clone();
                move |_| {
                    breaks.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_reset({
                let resets = resets.clone();
                move || {
                    resets.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_half_open({
                let half_opens = half_opens.clone();
                move || {
                    half_opens.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        fail(&breaker);
        clock.advance(BREAK);
        breaker.try_acquire().unwrap().record_failure();
        clock.advance(BREAK);
        breaker.try_acquire().unwrap().record_success();

        assert_eq!(breaks.load(Ordering::SeqCst), 2);
        assert_eq!(half_opens.load(Ordering::SeqCst), 2);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_break_state_machine() {
        let breaker = CircuitBreaker::builder(CircuitBreakerConfig::new(1, BREAK))
            .on_break(|_| panic!("sink unavailable"))
            .build()
            .unwrap();

        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_isolate_fires_on_break_before_reset() {
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let breaker = CircuitBreaker::builder(CircuitBreakerConfig::new(5, BREAK))
            .on_break({
                let events = events.clone();
                move |info| events.lock().push(format!("break isolated={}", info.isolated))
            })
            .on_reset({
                let events = events.clone();
                move || events.lock().push("reset".to_string())
            })
            .build()
            .unwrap();

        breaker.isolate();
        breaker.isolate();
        breaker.reset();

        assert_eq!(*events.lock(), vec!["break isolated=true", "reset"]);
    }

    #[test]
    fn test_isolate_and_reset() {
        let (breaker, clock) = breaker_with_clock(5);
        breaker.isolate();
        clock.advance(BREAK * 10);
        assert!(breaker.try_acquire().is_err());
        assert!(breaker.stats().isolated);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_concurrent_callers_get_one_probe() {
        const CALLERS: usize = 16;
        let (breaker, clock) = breaker_with_clock(1);
        fail(&breaker);
        clock.advance(BREAK);

        let barrier = Arc::new(Barrier::new(CALLERS));
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let breaker = breaker.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    breaker.try_acquire().ok()
                })
            })
            .collect();

        // Hold every permit until all threads finish so no probe settles early.
        let permits: Vec<Permit> = handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 1);
        assert!(permits[0].is_probe());
        assert_eq!(breaker.stats().rejected_calls, (CALLERS - 1) as u64);
    }

    proptest! {
        #[test]
        fn prop_successes_never_accumulate(outcomes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let (breaker, _clock) = breaker_with_clock(u32::MAX);
            let mut expected = 0u32;

            for success in outcomes {
                let permit = breaker.try_acquire().unwrap();
                if success {
                    permit.record_success();
                    expected = 0;
                } else {
                    permit.record_failure();
                    expected += 1;
                }
                prop_assert_eq!(breaker.consecutive_failures(), expected);
            }
        }
    }
}
