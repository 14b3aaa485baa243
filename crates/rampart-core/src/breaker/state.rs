//! The circuit breaker's guarded state tuple and its transition function.
//!
//! Everything here runs with the breaker's lock held. Methods return the
//! transition they performed (if any) so the caller can fire callbacks and
//! log after releasing the lock.

use std::time::{Duration, Instant};

use super::CircuitState;

/// A state change that observers should hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Closed → Open
    Opened { failures: u32 },

    /// Half-Open → Open after a failed probe
    Reopened,

    /// Open → Half-Open
    HalfOpened,

    /// Half-Open → Closed, or a manual reset
    Closed,

    /// Closed or Half-Open → Open by `isolate`
    Isolated { failures: u32 },
}

/// Result of asking the breaker to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted { generation: u64, probe: bool },
    Rejected(CircuitState),
}

#[derive(Debug)]
pub(crate) struct BreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub probe_in_flight: bool,
    pub isolated: bool,
    /// Bumped on every state change; outcomes from older generations are stale.
    pub generation: u64,
    pub rejected_calls: u64,
    pub times_opened: u64,
}

impl BreakerState {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            isolated: false,
            generation: 0,
            rejected_calls: 0,
            times_opened: 0,
        }
    }

    /// Decide whether a call may run, moving Open → Half-Open when due.
    pub fn admit(&mut self, now: Instant, break_duration: Duration) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (self.admitted(false), None),
            CircuitState::Open if !self.isolated && self.break_elapsed(now, break_duration) => {
                self.state = CircuitState::HalfOpen;
                self.generation += 1;
                self.probe_in_flight = true;
                (self.admitted(true), Some(Transition::HalfOpened))
            }
            CircuitState::HalfOpen if !self.probe_in_flight => {
                self.probe_in_flight = true;
                (self.admitted(true), None)
            }
            state => {
                self.rejected_calls += 1;
                (Admission::Rejected(state), None)
            }
        }
    }

    fn admitted(&self, probe: bool) -> Admission {
        Admission::Admitted {
            generation: self.generation,
            probe,
        }
    }

    fn break_elapsed(&self, now: Instant, break_duration: Duration) -> bool {
        match self.opened_at {
            Some(opened_at) => now.saturating_duration_since(opened_at) >= break_duration,
            None => true,
        }
    }

    pub fn record_success(&mut self, generation: u64, probe: bool) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }

        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen if probe => {
                self.close();
                Some(Transition::Closed)
            }
            _ => None,
        }
    }

    pub fn record_failure(
        &mut self,
        generation: u64,
        probe: bool,
        now: Instant,
        threshold: u32,
    ) -> Option<Transition> {
        if generation != self.generation {
            return None;
        }

        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= threshold {
                    let failures = self.consecutive_failures;
                    self.open(now);
                    Some(Transition::Opened { failures })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if probe => {
                self.open(now);
                Some(Transition::Reopened)
            }
            _ => None,
        }
    }

    /// Give up a probe slot without deciding the breaker's fate.
    pub fn release_probe(&mut self, generation: u64) {
        if generation == self.generation && self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    /// Force the circuit closed.
    pub fn reset(&mut self) -> Option<Transition> {
        let was_closed = self.state == CircuitState::Closed && !self.isolated;
        self.isolated = false;
        self.close();
        (!was_closed).then_some(Transition::Closed)
    }

    /// Force the circuit open until `reset`.
    ///
    /// Reports a transition only if the circuit was not already open.
    pub fn isolate(&mut self, now: Instant) -> Option<Transition> {
        self.isolated = true;
        if self.state == CircuitState::Open {
            return None;
        }
        self.open(now);
        Some(Transition::Isolated {
            failures: self.consecutive_failures,
        })
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
        self.generation += 1;
        self.times_opened += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        self.generation += 1;
    }
}
