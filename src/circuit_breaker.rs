//! Per-key circuit breaker.
//!
//! Tracks consecutive failures for a single provider key and moves through
//! the classic three-state machine: CLOSED (admitting) -> OPEN (rejecting)
//! -> HALF_OPEN (probing) -> CLOSED or back to OPEN.
//!
//! Unlike a request-path circuit breaker wrapped around a single downstream
//! call, this breaker is consulted *before* a key is selected
//! (`CircuitBreaker::can_execute`) rather than wrapping the call itself —
//! `KeyManager` asks each key's breaker whether it's eligible, picks one, and
//! only then invokes the caller's operation.

use crate::clock::{Clock, MonotonicClock};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A state transition the breaker just made, for the caller to log/emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    ClosedToOpen { consecutive_failures: usize },
    HalfOpenToOpen { consecutive_failures: usize },
    HalfOpenToClosed,
    OpenToHalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: usize,
    last_failure_millis: Option<u64>,
    opened_at_millis: Option<u64>,
}

/// Per-key circuit breaker.
///
/// Configuration is fixed at construction; `failure_threshold` and
/// `cooldown` come directly from the owning provider's
/// [`crate::provider::ProviderConfig`].
pub struct CircuitBreaker {
    failure_threshold: usize,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("cooldown", &self.cooldown)
            .field("state", &guard.state)
            .field("consecutive_failures", &guard.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self::with_clock(failure_threshold, cooldown, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(failure_threshold: usize, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_millis: None,
                opened_at_millis: None,
            }),
        }
    }

    /// Current state, resolving an overdue OPEN -> HALF_OPEN transition first.
    pub fn state(&self) -> CircuitState {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.maybe_transition_to_half_open(&mut guard);
        guard.state
    }

    /// Whether a request may be attempted on this key right now.
    ///
    /// CLOSED and HALF_OPEN both admit; HALF_OPEN intentionally allows more
    /// than one concurrent probe (see invariant notes on multi-probe races).
    pub fn can_execute(&self) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.maybe_transition_to_half_open(&mut guard);
        matches!(guard.state, CircuitState::Closed | CircuitState::HalfOpen)
    }

    /// Resolve an overdue OPEN -> HALF_OPEN transition and report it if one
    /// just happened, without discarding it the way [`Self::state`] and
    /// [`Self::can_execute`] do. Callers that poll many breakers on a timer
    /// or just before a selection pass (e.g. [`crate::key_manager::KeyManager`])
    /// use this to surface the transition for logging/telemetry even though
    /// it isn't driven by a `record_success`/`record_failure` call.
    pub fn poll_half_open(&self) -> Option<Transition> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.maybe_transition_to_half_open(&mut guard)
    }

    /// Record a successful call. Resets the failure count and, from
    /// HALF_OPEN, closes the circuit.
    pub fn record_success(&self) -> Option<Transition> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let was_half_open = guard.state == CircuitState::HalfOpen;
        guard.consecutive_failures = 0;
        guard.state = CircuitState::Closed;
        guard.opened_at_millis = None;
        if was_half_open {
            Some(Transition::HalfOpenToClosed)
        } else {
            None
        }
    }

    /// Record a failed call. Trips the circuit open from CLOSED once
    /// `failure_threshold` consecutive failures accrue, and immediately
    /// re-opens a HALF_OPEN probe that failed.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.consecutive_failures += 1;
        guard.last_failure_millis = Some(self.clock.now_millis());

        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at_millis = Some(self.clock.now_millis());
                Some(Transition::HalfOpenToOpen { consecutive_failures: guard.consecutive_failures })
            }
            CircuitState::Closed if guard.consecutive_failures >= self.failure_threshold => {
                guard.state = CircuitState::Open;
                guard.opened_at_millis = Some(self.clock.now_millis());
                Some(Transition::ClosedToOpen { consecutive_failures: guard.consecutive_failures })
            }
            _ => None,
        }
    }

    /// Force the breaker back to CLOSED, clearing failure history.
    pub fn reset(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.state = CircuitState::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at_millis = None;
        guard.last_failure_millis = None;
    }

    pub fn consecutive_failures(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).consecutive_failures
    }

    /// Caller must hold the lock. Transitions OPEN -> HALF_OPEN once the
    /// configured cooldown has elapsed since the circuit opened.
    fn maybe_transition_to_half_open(&self, guard: &mut Inner) -> Option<Transition> {
        if guard.state != CircuitState::Open {
            return None;
        }
        let opened_at = guard.opened_at_millis?;
        let elapsed = self.clock.now_millis().saturating_sub(opened_at);
        if elapsed >= self.cooldown.as_millis() as u64 {
            guard.state = CircuitState::HalfOpen;
            Some(Transition::OpenToHalfOpen)
        } else {
            None
        }
    }
}
