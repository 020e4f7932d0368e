//! Circuit breaker state machine for per-provider health tracking.
//!
//! Implements the Closed -> Open -> Half-Open -> Closed lifecycle:
//! - **Closed**: requests flow normally; counters reset at the start of each
//!   5-second rolling interval, and 3 consecutive failures within one
//!   interval trip the circuit.
//! - **Open**: requests are rejected for 30 seconds, then the next call
//!   transitions to Half-Open.
//! - **Half-Open**: up to 3 probe requests may be in flight; 3 consecutive
//!   successes close the circuit, any failure reopens it with a fresh timer.
//!
//! Every state change starts a new *generation*; completions reported
//! against a previous generation are discarded so late results cannot
//! corrupt the counters of a newer window.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Consecutive failures required to trip the circuit.
const FAILURE_THRESHOLD: u32 = 3;

/// Duration the circuit stays Open before allowing probes.
const OPEN_DURATION: Duration = Duration::from_secs(30);

/// Rolling interval after which Closed-state counters are cleared.
const COUNTER_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum in-flight probes in Half-Open; also the consecutive success
/// count required to close.
const HALF_OPEN_MAX_PROBES: u32 = 3;

/// The three states of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Lowercase string representation for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Request counters for the current generation.
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    requests: u32,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    /// When the current window expires: the counter interval in Closed, the
    /// probe time in Open. No expiry in Half-Open.
    expiry: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: Some(Instant::now() + COUNTER_INTERVAL),
        }
    }

    fn new_generation(&mut self, now: Instant) {
        self.generation += 1;
        self.counts = Counts::default();
        self.expiry = match self.state {
            BreakerState::Closed => Some(now + COUNTER_INTERVAL),
            BreakerState::Open => Some(now + OPEN_DURATION),
            BreakerState::HalfOpen => None,
        };
    }

    fn set_state(&mut self, state: BreakerState, now: Instant) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.new_generation(now);
    }

    /// Lazily roll expired windows, then return the effective state.
    fn current_state(&mut self, now: Instant) -> BreakerState {
        match self.state {
            BreakerState::Closed => {
                if matches!(self.expiry, Some(expiry) if now >= expiry) {
                    self.new_generation(now);
                }
            }
            BreakerState::Open => {
                if matches!(self.expiry, Some(expiry) if now >= expiry) {
                    self.set_state(BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
        self.state
    }
}

/// Snapshot of a breaker's observable state.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Per-provider circuit breaker. State is mutated under one lock; readers
/// receive copied snapshots.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective state right now (rolls expired windows).
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        inner.current_state(Instant::now())
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.current_state(Instant::now());
        BreakerSnapshot {
            state,
            consecutive_failures: inner.counts.consecutive_failures,
        }
    }

    /// Admit one call, returning the generation to report against.
    ///
    /// Fails with `breaker_open` when the circuit is Open, or when the
    /// Half-Open probe budget is exhausted.
    pub(crate) fn before_call(&self) -> Result<u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        match inner.current_state(now) {
            BreakerState::Open => Err(Error::BreakerOpen {
                provider: self.name.clone(),
            }),
            BreakerState::HalfOpen if inner.counts.requests >= HALF_OPEN_MAX_PROBES => {
                Err(Error::BreakerOpen {
                    provider: self.name.clone(),
                })
            }
            _ => {
                inner.counts.requests += 1;
                Ok(inner.generation)
            }
        }
    }

    /// Report the outcome of an admitted call. Outcomes from a previous
    /// generation are discarded.
    pub(crate) fn after_call(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let state = inner.current_state(now);
        if generation != inner.generation {
            return;
        }

        if success {
            inner.counts.on_success();
            if state == BreakerState::HalfOpen
                && inner.counts.consecutive_successes >= HALF_OPEN_MAX_PROBES
            {
                inner.set_state(BreakerState::Closed, now);
                tracing::info!(provider = %self.name, "circuit CLOSED: probes succeeded");
            }
        } else {
            inner.counts.on_failure();
            match state {
                BreakerState::Closed
                    if inner.counts.consecutive_failures >= FAILURE_THRESHOLD =>
                {
                    inner.set_state(BreakerState::Open, now);
                    tracing::warn!(
                        provider = %self.name,
                        failures = FAILURE_THRESHOLD,
                        "circuit OPENED: consecutive failures",
                    );
                }
                BreakerState::HalfOpen => {
                    inner.set_state(BreakerState::Open, now);
                    tracing::warn!(provider = %self.name, "circuit REOPENED: probe failed");
                }
                _ => {}
            }
        }
    }

    /// Run `operation` through the breaker, counting its outcome.
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let generation = self.before_call()?;
        let result = operation.await;
        self.after_call(generation, result.is_ok());
        result
    }

    /// Record a failure observed outside [`CircuitBreaker::call`], e.g. an
    /// error event on an already-running stream. Ignored when the circuit
    /// would not admit a call.
    pub(crate) fn record_failure(&self) {
        if let Ok(generation) = self.before_call() {
            self.after_call(generation, false);
        }
    }
}
