//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any trial failure (last_failure_time reset)
//! ```
//!
//! # Design Decisions
//! - Per-endpoint breaker (not global), created lazily by the dispatcher
//! - Fail fast in Open state: the protected future is never polled
//! - State sits behind one mutex; the protected call runs outside it

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Result of a breaker-guarded call.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Rejected without invoking the protected call.
    #[error("circuit `{name}` is open")]
    Open { name: String },

    /// The protected call ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub monitoring_period: Duration,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            monitoring_period: config.monitoring_period(),
            success_threshold: config.success_threshold.max(1),
            half_open_max_calls: config.half_open_max_calls.max(1),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    trials_in_flight: u32,
    last_failure_time: Option<Instant>,
    /// Outcomes inside the monitoring period, for failure-rate reporting.
    window: VecDeque<(Instant, bool)>,
}

/// Point-in-time breaker view.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Calls observed in the monitoring period.
    pub window_calls: usize,
    /// Failure share of `window_calls` (0 when empty).
    pub failure_rate: f64,
}

/// Admission decision taken under the lock.
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                trials_in_flight: 0,
                last_failure_time: None,
                window: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open breaker whose recovery timeout has elapsed is
    /// still reported open until a call is admitted.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a call made now would be rejected without running.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => inner
                .last_failure_time
                .is_some_and(|at| at.elapsed() < self.settings.recovery_timeout),
            CircuitState::HalfOpen => inner.trials_in_flight >= self.settings.half_open_max_calls,
        }
    }

    /// Run `call` under the breaker.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut trial = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = call().await;
        trial.armed = false;

        match &result {
            Ok(_) => self.on_success(&admission),
            Err(_) => self.on_failure(&admission),
        }
        result.map_err(CircuitError::Inner)
    }

    fn admit<E>(&self) -> Result<Admission, CircuitError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let ready = inner
                    .last_failure_time
                    .map_or(true, |at| at.elapsed() >= self.settings.recovery_timeout);
                if ready {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trials_in_flight = 1;
                    Ok(Admission::Trial)
                } else {
                    drop(inner);
                    self.reject()
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.settings.half_open_max_calls {
                    inner.trials_in_flight += 1;
                    Ok(Admission::Trial)
                } else {
                    drop(inner);
                    self.reject()
                }
            }
        }
    }

    fn reject<T, E>(&self) -> Result<T, CircuitError<E>> {
        tracing::debug!(circuit = %self.name, "Call rejected, circuit open");
        metrics::record_circuit_rejection(&self.name);
        Err(CircuitError::Open {
            name: self.name.clone(),
        })
    }

    fn on_success(&self, admission: &Admission) {
        let mut inner = self.lock();
        self.observe(&mut inner, true);

        match (inner.state, admission) {
            (CircuitState::Closed, _) => inner.failure_count = 0,
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.settings.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // Late results of calls admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, admission: &Admission) {
        let mut inner = self.lock();
        self.observe(&mut inner, false);

        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                if inner.failure_count >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.last_failure_time = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Trial slot given back without an outcome (the call was dropped).
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn observe(&self, inner: &mut Inner, success: bool) {
        let now = Instant::now();
        inner.window.push_back((now, success));
        self.prune(inner, now);
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.window.front() {
            if now.saturating_duration_since(*at) > self.settings.monitoring_period {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.trials_in_flight = 0;

        match to {
            CircuitState::Open => tracing::warn!(
                circuit = %self.name,
                from = from.as_str(),
                recovery_timeout = ?self.settings.recovery_timeout,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.name, "Circuit half-open, admitting trial call")
            }
            CircuitState::Closed => tracing::info!(circuit = %self.name, "Circuit closed"),
        }
        metrics::record_circuit_state(&self.name, to);
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.last_failure_time = None;
        inner.window.clear();
    }

    pub fn stats(&self) -> CircuitStats {
        let mut inner = self.lock();
        self.prune(&mut inner, Instant::now());

        let window_calls = inner.window.len();
        let failures = inner.window.iter().filter(|(_, ok)| !ok).count();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            window_calls,
            failure_rate: if window_calls == 0 {
                0.0
            } else {
                failures as f64 / window_calls as f64
            },
        }
    }
}

/// Returns a half-open trial slot if the protected future is dropped mid-call.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}
