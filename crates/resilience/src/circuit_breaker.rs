//! Per-step circuit breaker.
//!
//! Counts consecutive failures; at the configured threshold the circuit
//! opens and short-circuits invocations until the open window elapses, then
//! admits a bounded number of half-open probes before closing again.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ResilienceError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Operations are allowed.
    Closed,
    /// Operations are rejected until the open window elapses.
    Open,
    /// A bounded number of probe operations are allowed.
    HalfOpen,
}

impl BreakerState {
    const fn to_atomic(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_atomic(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting probes.
    #[serde(with = "crate::serde_duration_ms")]
    pub open_duration: Duration,
    /// Probe operations admitted while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be positive".into(),
            ));
        }
        if self.open_duration.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "open_duration must be positive".into(),
            ));
        }
        if self.half_open_max_probes == 0 {
            return Err(ResilienceError::InvalidConfig(
                "half_open_max_probes must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_probes: u32,
    opened_at: Option<Instant>,
    total_operations: u64,
    total_rejections: u64,
}

/// A runtime-configured circuit breaker.
///
/// State reads take a lock-free fast path via an atomic; transitions happen
/// under a short `parking_lot` critical section.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    /// Atomic state mirror: 0=Closed, 1=Open, 2=HalfOpen. Kept in sync
    /// under the inner lock so the closed-state fast path never locks.
    atomic_state: AtomicU8,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_probes: 0,
                opened_at: None,
                total_operations: 0,
                total_rejections: 0,
            }),
            atomic_state: AtomicU8::new(BreakerState::Closed.to_atomic()),
        })
    }

    /// Create a breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
            .unwrap_or_else(|_| unreachable!("default configuration is valid"))
    }

    /// Current state without acquiring a lock.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        BreakerState::from_atomic(self.atomic_state.load(Ordering::Acquire))
    }

    /// Returns `true` if operations are currently rejected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Ask permission to run one operation.
    ///
    /// Returns `Err(CircuitOpen)` while the circuit is open or the
    /// half-open probe budget is spent. An open circuit whose window has
    /// elapsed transitions to half-open and admits the caller as a probe.
    pub fn try_acquire(&self) -> Result<(), ResilienceError> {
        // Fast path: closed circuits admit without locking.
        if self.state() == BreakerState::Closed {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= self.config.open_duration {
                    info!(state = %inner.state, "circuit breaker transitioning to half-open");
                    self.set_state(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_probes = 1;
                    Ok(())
                } else {
                    inner.total_rejections += 1;
                    Err(ResilienceError::CircuitOpen {
                        retry_after: self.config.open_duration.checked_sub(elapsed),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_probes {
                    inner.half_open_probes += 1;
                    Ok(())
                } else {
                    inner.total_rejections += 1;
                    Err(ResilienceError::CircuitOpen { retry_after: None })
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_operations += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                info!("circuit breaker closing after successful probe");
                self.set_state(&mut inner, BreakerState::Closed);
                inner.consecutive_failures = 0;
                inner.half_open_probes = 0;
                inner.opened_at = None;
            }
            BreakerState::Open => {
                warn!("unexpected success recorded while circuit open");
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_operations += 1;
        inner.consecutive_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                    self.set_state(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker reopening after failed probe");
                self.set_state(&mut inner, BreakerState::Open);
                inner.opened_at = Some(Instant::now());
                inner.half_open_probes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Reset to the closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!("manually resetting circuit breaker");
        self.set_state(&mut inner, BreakerState::Closed);
        inner.consecutive_failures = 0;
        inner.half_open_probes = 0;
        inner.opened_at = None;
    }

    /// Snapshot of the breaker's counters.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_operations: inner.total_operations,
            total_rejections: inner.total_rejections,
        }
    }

    fn set_state(&self, inner: &mut BreakerInner, state: BreakerState) {
        inner.state = state;
        self.atomic_state.store(state.to_atomic(), Ordering::Release);
    }
}

/// Counters exposed by [`CircuitBreaker::stats`].
#[derive(Debug, Clone, Copy)]
pub struct BreakerStats {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures recorded.
    pub consecutive_failures: u32,
    /// Operations recorded (success + failure).
    pub total_operations: u64,
    /// Operations rejected while open or probe-exhausted.
    pub total_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32, open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
            half_open_max_probes: 1,
        })
        .unwrap()
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::with_defaults();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = fast_breaker(3, 1_000);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(ResilienceError::CircuitOpen { retry_after: Some(_) })
        ));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = fast_breaker(3, 1_000);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_window_then_closes_on_success() {
        let breaker = fast_breaker(1, 20);
        breaker.record_failure();
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(30));

        // Window elapsed: caller is admitted as a probe.
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_failed_probe() {
        let breaker = fast_breaker(1, 20);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.try_acquire().is_ok());

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_probe_budget_is_bounded() {
        let breaker = fast_breaker(1, 20);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.try_acquire().is_ok());
        // Probe budget (1) spent; further acquires are rejected.
        assert!(matches!(
            breaker.try_acquire(),
            Err(ResilienceError::CircuitOpen { retry_after: None })
        ));
    }

    #[test]
    fn reset_closes_the_circuit() {
        let breaker = fast_breaker(1, 60_000);
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn stats_track_operations_and_rejections() {
        let breaker = fast_breaker(1, 60_000);
        breaker.record_success();
        breaker.record_failure();
        let _ = breaker.try_acquire();

        let stats = breaker.stats();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.state, BreakerState::Open);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 0,
            open_duration: Duration::from_secs(1),
            half_open_max_probes: 1,
        })
        .unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }
}
