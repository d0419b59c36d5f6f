//! Per-sub-provider circuit breaker.
//!
//! State machine: closed → open when consecutive recorded failures reach the
//! classifier's threshold; open → half-open after the cooldown; half-open →
//! closed on the first success, back to open (cooldown restarted) on any
//! failure.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
            }),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current state, lazily promoting open → half-open once the cooldown
    /// has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        if inner.state == BreakerState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.cooldown
        {
            inner.state = BreakerState::HalfOpen;
        }
        inner.state
    }

    /// Whether traffic may pass (closed or half-open trial).
    pub fn allows_requests(&self) -> bool {
        self.state() != BreakerState::Open
    }

    pub fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a counted failure. `consecutive_errors` is the streak *after*
    /// this failure; `threshold` comes from the classifier configuration.
    pub fn on_failure(&self, consecutive_errors: u32, threshold: u32) {
        let mut inner = self.lock();
        // Re-derive half-open here: the failure may arrive after the cooldown
        // without anyone having observed the state in between.
        if inner.state == BreakerState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.cooldown
        {
            inner.state = BreakerState::HalfOpen;
        }
        match inner.state {
            BreakerState::HalfOpen => {
                // Failed trial: trip again, restart the cooldown.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            },
            BreakerState::Closed if consecutive_errors >= threshold => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            },
            _ => {},
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_at_threshold() {
        let breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.on_failure(9, 10);
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_failure(10, 10);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allows_requests());
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_success() {
        let breaker = CircuitBreaker::new(Duration::from_millis(0));
        breaker.on_failure(10, 10);
        // Zero cooldown: next observation is already the half-open trial.
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.allows_requests());
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_cooldown() {
        let breaker = CircuitBreaker::new(Duration::from_millis(20));
        breaker.on_failure(10, 10);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Any failure during the trial reopens regardless of streak length.
        breaker.on_failure(1, 10);
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn success_in_closed_is_noop() {
        let breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_within_cooldown_blocks() {
        let breaker = CircuitBreaker::new(Duration::from_secs(3600));
        breaker.on_failure(10, 10);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allows_requests());
    }
}
