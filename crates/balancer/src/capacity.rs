//! Rolling-window capacity reservation for one sub-provider.
//!
//! Reservations are optimistic: tokens are charged to the window when a
//! reservation is taken and are never refunded on release; the window simply
//! expires them. A reservation followed by an adapter failure before the HTTP
//! send still counts, which absorbs burst pressure.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use switchyard_store::SubProviderLimits;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

struct Windows {
    /// Request timestamps within the last 60s.
    requests: VecDeque<Instant>,
    /// Request timestamps within the last hour (for the per-hour cap).
    hour_requests: VecDeque<Instant>,
    /// `(timestamp, reserved_tokens)` within the last 60s.
    tokens: VecDeque<(Instant, u32)>,
}

impl Windows {
    /// Drop expired entries from the head; all windows are insertion-ordered.
    fn prune(&mut self, now: Instant) {
        while let Some(t) = self.requests.front() {
            if now.duration_since(*t) >= MINUTE {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(t) = self.hour_requests.front() {
            if now.duration_since(*t) >= HOUR {
                self.hour_requests.pop_front();
            } else {
                break;
            }
        }
        while let Some((t, _)) = self.tokens.front() {
            if now.duration_since(*t) >= MINUTE {
                self.tokens.pop_front();
            } else {
                break;
            }
        }
    }

    fn token_sum(&self) -> u64 {
        self.tokens.iter().map(|(_, n)| u64::from(*n)).sum()
    }
}

/// The single authoritative place a sub-provider's reservation lives.
pub struct CapacityGate {
    limits: SubProviderLimits,
    windows: Mutex<Windows>,
    concurrent: AtomicU32,
}

impl CapacityGate {
    #[must_use]
    pub fn new(limits: SubProviderLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(Windows {
                requests: VecDeque::new(),
                hour_requests: VecDeque::new(),
                tokens: VecDeque::new(),
            }),
            concurrent: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &SubProviderLimits {
        &self.limits
    }

    fn fits(&self, windows: &Windows, est_tokens: u32) -> bool {
        (windows.requests.len() as u32) < self.limits.max_requests_per_minute
            && (windows.hour_requests.len() as u32) < self.limits.max_requests_per_hour
            && windows.token_sum() + u64::from(est_tokens)
                <= u64::from(self.limits.max_tokens_per_minute)
            && self.concurrent.load(Ordering::Acquire) < self.limits.max_concurrent_requests
    }

    /// Whether a request of `est_tokens` would fit right now.
    pub fn can_handle(&self, est_tokens: u32) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.prune(Instant::now());
        self.fits(&windows, est_tokens)
    }

    /// Take a reservation. Returns false (and reserves nothing) when over
    /// capacity. Check and append happen under one lock so two racing
    /// requests cannot both squeeze through the last slot.
    pub fn reserve(&self, est_tokens: u32) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.prune(now);
        if !self.fits(&windows, est_tokens) {
            return false;
        }
        windows.requests.push_back(now);
        windows.hour_requests.push_back(now);
        windows.tokens.push_back((now, est_tokens));
        self.concurrent.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Release the concurrency slot of a reservation. Reserved tokens stay in
    /// the window until they expire.
    pub fn release(&self) {
        let _ = self
            .concurrent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    /// Current `(requests_per_minute, tokens_per_minute)` for scoring.
    pub fn observe_windows(&self) -> (u32, u64) {
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.prune(Instant::now());
        (windows.requests.len() as u32, windows.token_sum())
    }

    #[must_use]
    pub fn concurrent(&self) -> u32 {
        self.concurrent.load(Ordering::Acquire)
    }

    /// Worst-of utilization across RPM, TPM (with `est_tokens` added), and
    /// concurrency, in `[0, 1]`. Feeds the sub-provider capacity score.
    pub fn utilization(&self, est_tokens: u32) -> f64 {
        let (rpm, tpm) = self.observe_windows();
        let rpm_util = f64::from(rpm) / f64::from(self.limits.max_requests_per_minute.max(1));
        let tpm_util = (tpm + u64::from(est_tokens)) as f64
            / f64::from(self.limits.max_tokens_per_minute.max(1));
        let conc_util =
            f64::from(self.concurrent()) / f64::from(self.limits.max_concurrent_requests.max(1));
        rpm_util.max(tpm_util).max(conc_util).min(1.0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rpm: u32, tpm: u32, concurrent: u32) -> SubProviderLimits {
        SubProviderLimits {
            max_requests_per_minute: rpm,
            max_requests_per_hour: 10_000,
            max_tokens_per_minute: tpm,
            max_concurrent_requests: concurrent,
        }
    }

    #[test]
    fn reserve_until_rpm_exhausted() {
        let gate = CapacityGate::new(limits(2, 1_000_000, 100));
        assert!(gate.reserve(10));
        assert!(gate.reserve(10));
        assert!(!gate.reserve(10));
        let (rpm, _) = gate.observe_windows();
        assert_eq!(rpm, 2);
    }

    #[test]
    fn token_budget_enforced_including_estimate() {
        let gate = CapacityGate::new(limits(100, 100, 100));
        assert!(gate.reserve(60));
        // 60 reserved + 50 estimated > 100.
        assert!(!gate.can_handle(50));
        assert!(gate.can_handle(40));
    }

    #[test]
    fn concurrency_gate_and_release() {
        let gate = CapacityGate::new(limits(100, 1_000_000, 1));
        assert!(gate.reserve(1));
        assert_eq!(gate.concurrent(), 1);
        assert!(!gate.reserve(1));
        gate.release();
        assert_eq!(gate.concurrent(), 0);
        assert!(gate.reserve(1));
    }

    #[test]
    fn release_clamps_at_zero() {
        let gate = CapacityGate::new(limits(10, 100, 10));
        gate.release();
        gate.release();
        assert_eq!(gate.concurrent(), 0);
    }

    #[test]
    fn tokens_not_refunded_on_release() {
        let gate = CapacityGate::new(limits(100, 100, 100));
        assert!(gate.reserve(80));
        gate.release();
        let (_, tpm) = gate.observe_windows();
        assert_eq!(tpm, 80);
        assert!(!gate.can_handle(30));
    }

    #[test]
    fn utilization_is_worst_dimension() {
        let gate = CapacityGate::new(limits(10, 1_000, 10));
        assert!(gate.reserve(900));
        // rpm 1/10, tpm (900+0)/1000, concurrency 1/10 → tpm dominates.
        let util = gate.utilization(0);
        assert!((util - 0.9).abs() < 1e-9);
    }
}
