//! Live provider/sub-provider handles and the registry that owns them.
//!
//! Handles wrap the persisted records with the runtime state selection needs:
//! capacity windows, breaker, counters, latency samples. All mutation goes
//! through `record_success`/`record_error` so concurrent requests never lose
//! counts (atomics for hot fields, a per-handle mutex for the rest).

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    dashmap::DashMap,
    tracing::{debug, warn},
};

use {
    switchyard_metrics::{counter, gauge, labels, provider as provider_metrics},
    switchyard_store::{HealthStatus, ProviderRecord, SubProviderRecord},
};

use crate::{
    breaker::CircuitBreaker,
    capacity::CapacityGate,
    classify::{Classification, ClassifierConfig, classify},
    health::{
        LatencyTracker, ProviderScoreInputs, SubProviderScoreInputs, provider_score,
        sub_provider_score,
    },
};

/// Minimum maintained health score a sub-provider needs to stay selectable.
const AVAILABILITY_FLOOR: f64 = 0.7;

/// Health-score adjustment per outcome. Failures cost little so a breaker
/// trip alone does not also sink the score below the availability floor
/// before the half-open trial can run.
const HEALTH_SCORE_SUCCESS_CREDIT: f64 = 0.05;
const HEALTH_SCORE_FAILURE_COST: f64 = 0.01;

/// EWMA weight for the sub-provider average latency.
const LATENCY_EWMA_ALPHA: f64 = 0.3;

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Provider handle ─────────────────────────────────────────────────────────

pub struct ProviderHandle {
    record: ProviderRecord,
    health: Mutex<HealthStatus>,
    success: AtomicU64,
    error: AtomicU64,
    concurrent: AtomicU32,
    latency: Mutex<LatencyTracker>,
    /// Request timestamps in the last 60s, for throughput scoring.
    recent: Mutex<VecDeque<Instant>>,
    started_at: Instant,
}

impl ProviderHandle {
    #[must_use]
    pub fn new(record: ProviderRecord) -> Self {
        let health = record.health_status;
        Self {
            record,
            health: Mutex::new(health),
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            concurrent: AtomicU32::new(0),
            latency: Mutex::new(LatencyTracker::default()),
            recent: Mutex::new(VecDeque::new()),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    #[must_use]
    pub fn record(&self) -> &ProviderRecord {
        &self.record
    }

    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        *lock(&self.health)
    }

    /// Enabled, serving the model, and not reporting unhealthy.
    #[must_use]
    pub fn is_selectable(&self, model: &str) -> bool {
        self.record.enabled
            && self.record.supports_model(model)
            && self.health_status() != HealthStatus::Unhealthy
    }

    pub fn inc_concurrent(&self) {
        self.concurrent.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_concurrent(&self) {
        let _ = self
            .concurrent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    #[must_use]
    pub fn concurrent(&self) -> u32 {
        self.concurrent.load(Ordering::Acquire)
    }

    fn note_request(&self) {
        let now = Instant::now();
        let mut recent = lock(&self.recent);
        recent.push_back(now);
        while let Some(t) = recent.front() {
            if now.duration_since(*t).as_secs() >= 60 {
                recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests_per_second(&self) -> f64 {
        lock(&self.recent).len() as f64 / 60.0
    }

    fn success_rate(&self) -> f64 {
        let success = self.success.load(Ordering::Relaxed);
        let error = self.error.load(Ordering::Relaxed);
        let total = success + error;
        if total == 0 {
            1.0
        } else {
            success as f64 / total as f64
        }
    }

    fn utilization(&self) -> f64 {
        let conc_util = f64::from(self.concurrent()) / 100.0;
        let rpm_util = match self.record.requests_per_minute {
            Some(limit) if limit > 0 => {
                lock(&self.recent).len() as f64 / f64::from(limit)
            },
            _ => 0.0,
        };
        conc_util.max(rpm_util).min(1.0)
    }

    /// Composite score from a fresh snapshot of the handle's metrics.
    #[must_use]
    pub fn score(&self) -> f64 {
        let (p50, p95, avg) = {
            let latency = lock(&self.latency);
            (
                latency.percentile(50.0),
                latency.percentile(95.0),
                latency.average(),
            )
        };
        provider_score(&ProviderScoreInputs {
            success_rate: self.success_rate(),
            p50_ms: p50,
            p95_ms: p95,
            avg_ms: avg,
            health: self.health_status(),
            uptime_score: (self.started_at.elapsed().as_secs_f64() / 3600.0).min(1.0),
            requests_per_second: self.requests_per_second(),
            utilization: self.utilization(),
        })
    }

    fn on_success(&self, latency_ms: u64) {
        self.success.fetch_add(1, Ordering::Relaxed);
        lock(&self.latency).record(latency_ms);
        self.note_request();
        self.refresh_health(false);
    }

    fn on_failure(&self, critical: bool) {
        self.error.fetch_add(1, Ordering::Relaxed);
        self.note_request();
        self.refresh_health(critical);
    }

    /// Critical failures pin the provider unhealthy (permanent penalty until
    /// the registry is reloaded); otherwise the status follows the error
    /// rate.
    fn refresh_health(&self, critical: bool) {
        let mut health = lock(&self.health);
        if critical {
            *health = HealthStatus::Unhealthy;
            return;
        }
        if *health == HealthStatus::Unhealthy {
            return;
        }
        let success = self.success.load(Ordering::Relaxed);
        let error = self.error.load(Ordering::Relaxed);
        let total = success + error;
        if total < 10 {
            return;
        }
        let error_rate = error as f64 / total as f64;
        *health = if error_rate > 0.5 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }

    /// Latency percentiles `(p50, p95, p99)` for metric gauges.
    fn latency_snapshot(&self) -> (f64, f64, f64) {
        let latency = lock(&self.latency);
        (
            latency.percentile(50.0),
            latency.percentile(95.0),
            latency.percentile(99.0),
        )
    }
}

// ── Sub-provider handle ─────────────────────────────────────────────────────

pub struct SubProviderHandle {
    record: SubProviderRecord,
    gate: CapacityGate,
    breaker: CircuitBreaker,
    success: AtomicU64,
    error: AtomicU64,
    consecutive_errors: AtomicU32,
    avg_latency_ms: Mutex<f64>,
    health_score: Mutex<f64>,
}

impl SubProviderHandle {
    #[must_use]
    pub fn new(record: SubProviderRecord, classifier: &ClassifierConfig) -> Self {
        let gate = CapacityGate::new(record.limits);
        Self {
            record,
            gate,
            breaker: CircuitBreaker::new(classifier.error_window),
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            avg_latency_ms: Mutex::new(0.0),
            health_score: Mutex::new(1.0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    #[must_use]
    pub fn record(&self) -> &SubProviderRecord {
        &self.record
    }

    #[must_use]
    pub fn gate(&self) -> &CapacityGate {
        &self.gate
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn health_score(&self) -> f64 {
        *lock(&self.health_score)
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// `enabled ∧ breaker admits traffic ∧ health score above the floor`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.record.enabled
            && self.breaker.allows_requests()
            && self.health_score() > AVAILABILITY_FLOOR
    }

    fn success_rate(&self) -> f64 {
        let success = self.success.load(Ordering::Relaxed);
        let error = self.error.load(Ordering::Relaxed);
        let total = success + error;
        if total == 0 {
            1.0
        } else {
            success as f64 / total as f64
        }
    }

    /// Composite score for weighted selection.
    #[must_use]
    pub fn score(&self, est_tokens: u32) -> f64 {
        sub_provider_score(&SubProviderScoreInputs {
            success_rate: self.success_rate(),
            avg_latency_ms: *lock(&self.avg_latency_ms),
            health_score: self.health_score(),
            availability: if self.breaker.allows_requests() {
                1.0
            } else {
                0.0
            },
            utilization: self.gate.utilization(est_tokens),
        })
    }

    fn on_success(&self, latency_ms: u64) {
        self.success.fetch_add(1, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Release);
        self.breaker.on_success();
        {
            let mut avg = lock(&self.avg_latency_ms);
            *avg = if *avg == 0.0 {
                latency_ms as f64
            } else {
                *avg * (1.0 - LATENCY_EWMA_ALPHA) + latency_ms as f64 * LATENCY_EWMA_ALPHA
            };
        }
        let mut health = lock(&self.health_score);
        *health = (*health + HEALTH_SCORE_SUCCESS_CREDIT).min(1.0);
    }

    fn on_failure(&self, threshold: u32) {
        self.error.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        self.breaker.on_failure(streak, threshold);
        let mut health = lock(&self.health_score);
        *health = (*health - HEALTH_SCORE_FAILURE_COST).max(0.0);
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Owner of all live handles, and the single entry point for outcome
/// recording.
pub struct Registry {
    providers: DashMap<String, Arc<ProviderHandle>>,
    subs: DashMap<String, Arc<SubProviderHandle>>,
    classifier: ClassifierConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Registry {
    #[must_use]
    pub fn new(classifier: ClassifierConfig) -> Self {
        Self {
            providers: DashMap::new(),
            subs: DashMap::new(),
            classifier,
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &ClassifierConfig {
        &self.classifier
    }

    /// Replace registry contents from persisted records (boot / admin reload).
    pub fn load(&self, providers: Vec<ProviderRecord>, subs: Vec<SubProviderRecord>) {
        self.providers.clear();
        self.subs.clear();
        for record in providers {
            debug!(provider = %record.id, models = record.models.len(), "registered provider");
            self.providers
                .insert(record.id.clone(), Arc::new(ProviderHandle::new(record)));
        }
        for record in subs {
            debug!(sub_provider = %record.id, provider = %record.provider_id, "registered sub-provider");
            self.subs.insert(
                record.id.clone(),
                Arc::new(SubProviderHandle::new(record, &self.classifier)),
            );
        }
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<Arc<ProviderHandle>> {
        self.providers.get(id).map(|entry| Arc::clone(&entry))
    }

    #[must_use]
    pub fn sub_provider(&self, id: &str) -> Option<Arc<SubProviderHandle>> {
        self.subs.get(id).map(|entry| Arc::clone(&entry))
    }

    #[must_use]
    pub fn providers(&self) -> Vec<Arc<ProviderHandle>> {
        self.providers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    #[must_use]
    pub fn sub_providers_of(&self, provider_id: &str) -> Vec<Arc<SubProviderHandle>> {
        self.subs
            .iter()
            .filter(|entry| entry.value().record().provider_id == provider_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Every distinct model any enabled provider serves, for `/v1/models`.
    #[must_use]
    pub fn known_models(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for entry in self.providers.iter() {
            let record = entry.value().record();
            if !record.enabled {
                continue;
            }
            for model in &record.models {
                if !out.iter().any(|(m, _)| m == model) {
                    out.push((model.clone(), record.id.clone()));
                }
            }
        }
        out.sort();
        out
    }

    /// Record a successful attempt.
    pub fn record_success(
        &self,
        provider_id: &str,
        sub_provider_id: Option<&str>,
        latency_ms: u64,
        tokens_used: u32,
    ) {
        if let Some(provider) = self.provider(provider_id) {
            provider.on_success(latency_ms);
            self.emit_provider_gauges(&provider);
        }
        if let Some(sub) = sub_provider_id.and_then(|id| self.sub_provider(id)) {
            sub.on_success(latency_ms);
            gauge!(
                provider_metrics::CONSECUTIVE_ERRORS,
                labels::PROVIDER => provider_id.to_string(),
                labels::SUB_PROVIDER => sub.id().to_string()
            )
            .set(0.0);
        }
        counter!(
            provider_metrics::REQUESTS_TOTAL,
            labels::PROVIDER => provider_id.to_string(),
            labels::STATUS => "success"
        )
        .increment(1);
        counter!(
            provider_metrics::TOKENS_TOTAL,
            labels::PROVIDER => provider_id.to_string()
        )
        .increment(u64::from(tokens_used));
    }

    /// Classify and record a failed attempt. Excluded-class failures touch
    /// neither counters nor the breaker.
    pub fn record_error(
        &self,
        provider_id: &str,
        sub_provider_id: Option<&str>,
        message: &str,
    ) -> Classification {
        let classification = classify(message);
        warn!(
            provider = provider_id,
            sub_provider = sub_provider_id.unwrap_or("-"),
            class = ?classification.class,
            pattern = classification.matched_pattern.unwrap_or("-"),
            error = message,
            "upstream attempt failed"
        );

        if classification.class.records_failure() {
            let critical = classification.class == crate::classify::ErrorClass::Critical;
            if let Some(provider) = self.provider(provider_id) {
                provider.on_failure(critical);
                self.emit_provider_gauges(&provider);
            }
            if let Some(sub) = sub_provider_id.and_then(|id| self.sub_provider(id)) {
                sub.on_failure(self.classifier.max_consecutive_errors);
                gauge!(
                    provider_metrics::CONSECUTIVE_ERRORS,
                    labels::PROVIDER => provider_id.to_string(),
                    labels::SUB_PROVIDER => sub.id().to_string()
                )
                .set(f64::from(sub.consecutive_errors()));
            }
        }

        counter!(
            provider_metrics::REQUESTS_TOTAL,
            labels::PROVIDER => provider_id.to_string(),
            labels::STATUS => "error"
        )
        .increment(1);

        classification
    }

    fn emit_provider_gauges(&self, provider: &ProviderHandle) {
        let (p50, p95, p99) = provider.latency_snapshot();
        let id = provider.id().to_string();
        gauge!(provider_metrics::LATENCY_P50_MILLISECONDS, labels::PROVIDER => id.clone())
            .set(p50);
        gauge!(provider_metrics::LATENCY_P95_MILLISECONDS, labels::PROVIDER => id.clone())
            .set(p95);
        gauge!(provider_metrics::LATENCY_P99_MILLISECONDS, labels::PROVIDER => id.clone())
            .set(p99);
        gauge!(provider_metrics::HEALTH_STATUS, labels::PROVIDER => id)
            .set(provider.health_status().score());
    }
}
