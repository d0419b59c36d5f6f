//! Stateless weighted selection.
//!
//! Each call evaluates fresh metric snapshots; there are no sticky sessions
//! and a stale snapshot at worst yields a suboptimal (never unsafe) choice.

use std::sync::Arc;

use {rand::Rng, tracing::debug};

use crate::{
    error::BalancerError,
    registry::{ProviderHandle, Registry, SubProviderHandle},
};

/// Fraction of top-scored providers kept before the weighted draw.
const PROVIDER_POOL_FRACTION: f64 = 0.3;

/// A selected upstream target.
#[derive(Clone)]
pub struct Selection {
    pub provider: Arc<ProviderHandle>,
    /// `None` when the provider serves traffic directly with its own key.
    pub sub_provider: Option<Arc<SubProviderHandle>>,
}

impl Selection {
    /// The sub-provider id, for logging and exclusion bookkeeping.
    #[must_use]
    pub fn sub_provider_id(&self) -> Option<&str> {
        self.sub_provider.as_deref().map(SubProviderHandle::id)
    }
}

pub struct LoadBalancer {
    registry: Arc<Registry>,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Pick a provider (and sub-provider when the provider pools keys) for
    /// one attempt at `model` with an estimated `est_tokens` cost.
    pub fn select(&self, model: &str, est_tokens: u32) -> Result<Selection, BalancerError> {
        let mut candidates: Vec<(Arc<ProviderHandle>, f64)> = self
            .registry
            .providers()
            .into_iter()
            .filter(|p| p.is_selectable(model))
            .map(|p| {
                let score = p.score();
                (p, score)
            })
            .collect();

        if candidates.is_empty() {
            return Err(BalancerError::NoProvidersAvailable {
                model: model.to_string(),
            });
        }

        // Keep the top 30% by score (at least one), then draw weighted.
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(pool_size(candidates.len()));

        let provider = Arc::clone(&candidates[weighted_pick(&candidates)].0);
        debug!(provider = provider.id(), model, "provider selected");

        if !provider.record().needs_sub_providers {
            return Ok(Selection {
                provider,
                sub_provider: None,
            });
        }

        let subs: Vec<(Arc<SubProviderHandle>, f64)> = self
            .registry
            .sub_providers_of(provider.id())
            .into_iter()
            .filter(|s| {
                s.is_available() && s.gate().can_handle(est_tokens) && s.record().supports_model(model)
            })
            .map(|s| {
                let score = s.score(est_tokens);
                (s, score)
            })
            .collect();

        if subs.is_empty() {
            return Err(BalancerError::NoSubProvidersAvailable {
                provider: provider.id().to_string(),
            });
        }

        let sub = Arc::clone(&subs[weighted_pick(&subs)].0);
        debug!(
            provider = provider.id(),
            sub_provider = sub.id(),
            model,
            "sub-provider selected"
        );

        Ok(Selection {
            provider,
            sub_provider: Some(sub),
        })
    }
}

/// Providers retained for the weighted draw: top 30%, at least one.
fn pool_size(candidates: usize) -> usize {
    ((candidates as f64 * PROVIDER_POOL_FRACTION).ceil() as usize).max(1)
}

/// Weighted random pick: draw `r ∈ [0, Σw)` and walk the list subtracting
/// weights until it goes negative. A zero total falls back to the first
/// candidate, and a single candidate is returned deterministically.
fn weighted_pick<T>(candidates: &[(T, f64)]) -> usize {
    if candidates.len() == 1 {
        return 0;
    }
    let total: f64 = candidates.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        return 0;
    }
    let mut r = rand::rng().random_range(0.0..total);
    for (i, (_, w)) in candidates.iter().enumerate() {
        r -= w.max(0.0);
        if r < 0.0 {
            return i;
        }
    }
    candidates.len() - 1
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::classify::ClassifierConfig,
        std::collections::HashMap,
        switchyard_store::{
            Capabilities, HealthStatus, ProviderRecord, SubProviderLimits, SubProviderRecord,
        },
        switchyard_vault::SealedKey,
    };

    fn provider(id: &str, models: &[&str], needs_subs: bool) -> ProviderRecord {
        ProviderRecord {
            id: id.into(),
            name: id.into(),
            base_url: format!("https://{id}.example.com"),
            enabled: true,
            needs_sub_providers: needs_subs,
            models: models.iter().map(|m| m.to_string()).collect(),
            capabilities: Capabilities::all(),
            api_key: None,
            requests_per_minute: None,
            health_status: HealthStatus::Healthy,
        }
    }

    fn sub(id: &str, provider_id: &str, max_concurrent: u32) -> SubProviderRecord {
        SubProviderRecord {
            id: id.into(),
            provider_id: provider_id.into(),
            name: id.into(),
            enabled: true,
            priority: 0,
            weight: 1.0,
            api_key: SealedKey {
                key_material: String::new(),
                iv: String::new(),
                ciphertext: String::new(),
            },
            model_mapping: HashMap::new(),
            limits: SubProviderLimits {
                max_concurrent_requests: max_concurrent,
                ..SubProviderLimits::default()
            },
        }
    }

    fn balancer(providers: Vec<ProviderRecord>, subs: Vec<SubProviderRecord>) -> LoadBalancer {
        let registry = Arc::new(Registry::new(ClassifierConfig::default()));
        registry.load(providers, subs);
        LoadBalancer::new(registry)
    }

    #[test]
    fn empty_registry_is_no_providers() {
        let lb = balancer(vec![], vec![]);
        assert!(matches!(
            lb.select("gpt-4o", 100),
            Err(BalancerError::NoProvidersAvailable { .. })
        ));
    }

    #[test]
    fn unsupported_model_is_no_providers() {
        let lb = balancer(
            vec![provider("openai", &["gpt-4o"], true)],
            vec![sub("sub-1", "openai", 10)],
        );
        assert!(matches!(
            lb.select("claude-sonnet-4", 100),
            Err(BalancerError::NoProvidersAvailable { .. })
        ));
    }

    #[test]
    fn single_candidate_is_deterministic() {
        let lb = balancer(
            vec![provider("openai", &["gpt-4o"], true)],
            vec![sub("sub-1", "openai", 10)],
        );
        for _ in 0..20 {
            let sel = lb.select("gpt-4o", 100).unwrap();
            assert_eq!(sel.provider.id(), "openai");
            assert_eq!(sel.sub_provider_id(), Some("sub-1"));
        }
    }

    #[test]
    fn provider_without_subs_selected_directly() {
        let lb = balancer(vec![provider("perplexity", &["sonar"], false)], vec![]);
        let sel = lb.select("sonar", 50).unwrap();
        assert_eq!(sel.provider.id(), "perplexity");
        assert!(sel.sub_provider.is_none());
    }

    #[test]
    fn pooled_provider_without_subs_is_no_sub_providers() {
        let lb = balancer(vec![provider("openai", &["gpt-4o"], true)], vec![]);
        assert!(matches!(
            lb.select("gpt-4o", 100),
            Err(BalancerError::NoSubProvidersAvailable { .. })
        ));
    }

    #[test]
    fn saturated_sub_is_filtered() {
        let lb = balancer(
            vec![provider("openai", &["gpt-4o"], true)],
            vec![sub("sub-1", "openai", 1)],
        );
        let sel = lb.select("gpt-4o", 10).unwrap();
        let gate = sel.sub_provider.as_ref().unwrap().gate();
        assert!(gate.reserve(10));

        // One in flight with max_concurrent = 1: next selection refuses.
        assert!(matches!(
            lb.select("gpt-4o", 10),
            Err(BalancerError::NoSubProvidersAvailable { .. })
        ));
        gate.release();
        assert!(lb.select("gpt-4o", 10).is_ok());
    }

    #[test]
    fn open_breaker_excludes_sub() {
        let registry = Arc::new(Registry::new(ClassifierConfig::default()));
        registry.load(
            vec![provider("openai", &["gpt-4o"], true)],
            vec![sub("sub-1", "openai", 10)],
        );
        for _ in 0..10 {
            registry.record_error("openai", Some("sub-1"), "connection reset");
        }
        let lb = LoadBalancer::new(registry);
        assert!(matches!(
            lb.select("gpt-4o", 10),
            Err(BalancerError::NoSubProvidersAvailable { .. })
        ));
    }

    #[test]
    fn weighted_pick_zero_total_returns_first() {
        let candidates = vec![("a", 0.0), ("b", 0.0)];
        assert_eq!(weighted_pick(&candidates), 0);
    }

    #[test]
    fn weighted_pick_single() {
        let candidates = vec![("only", 0.42)];
        assert_eq!(weighted_pick(&candidates), 0);
    }

    #[test]
    fn weighted_pick_respects_weights() {
        // With weights 1000:1 the heavy candidate should dominate.
        let candidates = vec![("heavy", 1000.0), ("light", 1.0)];
        let heavy_hits = (0..200)
            .filter(|_| weighted_pick(&candidates) == 0)
            .count();
        assert!(heavy_hits > 150);
    }

    #[test]
    fn disabled_provider_filtered() {
        let mut p = provider("openai", &["gpt-4o"], true);
        p.enabled = false;
        let lb = balancer(vec![p], vec![sub("sub-1", "openai", 10)]);
        assert!(matches!(
            lb.select("gpt-4o", 10),
            Err(BalancerError::NoProvidersAvailable { .. })
        ));
    }

    #[test]
    fn pool_keeps_top_third_with_floor_of_one() {
        assert_eq!(pool_size(1), 1);
        assert_eq!(pool_size(2), 1);
        assert_eq!(pool_size(3), 1);
        assert_eq!(pool_size(4), 2);
        assert_eq!(pool_size(10), 3);
        assert_eq!(pool_size(11), 4);
    }
}
