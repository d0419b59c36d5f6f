//! Adapter cache and lifecycle.
//!
//! This is the only place sub-provider keys exist in plaintext: the factory
//! opens the sealed key, hands it to the adapter constructor as a
//! `SecretString`, and caches the instance by sub-provider id. A background
//! sweeper evicts instances that have been idle for ten minutes with no
//! active requests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    tracing::{debug, info},
};

use {
    switchyard_store::{ProviderRecord, SubProviderRecord},
    switchyard_vault::KeySealer,
};

use crate::{
    adapter::{AdapterConfig, DEFAULT_TIMEOUT, ProviderAdapter},
    anthropic::AnthropicAdapter,
    bedrock::BedrockAdapter,
    error::ProviderError,
    google::GoogleAdapter,
    openai::OpenAiAdapter,
    openai_compat::{CompatAdapter, VendorQuirks},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const IDLE_EVICTION: Duration = Duration::from_secs(600);

struct AdapterEntry {
    adapter: Arc<dyn ProviderAdapter>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    request_count: AtomicU64,
}

impl AdapterEntry {
    fn touch(&self) {
        if let Ok(mut last) = self.last_used_at.lock() {
            *last = Instant::now();
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }
}

pub struct AdapterFactory {
    entries: DashMap<String, Arc<AdapterEntry>>,
    active: DashMap<String, Arc<AtomicU32>>,
    sealer: Arc<KeySealer>,
}

impl AdapterFactory {
    #[must_use]
    pub fn new(sealer: Arc<KeySealer>) -> Self {
        Self {
            entries: DashMap::new(),
            active: DashMap::new(),
            sealer,
        }
    }

    /// Cache key: the sub-provider id, or a provider-scoped key for
    /// providers that carry their own credential.
    #[must_use]
    pub fn cache_key(provider: &ProviderRecord, sub: Option<&SubProviderRecord>) -> String {
        match sub {
            Some(sub) => sub.id.clone(),
            None => format!("provider:{}", provider.id),
        }
    }

    /// Return the cached adapter for this slot, building (and caching) it on
    /// first use.
    pub fn get_or_create(
        &self,
        provider: &ProviderRecord,
        sub: Option<&SubProviderRecord>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let key = Self::cache_key(provider, sub);

        if let Some(entry) = self.entries.get(&key) {
            entry.touch();
            return Ok(Arc::clone(&entry.adapter));
        }

        let adapter = self.build_adapter(provider, sub)?;
        info!(
            provider = %provider.id,
            slot = %key,
            "adapter instance created"
        );
        let entry = Arc::new(AdapterEntry {
            adapter: Arc::clone(&adapter),
            created_at: Instant::now(),
            last_used_at: Mutex::new(Instant::now()),
            request_count: AtomicU64::new(1),
        });
        self.entries.insert(key, entry);
        Ok(adapter)
    }

    /// Explicit per-vendor registration; new families are added here, never
    /// discovered at runtime.
    fn build_adapter(
        &self,
        provider: &ProviderRecord,
        sub: Option<&SubProviderRecord>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let sealed = match sub {
            Some(sub) => &sub.api_key,
            None => provider.api_key.as_ref().ok_or_else(|| {
                ProviderError::Config(format!(
                    "provider {} pools no sub-providers but has no direct key",
                    provider.id
                ))
            })?,
        };
        let api_key = self
            .sealer
            .open(sealed)
            .map_err(|e| ProviderError::Config(format!("unsealing key: {e}")))?;

        let config = AdapterConfig {
            provider_id: provider.id.clone(),
            name: sub.map_or_else(|| provider.name.clone(), |s| s.name.clone()),
            base_url: provider.base_url.clone(),
            api_key,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 3,
            requests_per_minute: provider.requests_per_minute,
            supported_models: provider.models.clone(),
            capabilities: provider.capabilities,
        };

        let adapter: Arc<dyn ProviderAdapter> = match provider.id.to_ascii_lowercase().as_str() {
            "openai" | "azure-openai" => Arc::new(OpenAiAdapter::new(config)?),
            "anthropic" => Arc::new(AnthropicAdapter::new(config)?),
            "google" | "gemini" => Arc::new(GoogleAdapter::new(config)?),
            "bedrock" | "aws-bedrock" => Arc::new(BedrockAdapter::new(config)?),
            "mistral" => Arc::new(CompatAdapter::mistral(config)?),
            "perplexity" => Arc::new(CompatAdapter::perplexity(config)?),
            "xai" | "grok" => Arc::new(CompatAdapter::xai(config)?),
            "openrouter" => Arc::new(CompatAdapter::openrouter(config)?),
            // Unknown families speak the OpenAI dialect until told otherwise.
            _ => Arc::new(CompatAdapter::new(config, VendorQuirks::default())?),
        };
        Ok(adapter)
    }

    fn active_counter(&self, key: &str) -> Arc<AtomicU32> {
        Arc::clone(
            &self
                .active
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AtomicU32::new(0))),
        )
    }

    pub fn track_request(&self, key: &str) {
        self.active_counter(key).fetch_add(1, Ordering::AcqRel);
    }

    pub fn release_request(&self, key: &str) {
        let _ = self
            .active_counter(key)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    #[must_use]
    pub fn active_requests(&self, key: &str) -> u32 {
        self.active
            .get(key)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn cached_instances(&self) -> usize {
        self.entries.len()
    }

    /// Evict entries idle past the threshold with no requests in flight.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            entry.idle_for() <= IDLE_EVICTION || self.active_requests(key) > 0
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "adapter cache swept");
        }
        // Drop counters for slots that no longer have an instance.
        self.active.retain(|key, counter| {
            counter.load(Ordering::Acquire) > 0 || self.entries.contains_key(key)
        });
        evicted
    }

    /// Run the sweeper until the factory is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let factory = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(factory) = factory.upgrade() else {
                    return;
                };
                factory.sweep();
            }
        })
    }

    #[cfg(test)]
    fn backdate(&self, key: &str, age: Duration) {
        if let Some(entry) = self.entries.get(key)
            && let Ok(mut last) = entry.last_used_at.lock()
        {
            *last = Instant::now() - age;
        }
    }

    #[cfg(test)]
    fn request_count(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .map(|e| e.request_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        secrecy::SecretString,
        switchyard_store::{Capabilities, HealthStatus, SubProviderLimits},
    };

    fn sealer() -> Arc<KeySealer> {
        Arc::new(KeySealer::new(SecretString::new("factory-test-seed".into())))
    }

    fn provider(id: &str) -> ProviderRecord {
        ProviderRecord {
            id: id.into(),
            name: id.into(),
            base_url: "https://api.example.com/v1".into(),
            enabled: true,
            needs_sub_providers: true,
            models: vec!["gpt-4o".into()],
            capabilities: Capabilities::all(),
            api_key: None,
            requests_per_minute: None,
            health_status: HealthStatus::Healthy,
        }
    }

    fn sub(id: &str, provider_id: &str, sealer: &KeySealer) -> SubProviderRecord {
        SubProviderRecord {
            id: id.into(),
            provider_id: provider_id.into(),
            name: id.into(),
            enabled: true,
            priority: 0,
            weight: 1.0,
            api_key: sealer.seal("sk-live-abc"),
            model_mapping: Default::default(),
            limits: SubProviderLimits::default(),
        }
    }

    #[test]
    fn get_or_create_caches_by_sub_id() {
        let sealer = sealer();
        let factory = AdapterFactory::new(Arc::clone(&sealer));
        let provider = provider("openai");
        let sub = sub("sub-1", "openai", &sealer);

        let a = factory.get_or_create(&provider, Some(&sub)).unwrap();
        let b = factory.get_or_create(&provider, Some(&sub)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cached_instances(), 1);
        assert_eq!(factory.request_count("sub-1"), 2);
    }

    #[test]
    fn unknown_family_falls_back_to_openai_dialect() {
        let sealer = sealer();
        let factory = AdapterFactory::new(Arc::clone(&sealer));
        let provider = provider("deepinfra");
        let sub = sub("sub-1", "deepinfra", &sealer);
        assert!(factory.get_or_create(&provider, Some(&sub)).is_ok());
    }

    #[test]
    fn provider_without_subs_needs_direct_key() {
        let sealer = sealer();
        let factory = AdapterFactory::new(Arc::clone(&sealer));
        let mut record = provider("perplexity");
        record.needs_sub_providers = false;

        assert!(matches!(
            factory.get_or_create(&record, None),
            Err(ProviderError::Config(_))
        ));

        record.api_key = Some(sealer.seal("pplx-key"));
        assert!(factory.get_or_create(&record, None).is_ok());
        assert_eq!(factory.cached_instances(), 1);
    }

    #[test]
    fn track_release_clamps_at_zero() {
        let factory = AdapterFactory::new(sealer());
        factory.track_request("sub-1");
        factory.track_request("sub-1");
        assert_eq!(factory.active_requests("sub-1"), 2);
        factory.release_request("sub-1");
        factory.release_request("sub-1");
        factory.release_request("sub-1");
        assert_eq!(factory.active_requests("sub-1"), 0);
    }

    #[test]
    fn sweep_evicts_idle_instances_only() {
        let sealer = sealer();
        let factory = AdapterFactory::new(Arc::clone(&sealer));
        let provider = provider("openai");
        let idle = sub("idle", "openai", &sealer);
        let busy = sub("busy", "openai", &sealer);
        let fresh = sub("fresh", "openai", &sealer);

        factory.get_or_create(&provider, Some(&idle)).unwrap();
        factory.get_or_create(&provider, Some(&busy)).unwrap();
        factory.get_or_create(&provider, Some(&fresh)).unwrap();

        factory.backdate("idle", Duration::from_secs(1200));
        factory.backdate("busy", Duration::from_secs(1200));
        factory.track_request("busy");

        assert_eq!(factory.sweep(), 1);
        assert!(factory.entries.contains_key("busy"), "active entries survive");
        assert!(factory.entries.contains_key("fresh"), "fresh entries survive");
        assert!(!factory.entries.contains_key("idle"));
    }

    #[test]
    fn bad_seal_is_config_error() {
        let factory = AdapterFactory::new(sealer());
        let other = KeySealer::new(SecretString::new("different-seed".into()));
        let provider = provider("openai");
        let sub = sub("sub-1", "openai", &other);
        assert!(matches!(
            factory.get_or_create(&provider, Some(&sub)),
            Err(ProviderError::Config(_))
        ));
    }
}
