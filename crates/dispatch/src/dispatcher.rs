//! The fail-over retry loop for buffered operations.
//!
//! One loop serves every endpoint family; the operation closure performs the
//! actual adapter call. Exclusion is by provider id: once a provider fails
//! retryably it is skipped for the remainder of the request, even if a
//! sibling sub-provider might have served it.

use std::{
    collections::HashSet,
    sync::Arc,
    time::Instant,
};

use {thiserror::Error, tracing::debug};

use {
    switchyard_balancer::{
        BalancerError, ErrorClass, LoadBalancer, Registry, Selection,
    },
    switchyard_metrics::{counter, gauge, labels, dispatch as dispatch_metrics},
    switchyard_providers::{AdapterFactory, ProviderAdapter, ProviderError},
    switchyard_store::{ProviderRecord, SubProviderRecord},
};

/// Where the dispatcher obtains adapter instances.
///
/// [`AdapterFactory`] is the production implementation; tests substitute
/// scripted adapters behind the same seam.
pub trait AdapterSource: Send + Sync {
    fn get_or_create(
        &self,
        provider: &ProviderRecord,
        sub: Option<&SubProviderRecord>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;

    fn track_request(&self, key: &str);

    fn release_request(&self, key: &str);
}

impl AdapterSource for AdapterFactory {
    fn get_or_create(
        &self,
        provider: &ProviderRecord,
        sub: Option<&SubProviderRecord>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        AdapterFactory::get_or_create(self, provider, sub)
    }

    fn track_request(&self, key: &str) {
        AdapterFactory::track_request(self, key);
    }

    fn release_request(&self, key: &str) {
        AdapterFactory::release_request(self, key);
    }
}

/// Endpoint families, which set the attempt budget and accounting endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Chat,
    Embeddings,
    Images,
    Audio,
    Moderation,
}

impl OperationKind {
    /// Attempt budget: audio fails over half as often as the text families.
    #[must_use]
    pub fn max_attempts(self) -> u32 {
        match self {
            Self::Audio => 5,
            _ => 10,
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    /// The last attempt's upstream error, after classification.
    #[error("{source}")]
    Upstream {
        source: ProviderError,
        class: ErrorClass,
        attempts: u32,
    },

    #[error("All {attempts} provider attempts failed")]
    AttemptsExhausted { attempts: u32 },
}

impl DispatchError {
    /// Retry count for accounting (attempts beyond the first).
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Upstream { attempts, .. } | Self::AttemptsExhausted { attempts } => {
                attempts.saturating_sub(1)
            },
            Self::Balancer(_) => 0,
        }
    }
}

/// A successful dispatch with its attribution.
#[derive(Debug)]
pub struct DispatchSuccess<T> {
    pub value: T,
    pub provider_id: String,
    pub sub_provider_id: Option<String>,
    pub latency_ms: u64,
    pub attempts: u32,
}

impl<T> DispatchSuccess<T> {
    /// Retries beyond the first attempt.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Scope guard for one attempt's reservation.
///
/// Releasing on drop (not in an error branch) keeps the capacity invariant
/// on every exit path, panics included.
pub struct AttemptGuard {
    selection: Selection,
    adapters: Arc<dyn AdapterSource>,
    cache_key: String,
}

impl AttemptGuard {
    /// Reserve capacity for this selection. Returns `None` when the
    /// sub-provider's gate refuses.
    #[must_use]
    pub fn reserve(
        selection: Selection,
        adapters: &Arc<dyn AdapterSource>,
        est_tokens: u32,
    ) -> Option<Self> {
        if let Some(sub) = &selection.sub_provider
            && !sub.gate().reserve(est_tokens)
        {
            return None;
        }
        selection.provider.inc_concurrent();
        let cache_key = selection
            .sub_provider_id()
            .map_or_else(
                || format!("provider:{}", selection.provider.id()),
                str::to_string,
            );
        adapters.track_request(&cache_key);
        Some(Self {
            selection,
            adapters: Arc::clone(adapters),
            cache_key,
        })
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(sub) = &self.selection.sub_provider {
            sub.gate().release();
        }
        self.selection.provider.dec_concurrent();
        self.adapters.release_request(&self.cache_key);
    }
}

pub struct RetryDispatcher {
    balancer: LoadBalancer,
    registry: Arc<Registry>,
    adapters: Arc<dyn AdapterSource>,
}

impl RetryDispatcher {
    #[must_use]
    pub fn new(registry: Arc<Registry>, adapters: Arc<dyn AdapterSource>) -> Self {
        Self {
            balancer: LoadBalancer::new(Arc::clone(&registry)),
            registry,
            adapters,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn adapters(&self) -> &Arc<dyn AdapterSource> {
        &self.adapters
    }

    #[must_use]
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Run the attempt loop. `invoke` performs one adapter call and returns
    /// the value plus the tokens to attribute to the chosen sub-provider.
    pub async fn execute<T, F, Fut>(
        &self,
        kind: OperationKind,
        model: &str,
        est_tokens: u32,
        invoke: F,
    ) -> Result<DispatchSuccess<T>, DispatchError>
    where
        F: Fn(Arc<dyn ProviderAdapter>, Selection) -> Fut,
        Fut: Future<Output = Result<(T, u32), ProviderError>>,
    {
        let max_attempts = kind.max_attempts();
        let mut excluded: HashSet<String> = HashSet::new();

        gauge!(dispatch_metrics::QUEUE_SIZE).increment(1.0);
        let result = self
            .run_attempts(max_attempts, &mut excluded, model, est_tokens, invoke)
            .await;
        gauge!(dispatch_metrics::QUEUE_SIZE).decrement(1.0);
        result
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        max_attempts: u32,
        excluded: &mut HashSet<String>,
        model: &str,
        est_tokens: u32,
        invoke: F,
    ) -> Result<DispatchSuccess<T>, DispatchError>
    where
        F: Fn(Arc<dyn ProviderAdapter>, Selection) -> Fut,
        Fut: Future<Output = Result<(T, u32), ProviderError>>,
    {
        for attempt in 1..=max_attempts {
            let selection = self.balancer.select(model, est_tokens)?;
            let provider_id = selection.provider.id().to_string();

            if excluded.contains(&provider_id) {
                debug!(provider = %provider_id, attempt, "provider excluded, skipping attempt");
                continue;
            }

            let Some(guard) =
                AttemptGuard::reserve(selection.clone(), &self.adapters, est_tokens)
            else {
                self.registry.record_error(
                    &provider_id,
                    selection.sub_provider_id(),
                    "capacity reservation refused",
                );
                continue;
            };

            let sub_id = selection.sub_provider_id().map(str::to_string);
            let start = Instant::now();

            let attempt_result = async {
                let adapter = self
                    .adapters
                    .get_or_create(
                        selection.provider.record(),
                        selection.sub_provider.as_ref().map(|s| s.record()),
                    )?;
                invoke(adapter, selection.clone()).await
            }
            .await;

            match attempt_result {
                Ok((value, tokens_used)) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    self.registry.record_success(
                        &provider_id,
                        sub_id.as_deref(),
                        latency_ms,
                        tokens_used,
                    );
                    drop(guard);
                    return Ok(DispatchSuccess {
                        value,
                        provider_id,
                        sub_provider_id: sub_id,
                        latency_ms,
                        attempts: attempt,
                    });
                },
                Err(err) => {
                    let classification = self.registry.record_error(
                        &provider_id,
                        sub_id.as_deref(),
                        &err.to_string(),
                    );
                    drop(guard);

                    if classification.class.is_retryable() && attempt < max_attempts {
                        excluded.insert(provider_id);
                        continue;
                    }
                    counter!(
                        dispatch_metrics::ERRORS_TOTAL,
                        labels::ERROR_TYPE => format!("{:?}", classification.class)
                    )
                    .increment(1);
                    return Err(DispatchError::Upstream {
                        source: err,
                        class: classification.class,
                        attempts: attempt,
                    });
                },
            }
        }

        counter!(
            dispatch_metrics::ERRORS_TOTAL,
            labels::ERROR_TYPE => "AttemptsExhausted"
        )
        .increment(1);
        Err(DispatchError::AttemptsExhausted {
            attempts: max_attempts,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        secrecy::SecretString,
        std::sync::atomic::{AtomicU32, Ordering},
        switchyard_balancer::ClassifierConfig,
        switchyard_store::{
            Capabilities, HealthStatus, ProviderRecord, SubProviderLimits, SubProviderRecord,
        },
        switchyard_vault::KeySealer,
    };

    fn sealer() -> Arc<KeySealer> {
        Arc::new(KeySealer::new(SecretString::new("dispatch-test".into())))
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

    fn sub(id: &str, provider_id: &str, sealer: &KeySealer, max_concurrent: u32) -> SubProviderRecord {
        SubProviderRecord {
            id: id.into(),
            provider_id: provider_id.into(),
            name: id.into(),
            enabled: true,
            priority: 0,
            weight: 1.0,
            api_key: sealer.seal("sk-test"),
            model_mapping: Default::default(),
            limits: SubProviderLimits {
                max_concurrent_requests: max_concurrent,
                ..SubProviderLimits::default()
            },
        }
    }

    fn dispatcher(
        providers: Vec<ProviderRecord>,
        subs: Vec<SubProviderRecord>,
    ) -> RetryDispatcher {
        let registry = Arc::new(Registry::new(ClassifierConfig::default()));
        registry.load(providers, subs);
        let factory = Arc::new(AdapterFactory::new(sealer()));
        RetryDispatcher::new(registry, factory)
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("openai")],
            vec![sub("sub-1", "openai", &sealer, 10)],
        );

        let result = d
            .execute(OperationKind::Chat, "gpt-4o", 100, |_adapter, _sel| async {
                Ok(("hello", 42u32))
            })
            .await
            .unwrap();

        assert_eq!(result.value, "hello");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.retry_count(), 0);
        assert_eq!(result.provider_id, "openai");

        // Capacity fully released after the request.
        let sub = d.registry().sub_provider("sub-1").unwrap();
        assert_eq!(sub.gate().concurrent(), 0);
    }

    #[tokio::test]
    async fn retryable_error_excludes_provider_and_fails_over() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("flaky"), provider("stable")],
            vec![
                sub("sub-flaky", "flaky", &sealer, 10),
                sub("sub-stable", "stable", &sealer, 10),
            ],
        );

        let calls = AtomicU32::new(0);
        let result = d
            .execute(OperationKind::Chat, "gpt-4o", 100, |_adapter, sel| {
                let provider = sel.provider.id().to_string();
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if provider == "flaky" {
                        Err(ProviderError::Network("ETIMEDOUT".into()))
                    } else {
                        Ok(("ok", 10u32))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.provider_id, "stable");
        assert!(result.attempts >= 1);
        // Both gates drained regardless of path taken.
        for id in ["sub-flaky", "sub-stable"] {
            assert_eq!(d.registry().sub_provider(id).unwrap().gate().concurrent(), 0);
        }
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("a"), provider("b")],
            vec![sub("sub-a", "a", &sealer, 10), sub("sub-b", "b", &sealer, 10)],
        );

        let calls = AtomicU32::new(0);
        let err = d
            .execute(OperationKind::Chat, "gpt-4o", 100, |_adapter, _sel| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<((), u32), ProviderError>(ProviderError::Http {
                        status: 400,
                        body: "bad request".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry on 400");
        assert!(matches!(
            err,
            DispatchError::Upstream {
                class: ErrorClass::NonRetryable,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn single_attempt_budget_means_no_retry() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("only")],
            vec![sub("sub-1", "only", &sealer, 10)],
        );

        // Audio budget is 5; drive a retryable failure every time.
        let calls = AtomicU32::new(0);
        let err = d
            .execute(OperationKind::Audio, "gpt-4o", 10, |_adapter, _sel| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<((), u32), ProviderError>(ProviderError::Timeout { seconds: 30 }) }
            })
            .await
            .unwrap_err();

        // One real attempt; the excluded provider burns the remaining budget.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, DispatchError::AttemptsExhausted { attempts: 5 }));
        assert_eq!(err.to_string(), "All 5 provider attempts failed");
    }

    #[tokio::test]
    async fn reservation_refused_every_attempt_exhausts() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("openai")],
            vec![sub("sub-1", "openai", &sealer, 1)],
        );

        // Occupy the only concurrency slot.
        let sub_handle = d.registry().sub_provider("sub-1").unwrap();
        assert!(sub_handle.gate().reserve(1));

        let err = d
            .execute::<(), _, _>(OperationKind::Chat, "gpt-4o", 1, |_adapter, _sel| async {
                panic!("must never invoke: reservation cannot succeed")
            })
            .await
            .unwrap_err();

        // select() filters on can_handle, so the saturated sub vanishes from
        // the candidate set and selection itself reports unavailability.
        assert!(matches!(
            err,
            DispatchError::Balancer(BalancerError::NoSubProvidersAvailable { .. })
        ));
        sub_handle.gate().release();
    }

    #[tokio::test]
    async fn no_providers_maps_to_balancer_error() {
        let d = dispatcher(vec![], vec![]);
        let err = d
            .execute(OperationKind::Chat, "gpt-4o", 1, |_adapter, _sel| async {
                Ok(((), 0u32))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Balancer(BalancerError::NoProvidersAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn success_records_tokens_on_sub_provider_window() {
        let sealer = sealer();
        let d = dispatcher(
            vec![provider("openai")],
            vec![sub("sub-1", "openai", &sealer, 10)],
        );

        d.execute(OperationKind::Chat, "gpt-4o", 100, |_adapter, _sel| async {
            Ok(((), 64u32))
        })
        .await
        .unwrap();

        // The reservation estimate landed in the token window.
        let sub = d.registry().sub_provider("sub-1").unwrap();
        let (rpm, tpm) = sub.gate().observe_windows();
        assert_eq!(rpm, 1);
        assert_eq!(tpm, 100);
    }
}
