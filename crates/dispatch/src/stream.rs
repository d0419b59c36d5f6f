//! The streaming fail-over machine.
//!
//! A caller-pull stream that transparently re-selects upstreams on
//! mid-stream failure: the client observes one logical stream (a suffix of
//! each upstream's deltas, across at most `max_attempts` upstreams).
//! Finalization — token estimate, credit debit, the single terminal
//! accounting write — runs exactly once on every path out: clean end,
//! exhausted fail-over, or client disconnect (the drop guard covers the
//! cancel path, spawning the terminal write since `Drop` cannot await).

use std::{
    collections::HashSet,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Instant,
};

use {
    futures::StreamExt,
    tokio::sync::oneshot,
    tokio_stream::Stream,
    tracing::{debug, warn},
};

use {
    switchyard_balancer::{LoadBalancer, Registry},
    switchyard_protocol::{ChatCompletionRequest, StreamChunk, Usage},
    switchyard_providers::{ChatOutcome, ChunkStream, ProviderError},
    switchyard_store::{AccountingStore, CompletionUpdate, FailureUpdate, UserStore},
};

use crate::{
    credits::{CreditSchedule, estimate_tokens},
    dispatcher::{AdapterSource, AttemptGuard, DispatchError, OperationKind},
};

/// The machine's outward stream type.
pub type MachineStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, DispatchError>> + Send>>;

/// A running stream plus the handle that resolves after finalization.
pub struct StreamOutcome {
    pub stream: MachineStream,
    pub finalization: FinalizationHandle,
}

/// Resolves once the post-response accounting task has committed.
pub struct FinalizationHandle(oneshot::Receiver<()>);

impl FinalizationHandle {
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

struct FinalizeState {
    request_id: String,
    user_id: String,
    model: String,
    prompt_tokens: u32,
    started: Instant,
    accumulated_chars: AtomicUsize,
    retries: AtomicU32,
    finalized: AtomicBool,
    accounting: Arc<dyn AccountingStore>,
    users: Arc<dyn UserStore>,
    schedule: CreditSchedule,
    notify: Mutex<Option<oneshot::Sender<()>>>,
}

impl FinalizeState {
    fn add_text(&self, text: &str) {
        self.accumulated_chars
            .fetch_add(text.chars().count(), Ordering::Relaxed);
    }

    /// Completion estimate: `ceil(accumulated chars / 4)`.
    fn completion_tokens(&self) -> u32 {
        (self.accumulated_chars.load(Ordering::Relaxed).div_ceil(4)) as u32
    }

    /// Run the one-shot finalization. Later calls (including the drop guard)
    /// are no-ops; the accounting store's terminal idempotence backs this up.
    fn finalize(self: &Arc<Self>, error: Option<String>) {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return;
        }
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let latency_ms = state.started.elapsed().as_millis() as u64;
            let completion_tokens = state.completion_tokens();
            let tokens_used = state.prompt_tokens + completion_tokens;
            let retry_count = state.retries.load(Ordering::Relaxed);

            let result = match error {
                None => {
                    let credits = state.schedule.token_credits(&state.model, tokens_used);
                    match state.users.decrement_credits(&state.user_id, credits).await {
                        Ok(true) => {},
                        Ok(false) => warn!(
                            user = %state.user_id,
                            credits,
                            "stream finished but balance was insufficient for debit"
                        ),
                        Err(e) => warn!(user = %state.user_id, error = %e, "credit debit failed"),
                    }
                    state
                        .accounting
                        .complete(&state.request_id, CompletionUpdate {
                            tokens_used,
                            credits_used: credits,
                            latency_ms,
                            response_size: state.accumulated_chars.load(Ordering::Relaxed) as u64,
                            status_code: 200,
                            retry_count,
                        })
                        .await
                },
                Some(message) => {
                    state
                        .accounting
                        .fail(&state.request_id, FailureUpdate {
                            status_code: 500,
                            error_message: message,
                            latency_ms,
                            retry_count,
                        })
                        .await
                },
            };
            if let Err(e) = result {
                warn!(request = %state.request_id, error = %e, "terminal accounting write failed");
            }
            debug!(request = %state.request_id, tokens_used, "stream finalized");

            let tx = match state.notify.lock() {
                Ok(mut slot) => slot.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(tx) = tx {
                let _ = tx.send(());
            }
        });
    }
}

/// Runs finalization when the stream is dropped before finishing (client
/// disconnect). A no-op on already-finalized streams.
struct FinalizeOnDrop {
    state: Arc<FinalizeState>,
}

impl Drop for FinalizeOnDrop {
    fn drop(&mut self) {
        self.state
            .finalize(Some("client disconnected before stream completion".into()));
    }
}

pub struct StreamMachine {
    registry: Arc<Registry>,
    adapters: Arc<dyn AdapterSource>,
    accounting: Arc<dyn AccountingStore>,
    users: Arc<dyn UserStore>,
    schedule: CreditSchedule,
}

impl StreamMachine {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        adapters: Arc<dyn AdapterSource>,
        accounting: Arc<dyn AccountingStore>,
        users: Arc<dyn UserStore>,
        schedule: CreditSchedule,
    ) -> Self {
        Self {
            registry,
            adapters,
            accounting,
            users,
            schedule,
        }
    }

    /// Start a streaming chat for an accepted request.
    #[must_use]
    pub fn run(
        &self,
        request_id: String,
        user_id: String,
        mut request: ChatCompletionRequest,
    ) -> StreamOutcome {
        request.stream = Some(true);

        let prompt_tokens = estimate_tokens(&request.prompt_text());
        let est_tokens = prompt_tokens + request.max_tokens.unwrap_or(1024);
        let (tx, rx) = oneshot::channel();

        let state = Arc::new(FinalizeState {
            request_id: request_id.clone(),
            user_id,
            model: request.model.clone(),
            prompt_tokens,
            started: Instant::now(),
            accumulated_chars: AtomicUsize::new(0),
            retries: AtomicU32::new(0),
            finalized: AtomicBool::new(false),
            accounting: Arc::clone(&self.accounting),
            users: Arc::clone(&self.users),
            schedule: self.schedule.clone(),
            notify: Mutex::new(Some(tx)),
        });

        let registry = Arc::clone(&self.registry);
        let adapters = Arc::clone(&self.adapters);
        let chunk_id = format!("chatcmpl-{request_id}");
        let model = request.model.clone();
        let max_attempts = OperationKind::Chat.max_attempts();
        let stream_state = Arc::clone(&state);

        let stream: MachineStream = Box::pin(async_stream::stream! {
            let _finalize_on_drop = FinalizeOnDrop {
                state: Arc::clone(&stream_state),
            };
            let balancer = LoadBalancer::new(Arc::clone(&registry));
            let mut excluded: HashSet<String> = HashSet::new();
            let mut attempt: u32 = 0;

            'upstreams: loop {
                // ── Selection phase ─────────────────────────────────────
                let (mut upstream, _guard, provider_id, sub_id, attempt_start) = loop {
                    if attempt >= max_attempts {
                        stream_state.finalize(Some(format!(
                            "All {max_attempts} provider attempts failed"
                        )));
                        yield Err(DispatchError::AttemptsExhausted {
                            attempts: max_attempts,
                        });
                        return;
                    }
                    attempt += 1;
                    if attempt > 1 {
                        stream_state.retries.fetch_add(1, Ordering::Relaxed);
                    }

                    let selection = match balancer.select(&model, est_tokens) {
                        Ok(selection) => selection,
                        Err(e) => {
                            stream_state.finalize(Some(e.to_string()));
                            yield Err(DispatchError::Balancer(e));
                            return;
                        },
                    };
                    let provider_id = selection.provider.id().to_string();
                    if excluded.contains(&provider_id) {
                        continue;
                    }

                    let Some(guard) =
                        AttemptGuard::reserve(selection.clone(), &adapters, est_tokens)
                    else {
                        registry.record_error(
                            &provider_id,
                            selection.sub_provider_id(),
                            "capacity reservation refused",
                        );
                        continue;
                    };
                    let sub_id = selection.sub_provider_id().map(str::to_string);
                    let attempt_start = Instant::now();

                    let mut upstream_request = request.clone();
                    if let Some(sub) = &selection.sub_provider {
                        upstream_request.model =
                            sub.record().upstream_model(&upstream_request.model);
                    }

                    let invoke = async {
                        let adapter = adapters.get_or_create(
                            selection.provider.record(),
                            selection.sub_provider.as_ref().map(|s| s.record()),
                        )?;
                        adapter.chat_completion(upstream_request).await
                    }
                    .await;

                    match invoke {
                        Ok(ChatOutcome::Stream(upstream)) => {
                            break (upstream, guard, provider_id, sub_id, attempt_start);
                        },
                        Ok(ChatOutcome::Buffered(response)) => {
                            // An adapter that ignored the stream flag; replay
                            // the whole response as chunks.
                            break (
                                buffered_as_stream(response),
                                guard,
                                provider_id,
                                sub_id,
                                attempt_start,
                            );
                        },
                        Err(e) => {
                            let classification = registry.record_error(
                                &provider_id,
                                sub_id.as_deref(),
                                &e.to_string(),
                            );
                            if classification.class.is_retryable() && attempt < max_attempts {
                                excluded.insert(provider_id);
                                continue;
                            }
                            stream_state.finalize(Some(e.to_string()));
                            yield Err(DispatchError::Upstream {
                                source: e,
                                class: classification.class,
                                attempts: attempt,
                            });
                            return;
                        },
                    }
                };

                // ── Forwarding phase ────────────────────────────────────
                loop {
                    match upstream.next().await {
                        Some(Ok(mut chunk)) => {
                            chunk.id = chunk_id.clone();
                            // The caller sees the model they asked for, not
                            // the mapped upstream id.
                            chunk.model = model.clone();
                            if let Some(text) = chunk.content_delta() {
                                stream_state.add_text(text);
                            }
                            yield Ok(chunk);
                        },
                        Some(Err(e)) => {
                            // Mid-stream failure: record it, skip this
                            // provider, and splice in a fresh upstream.
                            warn!(
                                provider = %provider_id,
                                error = %e,
                                "upstream failed mid-stream, re-selecting"
                            );
                            registry.record_error(
                                &provider_id,
                                sub_id.as_deref(),
                                &e.to_string(),
                            );
                            excluded.insert(provider_id.clone());
                            continue 'upstreams;
                        },
                        None => {
                            let latency_ms = attempt_start.elapsed().as_millis() as u64;
                            registry.record_success(
                                &provider_id,
                                sub_id.as_deref(),
                                latency_ms,
                                stream_state.prompt_tokens + stream_state.completion_tokens(),
                            );
                            stream_state.finalize(None);
                            return;
                        },
                    }
                }
            }
        });

        StreamOutcome {
            stream,
            finalization: FinalizationHandle(rx),
        }
    }
}

/// Replay a buffered response as a two-chunk stream (content, then finish).
fn buffered_as_stream(response: switchyard_protocol::ChatCompletionResponse) -> ChunkStream {
    let model = response.model.clone();
    let mut chunks: Vec<Result<StreamChunk, ProviderError>> = Vec::new();

    if let Some(choice) = response.choices.first() {
        if let Some(content) = &choice.message.content {
            chunks.push(Ok(StreamChunk::text(model.clone(), content.clone())));
        }
        let mut finish = StreamChunk::finish(
            model,
            choice.finish_reason.as_deref().unwrap_or("stop"),
        );
        finish.usage = response.usage.or(Some(Usage::default()));
        chunks.push(Ok(finish));
    }
    Box::pin(tokio_stream::iter(chunks))
}
