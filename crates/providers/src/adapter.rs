//! The adapter trait, its configuration, and shared HTTP plumbing.

use std::{pin::Pin, time::Duration};

use {
    async_trait::async_trait,
    bytes::Bytes,
    secrecy::SecretString,
    tokio_stream::Stream,
    tracing::{debug, warn},
};

use {
    switchyard_metrics::{counter, histogram, labels, upstream},
    switchyard_protocol::{
        ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
        ImageEditRequest, ImageGenerationRequest, ImageResponse, ModerationRequest,
        ModerationResponse, SpeechRequest, StreamChunk, TranscriptionRequest,
        TranscriptionResponse,
    },
    switchyard_store::Capabilities,
};

use crate::error::ProviderError;

/// Default upstream deadline when neither the caller nor the sub-provider
/// configuration narrows it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A lazy, single-consumer, finite sequence of unified stream chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A chat completion either arrives whole or as a stream of chunks.
pub enum ChatOutcome {
    Buffered(ChatCompletionResponse),
    Stream(ChunkStream),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(response) => f.debug_tuple("Buffered").field(response).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Construction-time configuration shared by every adapter.
#[derive(Clone)]
pub struct AdapterConfig {
    /// Provider family id ("openai", "anthropic", ...), used in logs/metrics.
    pub provider_id: String,
    /// Display name of the key slot this adapter serves.
    pub name: String,
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
    pub max_retries: u32,
    pub requests_per_minute: Option<u32>,
    pub supported_models: Vec<String>,
    pub capabilities: Capabilities,
}

impl AdapterConfig {
    /// Validate invariants every adapter relies on. Called from each
    /// adapter's constructor.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.provider_id.trim().is_empty() {
            return Err(ProviderError::Config("provider id is empty".into()));
        }
        if self.base_url.trim().is_empty() {
            return Err(ProviderError::Config("base URL is empty".into()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Config(format!("base URL `{}`: {e}", self.base_url)))?;
        if self.timeout.is_zero() {
            return Err(ProviderError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash, for path concatenation.
    #[must_use]
    pub fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// The seven capability operations every vendor adapter may implement.
///
/// Unsupported operations fall through to the default bodies, which return
/// the fixed [`ProviderError::NotSupported`] kind rather than panicking.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn chat_completion(
        &self,
        _request: ChatCompletionRequest,
    ) -> Result<ChatOutcome, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "chat_completion"))
    }

    async fn text_to_speech(&self, _request: SpeechRequest) -> Result<Bytes, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "text_to_speech"))
    }

    async fn audio_transcription(
        &self,
        _request: TranscriptionRequest,
    ) -> Result<TranscriptionResponse, ProviderError> {
        Err(ProviderError::not_supported(
            self.name(),
            "audio_transcription",
        ))
    }

    async fn create_embeddings(
        &self,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "create_embeddings"))
    }

    async fn generate_images(
        &self,
        _request: ImageGenerationRequest,
    ) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "generate_images"))
    }

    async fn edit_images(
        &self,
        _request: ImageEditRequest,
    ) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "edit_images"))
    }

    async fn moderate_content(
        &self,
        _request: ModerationRequest,
    ) -> Result<ModerationResponse, ProviderError> {
        Err(ProviderError::not_supported(self.name(), "moderate_content"))
    }
}

/// Send a prepared request with uniform logging, deadline, status handling,
/// and per-call metrics. All adapter HTTP goes through here.
pub(crate) async fn execute(
    provider_id: &str,
    operation: &'static str,
    timeout: Duration,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let start = std::time::Instant::now();
    debug!(provider = provider_id, operation, "upstream request start");

    let response = request.timeout(timeout).send().await.map_err(|e| {
        let mapped = ProviderError::from_reqwest(&e, timeout.as_secs());
        warn!(provider = provider_id, operation, error = %mapped, "upstream request failed");
        record_call(provider_id, operation, "transport_error", start);
        mapped
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(
            provider = provider_id,
            operation,
            status = status.as_u16(),
            body = %body,
            "upstream returned error status"
        );
        record_call(provider_id, operation, "http_error", start);
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        });
    }

    debug!(
        provider = provider_id,
        operation,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "upstream request ok"
    );
    record_call(provider_id, operation, "success", start);
    Ok(response)
}

fn record_call(provider_id: &str, operation: &'static str, status: &'static str, start: std::time::Instant) {
    counter!(
        upstream::REQUESTS_TOTAL,
        labels::PROVIDER => provider_id.to_string(),
        labels::ENDPOINT => operation,
        labels::STATUS => status
    )
    .increment(1);
    histogram!(
        upstream::DURATION_SECONDS,
        labels::PROVIDER => provider_id.to_string(),
        labels::ENDPOINT => operation
    )
    .record(start.elapsed().as_secs_f64());
}

/// Deserialize a JSON response body, mapping failures to `InvalidResponse`.
pub(crate) async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}
