//! OpenAI-shaped vendors (Mistral, Perplexity, xAI, OpenRouter, and any
//! custom endpoint speaking the same dialect).
//!
//! Messages are forwarded verbatim to `/chat/completions`; the differences
//! are per-vendor body quirks applied just before the send.

use {secrecy::ExposeSecret, tracing::debug};

use switchyard_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
};

use crate::{
    adapter::{AdapterConfig, ChatOutcome, ProviderAdapter, execute, json_body},
    error::ProviderError,
    shared_http_client,
    sse::openai_chunk_stream,
};

/// Body adjustments one vendor needs on top of the shared dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorQuirks {
    /// xAI rejects `presence_penalty`/`frequency_penalty`.
    pub strip_penalties: bool,
    /// Mistral takes `image_url` as a bare string, not an object.
    pub flatten_image_urls: bool,
    /// OpenRouter wants vendor-prefixed model ids.
    pub prefix_models: bool,
}

/// OpenRouter's fixed model-family prefix table: the first matching model-id
/// prefix decides the vendor namespace.
const OPENROUTER_PREFIXES: &[(&str, &str)] = &[
    ("gpt", "openai/"),
    ("o1", "openai/"),
    ("o3", "openai/"),
    ("o4", "openai/"),
    ("chatgpt", "openai/"),
    ("claude", "anthropic/"),
    ("gemini", "google/"),
    ("gemma", "google/"),
    ("mistral", "mistralai/"),
    ("mixtral", "mistralai/"),
    ("ministral", "mistralai/"),
    ("llama", "meta-llama/"),
    ("grok", "x-ai/"),
    ("deepseek", "deepseek/"),
    ("qwen", "qwen/"),
    ("sonar", "perplexity/"),
];

/// Prefix a bare model id with its OpenRouter vendor namespace. Ids that
/// already carry a namespace pass through untouched.
#[must_use]
pub fn openrouter_model(model: &str) -> String {
    if model.contains('/') {
        return model.to_string();
    }
    for (family, prefix) in OPENROUTER_PREFIXES {
        if model.starts_with(family) {
            return format!("{prefix}{model}");
        }
    }
    model.to_string()
}

pub struct CompatAdapter {
    config: AdapterConfig,
    quirks: VendorQuirks,
}

impl CompatAdapter {
    pub fn new(config: AdapterConfig, quirks: VendorQuirks) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config, quirks })
    }

    pub fn mistral(config: AdapterConfig) -> Result<Self, ProviderError> {
        Self::new(config, VendorQuirks {
            flatten_image_urls: true,
            ..VendorQuirks::default()
        })
    }

    pub fn perplexity(config: AdapterConfig) -> Result<Self, ProviderError> {
        Self::new(config, VendorQuirks::default())
    }

    pub fn xai(config: AdapterConfig) -> Result<Self, ProviderError> {
        Self::new(config, VendorQuirks {
            strip_penalties: true,
            ..VendorQuirks::default()
        })
    }

    pub fn openrouter(config: AdapterConfig) -> Result<Self, ProviderError> {
        Self::new(config, VendorQuirks {
            prefix_models: true,
            ..VendorQuirks::default()
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.trimmed_base())
    }

    fn build_body(&self, request: &ChatCompletionRequest) -> Result<serde_json::Value, ProviderError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if self.quirks.prefix_models {
            body["model"] = serde_json::Value::String(openrouter_model(&request.model));
        }
        if self.quirks.strip_penalties
            && let Some(obj) = body.as_object_mut()
        {
            obj.remove("presence_penalty");
            obj.remove("frequency_penalty");
        }
        if self.quirks.flatten_image_urls {
            flatten_image_urls(&mut body);
        }
        Ok(body)
    }
}

/// Rewrite `{"type":"image_url","image_url":{"url":U}}` parts to carry `U`
/// directly as the `image_url` value.
fn flatten_image_urls(body: &mut serde_json::Value) {
    let Some(messages) = body["messages"].as_array_mut() else {
        return;
    };
    for message in messages {
        let Some(parts) = message["content"].as_array_mut() else {
            continue;
        };
        for part in parts {
            if part["type"] == "image_url"
                && let Some(url) = part["image_url"]["url"].as_str()
            {
                part["image_url"] = serde_json::Value::String(url.to_string());
            }
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for CompatAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> switchyard_store::Capabilities {
        self.config.capabilities
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatOutcome, ProviderError> {
        let stream = request.wants_stream();
        let body = self.build_body(&request)?;
        debug!(
            provider = %self.config.provider_id,
            model = %request.model,
            stream,
            "openai-compatible chat completion"
        );

        let http = shared_http_client()
            .post(self.url("/chat/completions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body);
        let response = execute(
            &self.config.provider_id,
            "chat_completion",
            self.config.timeout,
            http,
        )
        .await?;

        if stream {
            Ok(ChatOutcome::Stream(openai_chunk_stream(
                response,
                self.config.timeout,
            )))
        } else {
            let parsed: ChatCompletionResponse = json_body(response).await?;
            Ok(ChatOutcome::Buffered(parsed))
        }
    }

    async fn create_embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let http = shared_http_client()
            .post(self.url("/embeddings"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body);
        let response = execute(
            &self.config.provider_id,
            "create_embeddings",
            self.config.timeout,
            http,
        )
        .await?;
        json_body(response).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        secrecy::SecretString,
        std::time::Duration,
        switchyard_protocol::{ChatMessage, ContentPart, ImageUrl, MessageContent, Role},
        switchyard_store::Capabilities,
    };

    fn config(provider_id: &str) -> AdapterConfig {
        AdapterConfig {
            provider_id: provider_id.into(),
            name: provider_id.into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: SecretString::new("key".into()),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            requests_per_minute: None,
            supported_models: vec![],
            capabilities: Capabilities::chat_only(),
        }
    }

    fn request_with_penalties() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "grok-3".into(),
            messages: vec![ChatMessage::text(Role::User, "hi")],
            temperature: None,
            top_p: None,
            n: None,
            stream: None,
            stop: None,
            max_tokens: None,
            presence_penalty: Some(0.5),
            frequency_penalty: Some(0.25),
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            reasoning_effort: None,
            user: None,
        }
    }

    #[test]
    fn openrouter_prefix_table() {
        assert_eq!(openrouter_model("gpt-4o"), "openai/gpt-4o");
        assert_eq!(openrouter_model("claude-sonnet-4"), "anthropic/claude-sonnet-4");
        assert_eq!(openrouter_model("gemini-2.0-flash"), "google/gemini-2.0-flash");
        assert_eq!(openrouter_model("mistral-large"), "mistralai/mistral-large");
        assert_eq!(openrouter_model("grok-3"), "x-ai/grok-3");
        assert_eq!(openrouter_model("sonar-pro"), "perplexity/sonar-pro");
        // Already namespaced: untouched.
        assert_eq!(openrouter_model("openai/gpt-4o"), "openai/gpt-4o");
        // Unknown family: passthrough.
        assert_eq!(openrouter_model("yi-large"), "yi-large");
    }

    #[test]
    fn xai_strips_penalties() {
        let adapter = CompatAdapter::xai(config("xai")).unwrap();
        let body = adapter.build_body(&request_with_penalties()).unwrap();
        assert!(body.get("presence_penalty").is_none());
        assert!(body.get("frequency_penalty").is_none());
        // Everything else is forwarded verbatim.
        assert_eq!(body["model"], "grok-3");
    }

    #[test]
    fn perplexity_forwards_verbatim() {
        let adapter = CompatAdapter::perplexity(config("perplexity")).unwrap();
        let body = adapter.build_body(&request_with_penalties()).unwrap();
        assert_eq!(body["presence_penalty"], 0.5);
    }

    #[test]
    fn mistral_flattens_image_url_objects() {
        let adapter = CompatAdapter::mistral(config("mistral")).unwrap();
        let mut request = request_with_penalties();
        request.messages = vec![ChatMessage {
            role: Role::User,
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "what is this".into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "https://example.com/x.png".into(),
                        detail: None,
                    },
                },
            ])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];

        let body = adapter.build_body(&request).unwrap();
        let part = &body["messages"][0]["content"][1];
        assert_eq!(part["type"], "image_url");
        assert_eq!(part["image_url"], "https://example.com/x.png");
    }

    #[test]
    fn openrouter_rewrites_model() {
        let adapter = CompatAdapter::openrouter(config("openrouter")).unwrap();
        let body = adapter.build_body(&request_with_penalties()).unwrap();
        assert_eq!(body["model"], "x-ai/grok-3");
    }
}
