//! OpenAI adapter: the only vendor serving all seven operations.

use {bytes::Bytes, reqwest::multipart, secrecy::ExposeSecret, tracing::debug};

use switchyard_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse,
    ImageEditRequest, ImageGenerationRequest, ImageResponse, ModerationRequest,
    ModerationResponse, SpeechRequest, TranscriptionRequest, TranscriptionResponse,
};

use crate::{
    adapter::{AdapterConfig, ChatOutcome, ProviderAdapter, execute, json_body},
    error::ProviderError,
    shared_http_client,
    sse::openai_chunk_stream,
};

pub struct OpenAiAdapter {
    config: AdapterConfig,
}

impl OpenAiAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.trimmed_base())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(self.config.api_key.expose_secret())
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let request = self.authorized(shared_http_client().post(self.url(path))).json(body);
        let response = execute(&self.config.provider_id, operation, self.config.timeout, request)
            .await?;
        json_body(response).await
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(model = %request.model, stream, "openai chat completion");

        let http = self
            .authorized(shared_http_client().post(self.url("/chat/completions")))
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

    async fn text_to_speech(&self, request: SpeechRequest) -> Result<Bytes, ProviderError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let http = self
            .authorized(shared_http_client().post(self.url("/audio/speech")))
            .json(&body);
        let response = execute(
            &self.config.provider_id,
            "text_to_speech",
            self.config.timeout,
            http,
        )
        .await?;
        response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    async fn audio_transcription(
        &self,
        request: TranscriptionRequest,
    ) -> Result<TranscriptionResponse, ProviderError> {
        let path = if request.translate {
            "/audio/translations"
        } else {
            "/audio/transcriptions"
        };

        let file = multipart::Part::bytes(request.file_bytes).file_name(request.file_name);
        let mut form = multipart::Form::new()
            .part("file", file)
            .text("model", request.model);
        if let Some(language) = request.language {
            form = form.text("language", language);
        }
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }
        if let Some(format) = request.response_format {
            form = form.text("response_format", format);
        }
        if let Some(temperature) = request.temperature {
            form = form.text("temperature", temperature.to_string());
        }

        let http = self
            .authorized(shared_http_client().post(self.url(path)))
            .multipart(form);
        let response = execute(
            &self.config.provider_id,
            "audio_transcription",
            self.config.timeout,
            http,
        )
        .await?;
        json_body(response).await
    }

    async fn create_embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        self.post_json("/embeddings", "create_embeddings", &body).await
    }

    async fn generate_images(
        &self,
        request: ImageGenerationRequest,
    ) -> Result<ImageResponse, ProviderError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        self.post_json("/images/generations", "generate_images", &body)
            .await
    }

    async fn edit_images(&self, request: ImageEditRequest) -> Result<ImageResponse, ProviderError> {
        let image = multipart::Part::bytes(request.image).file_name(request.image_name);
        let mut form = multipart::Form::new()
            .part("image", image)
            .text("prompt", request.prompt);
        if let Some(model) = request.model {
            form = form.text("model", model);
        }
        if let Some(mask) = request.mask {
            form = form.part("mask", multipart::Part::bytes(mask).file_name("mask.png"));
        }
        if let Some(n) = request.n {
            form = form.text("n", n.to_string());
        }
        if let Some(size) = request.size {
            form = form.text("size", size);
        }
        if let Some(format) = request.response_format {
            form = form.text("response_format", format);
        }

        let http = self
            .authorized(shared_http_client().post(self.url("/images/edits")))
            .multipart(form);
        let response = execute(
            &self.config.provider_id,
            "edit_images",
            self.config.timeout,
            http,
        )
        .await?;
        json_body(response).await
    }

    async fn moderate_content(
        &self,
        request: ModerationRequest,
    ) -> Result<ModerationResponse, ProviderError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        self.post_json("/moderations", "moderate_content", &body).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{Json, Router, routing::post},
        secrecy::SecretString,
        std::time::Duration,
        switchyard_protocol::{ChatMessage, Role},
        switchyard_store::Capabilities,
        tokio::net::TcpListener,
    };

    async fn mock_server(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn adapter(base_url: String) -> OpenAiAdapter {
        OpenAiAdapter::new(AdapterConfig {
            provider_id: "openai".into(),
            name: "openai-test".into(),
            base_url,
            api_key: SecretString::new("sk-test".into()),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            requests_per_minute: None,
            supported_models: vec!["gpt-4o-mini".into()],
            capabilities: Capabilities::all(),
        })
        .unwrap()
    }

    fn chat_request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::text(Role::User, "Hi")],
            temperature: None,
            top_p: None,
            n: None,
            stream: Some(stream),
            stop: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            reasoning_effort: None,
            user: None,
        }
    }

    #[tokio::test]
    async fn buffered_chat_round_trip() {
        let base = mock_server(Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-4o-mini",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "Hello!"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
                }))
            }),
        ))
        .await;

        let outcome = adapter(base).chat_completion(chat_request(false)).await.unwrap();
        match outcome {
            ChatOutcome::Buffered(resp) => {
                assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
                assert_eq!(resp.usage.unwrap().total_tokens, 5);
            },
            ChatOutcome::Stream(_) => panic!("expected buffered response"),
        }
    }

    #[tokio::test]
    async fn streaming_chat_decodes_sse() {
        use tokio_stream::StreamExt as _;

        let base = mock_server(Router::new().route(
            "/chat/completions",
            post(|| async {
                let body = concat!(
                    "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
                    "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
                    "data: [DONE]\n\n",
                );
                ([("content-type", "text/event-stream")], body)
            }),
        ))
        .await;

        let outcome = adapter(base).chat_completion(chat_request(true)).await.unwrap();
        let ChatOutcome::Stream(mut stream) = outcome else {
            panic!("expected stream");
        };
        let mut text = String::new();
        let mut finish = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if let Some(delta) = chunk.content_delta() {
                text.push_str(delta);
            }
            if let Some(reason) = chunk.finish_reason() {
                finish = Some(reason.to_string());
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(finish.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn upstream_error_carries_status_and_body() {
        let base = mock_server(Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    http::StatusCode::TOO_MANY_REQUESTS,
                    "{\"error\":{\"message\":\"Rate limit reached\"}}",
                )
            }),
        ))
        .await;

        let err = adapter(base)
            .chat_completion(chat_request(false))
            .await
            .unwrap_err();
        match err {
            ProviderError::Http { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("Rate limit reached"));
            },
            other => panic!("unexpected error {other}"),
        }
    }
}
