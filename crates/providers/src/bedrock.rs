//! AWS Bedrock adapter for the Anthropic model family.
//!
//! Request/response translation is shared with the direct Anthropic adapter;
//! the differences are the invoke-style endpoints, bearer API-key auth, and
//! the binary EventStream framing on the streaming path. Decoded `chunk`
//! frames carry a base64 `bytes` field holding a regular Anthropic stream
//! event, which is routed through the same [`AnthropicStreamState`].

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as B64},
    futures::StreamExt,
    secrecy::ExposeSecret,
    tracing::debug,
};

use switchyard_protocol::ChatCompletionRequest;

use crate::{
    adapter::{AdapterConfig, ChatOutcome, ChunkStream, ProviderAdapter, execute, json_body},
    anthropic::{from_anthropic_response, to_anthropic_request},
    anthropic_stream::AnthropicStreamState,
    error::ProviderError,
    eventstream::{EventStreamDecoder, EventStreamMessage},
    shared_http_client,
};

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Build the invoke body: the Anthropic shape minus the fields Bedrock moves
/// into the URL (`model`) or implies by endpoint (`stream`), plus the
/// required `anthropic_version`.
#[must_use]
pub fn to_bedrock_request(request: &ChatCompletionRequest, upstream_model: &str) -> serde_json::Value {
    let mut body = to_anthropic_request(request, upstream_model, false);
    if let Some(obj) = body.as_object_mut() {
        obj.remove("model");
        obj.remove("stream");
        obj.insert(
            "anthropic_version".into(),
            serde_json::Value::String(BEDROCK_ANTHROPIC_VERSION.into()),
        );
    }
    body
}

/// Extract the inner Anthropic event from a decoded EventStream frame.
///
/// Returns `Ok(None)` for non-chunk events (initial-response, ping).
pub fn unwrap_chunk_event(
    message: &EventStreamMessage,
) -> Result<Option<serde_json::Value>, ProviderError> {
    match message.message_type() {
        Some("event") => {
            if message.event_type() != Some("chunk") {
                return Ok(None);
            }
            let envelope: serde_json::Value = serde_json::from_slice(&message.payload)
                .map_err(|e| ProviderError::Decode(format!("bedrock chunk envelope: {e}")))?;
            let encoded = envelope["bytes"]
                .as_str()
                .ok_or_else(|| ProviderError::Decode("bedrock chunk missing bytes".into()))?;
            let raw = B64
                .decode(encoded)
                .map_err(|e| ProviderError::Decode(format!("bedrock chunk base64: {e}")))?;
            let event = serde_json::from_slice(&raw)
                .map_err(|e| ProviderError::Decode(format!("bedrock chunk event: {e}")))?;
            Ok(Some(event))
        },
        Some("exception") => {
            let detail: serde_json::Value =
                serde_json::from_slice(&message.payload).unwrap_or_default();
            let text = detail["message"].as_str().unwrap_or("unknown");
            Err(ProviderError::InvalidResponse(format!(
                "bedrock {}: {text}",
                message.exception_type().unwrap_or("exception")
            )))
        },
        other => Err(ProviderError::Decode(format!(
            "bedrock frame with message-type {other:?}"
        ))),
    }
}

pub struct BedrockAdapter {
    config: AdapterConfig,
}

impl BedrockAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn invoke_url(&self, model: &str, stream: bool) -> String {
        let action = if stream {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        format!("{}/model/{model}/{action}", self.config.trimmed_base())
    }

    fn stream_chunks(&self, response: reqwest::Response, model: String) -> ChunkStream {
        let idle_timeout = self.config.timeout;
        Box::pin(async_stream::stream! {
            let mut decoder = EventStreamDecoder::default();
            let mut state = AnthropicStreamState::new(model);
            let mut body = response.bytes_stream();

            loop {
                let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Err(ProviderError::StreamIdle {
                            seconds: idle_timeout.as_secs(),
                        });
                        return;
                    },
                };
                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield Err(ProviderError::Network(e.to_string()));
                        return;
                    },
                    None => return,
                };

                let messages = match decoder.feed(&bytes) {
                    Ok(messages) => messages,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };

                for message in messages {
                    let event = match unwrap_chunk_event(&message) {
                        Ok(Some(event)) => event,
                        Ok(None) => continue,
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    };
                    let is_stop = event["type"].as_str() == Some("message_stop");
                    match state.process(&event) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        },
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    }
                    if is_stop {
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for BedrockAdapter {
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
        let body = to_bedrock_request(&request, &request.model);
        debug!(model = %request.model, stream, "bedrock chat completion");

        let http = shared_http_client()
            .post(self.invoke_url(&request.model, stream))
            .bearer_auth(self.config.api_key.expose_secret())
            .header("accept", "application/json")
            .json(&body);
        let response = execute(
            &self.config.provider_id,
            "chat_completion",
            self.config.timeout,
            http,
        )
        .await?;

        if stream {
            Ok(ChatOutcome::Stream(
                self.stream_chunks(response, request.model.clone()),
            ))
        } else {
            let value: serde_json::Value = json_body(response).await?;
            Ok(ChatOutcome::Buffered(from_anthropic_response(
                &value,
                &request.model,
            )?))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::eventstream::tests::encode_frame,
        switchyard_protocol::{ChatMessage, Role},
    };

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "anthropic.claude-sonnet-4".into(),
            messages: vec![ChatMessage::text(Role::User, "hi")],
            temperature: None,
            top_p: None,
            n: None,
            stream: None,
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

    #[test]
    fn bedrock_body_has_version_but_no_model() {
        let body = to_bedrock_request(&request(), "anthropic.claude-sonnet-4");
        assert_eq!(body["anthropic_version"], BEDROCK_ANTHROPIC_VERSION);
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn chunk_frame_unwraps_to_anthropic_event() {
        let inner = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "hey"}
        });
        let envelope =
            serde_json::json!({ "bytes": B64.encode(serde_json::to_vec(&inner).unwrap()) });
        let frame = encode_frame(
            &[(":message-type", "event"), (":event-type", "chunk")],
            &serde_json::to_vec(&envelope).unwrap(),
        );

        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&frame).unwrap();
        let event = unwrap_chunk_event(&messages[0]).unwrap().unwrap();
        assert_eq!(event["delta"]["text"], "hey");
    }

    #[test]
    fn non_chunk_event_is_skipped() {
        let frame = encode_frame(
            &[(":message-type", "event"), (":event-type", "initial-response")],
            b"{}",
        );
        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&frame).unwrap();
        assert!(unwrap_chunk_event(&messages[0]).unwrap().is_none());
    }

    #[test]
    fn exception_frame_surfaces_message() {
        let frame = encode_frame(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"Too many requests, please wait"}"#,
        );
        let mut decoder = EventStreamDecoder::default();
        let messages = decoder.feed(&frame).unwrap();
        let err = unwrap_chunk_event(&messages[0]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("throttlingException"));
        assert!(text.contains("Too many requests"));
    }
}
