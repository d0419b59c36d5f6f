//! Google Gemini adapter.
//!
//! Chat uses `generateContent` / `streamGenerateContent?alt=sse`, embeddings
//! use `batchEmbedContents`, images use the Imagen `:predict` endpoint with
//! aspect ratios. System messages collapse into `systemInstruction`, roles
//! map `user|assistant → user|model`, tool responses become
//! `functionResponse` user turns, and safety is pinned to `BLOCK_NONE` for
//! every harm category (filtering is the gateway's moderation pre-check, not
//! the vendor's).

use {futures::StreamExt, secrecy::ExposeSecret, serde_json::json, tracing::debug};

use switchyard_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ChunkDelta, ContentPart, EmbeddingData,
    EmbeddingRequest, EmbeddingResponse, FunctionCallDelta, ImageData, ImageGenerationRequest,
    ImageResponse, MessageContent, ResponseMessage, Role, StreamChunk, ToolCall, ToolCallDelta,
    Usage, unix_now,
};

use crate::{
    adapter::{AdapterConfig, ChatOutcome, ChunkStream, ProviderAdapter, execute, json_body},
    anthropic::thinking_budget,
    error::ProviderError,
    shared_http_client,
    sse::{SseDecoder, SseFrame},
};

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn safety_settings() -> serde_json::Value {
    serde_json::Value::Array(
        HARM_CATEGORIES
            .iter()
            .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
            .collect(),
    )
}

fn gemini_parts(content: &MessageContent) -> Vec<serde_json::Value> {
    match content {
        MessageContent::Text(text) => vec![json!({"text": text})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"text": text}),
                ContentPart::ImageUrl { image_url } => image_part(&image_url.url),
            })
            .collect(),
    }
}

/// Data URLs inline as `inlineData`; http(s) URLs reference as `fileData`.
fn image_part(url: &str) -> serde_json::Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((mime_type, data)) = rest.split_once(";base64,")
    {
        return json!({"inlineData": {"mimeType": mime_type, "data": data}});
    }
    json!({"fileData": {"fileUri": url}})
}

/// Build the `generateContent` body from a unified request.
#[must_use]
pub fn to_gemini_request(request: &ChatCompletionRequest) -> serde_json::Value {
    let mut system_parts: Vec<serde_json::Value> = Vec::new();
    let mut contents: Vec<serde_json::Value> = Vec::new();

    for msg in &request.messages {
        match msg.role {
            role if role.is_system_like() => {
                if let Some(content) = &msg.content {
                    system_parts.push(json!({"text": content.flattened_text()}));
                }
            },
            Role::User => {
                let parts = msg.content.as_ref().map(gemini_parts).unwrap_or_default();
                contents.push(json!({"role": "user", "parts": parts}));
            },
            Role::Assistant => {
                let mut parts = msg.content.as_ref().map(gemini_parts).unwrap_or_default();
                for tc in msg.tool_calls.as_deref().unwrap_or_default() {
                    let args = serde_json::from_str::<serde_json::Value>(&tc.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    parts.push(json!({"functionCall": {"name": tc.function.name, "args": args}}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            },
            Role::Tool | Role::Function => {
                let response_text = msg
                    .content
                    .as_ref()
                    .map(MessageContent::flattened_text)
                    .unwrap_or_default();
                let response = serde_json::from_str::<serde_json::Value>(&response_text)
                    .unwrap_or_else(|_| json!({"result": response_text}));
                contents.push(json!({
                    "role": "user",
                    "parts": [{"functionResponse": {
                        "name": msg.name.as_deref().unwrap_or("tool"),
                        "response": response,
                    }}]
                }));
            },
            _ => {},
        }
    }

    let mut generation_config = json!({});
    if let Some(temperature) = request.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }
    if let Some(stop) = &request.stop {
        generation_config["stopSequences"] = match stop {
            serde_json::Value::String(s) => json!([s]),
            other => other.clone(),
        };
    }
    if let Some(effort) = request.reasoning_effort {
        generation_config["thinkingConfig"] =
            json!({"thinkingBudget": thinking_budget(effort)});
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
        "safetySettings": safety_settings(),
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({"parts": system_parts});
    }
    if let Some(tools) = &request.tools
        && !tools.is_empty()
    {
        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t["function"]["name"],
                    "description": t["function"]["description"],
                    "parameters": t["function"]["parameters"],
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    body
}

fn map_gemini_finish(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "content_filter",
        _ => "stop",
    }
}

fn gemini_usage(value: &serde_json::Value) -> Option<Usage> {
    let meta = value.get("usageMetadata")?;
    Some(Usage::new(
        meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
        meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
    ))
}

/// Translate a buffered `generateContent` response to the unified shape.
pub fn from_gemini_response(
    value: &serde_json::Value,
    model: &str,
) -> Result<ChatCompletionResponse, ProviderError> {
    let candidate = value["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::InvalidResponse("missing candidates".into()))?;

    let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<ToolCall> = parts
        .iter()
        .filter_map(|p| p.get("functionCall"))
        .enumerate()
        .map(|(i, fc)| ToolCall {
            id: format!("call_{i}"),
            kind: "function".into(),
            function: switchyard_protocol::FunctionCall {
                name: fc["name"].as_str().unwrap_or("").to_string(),
                arguments: fc["args"].to_string(),
            },
        })
        .collect();

    let finish_reason = candidate["finishReason"]
        .as_str()
        .map(|r| map_gemini_finish(r).to_string());

    Ok(ChatCompletionResponse::single(
        model,
        ResponseMessage {
            role: Role::Assistant,
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        },
        finish_reason,
        gemini_usage(value),
    ))
}

pub struct GoogleAdapter {
    config: AdapterConfig,
}

impl GoogleAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn model_url(&self, model: &str, action: &str, sse: bool) -> String {
        let query = if sse { "?alt=sse" } else { "" };
        format!(
            "{}/v1beta/models/{model}:{action}{query}",
            self.config.trimmed_base()
        )
    }

    fn stream_chunks(&self, response: reqwest::Response, model: String) -> ChunkStream {
        let idle_timeout = self.config.timeout;
        Box::pin(async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut body = response.bytes_stream();
            let mut tool_index: u32 = 0;

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

                for frame in decoder.feed(&bytes) {
                    let SseFrame::Data(data) = frame else {
                        return;
                    };
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&data) else {
                        continue;
                    };

                    let candidate = &event["candidates"][0];
                    if let Some(parts) = candidate["content"]["parts"].as_array() {
                        for part in parts {
                            if let Some(text) = part["text"].as_str()
                                && !text.is_empty()
                            {
                                yield Ok(StreamChunk::text(model.clone(), text));
                            }
                            if let Some(fc) = part.get("functionCall") {
                                let chunk = StreamChunk::new(
                                    model.clone(),
                                    ChunkDelta {
                                        tool_calls: Some(vec![ToolCallDelta {
                                            index: tool_index,
                                            id: Some(format!("call_{tool_index}")),
                                            kind: Some("function".into()),
                                            function: Some(FunctionCallDelta {
                                                name: fc["name"].as_str().map(str::to_string),
                                                arguments: Some(fc["args"].to_string()),
                                            }),
                                        }]),
                                        ..ChunkDelta::default()
                                    },
                                    None,
                                );
                                tool_index += 1;
                                yield Ok(chunk);
                            }
                        }
                    }

                    if let Some(reason) = candidate["finishReason"].as_str() {
                        let mut chunk = StreamChunk::finish(
                            model.clone(),
                            map_gemini_finish(reason),
                        );
                        chunk.usage = gemini_usage(&event);
                        yield Ok(chunk);
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GoogleAdapter {
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
        let body = to_gemini_request(&request);
        debug!(model = %request.model, stream, "gemini chat completion");

        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let http = shared_http_client()
            .post(self.model_url(&request.model, action, stream))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
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
            Ok(ChatOutcome::Buffered(from_gemini_response(
                &value,
                &request.model,
            )?))
        }
    }

    async fn create_embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        let model_path = format!("models/{}", request.model);
        let requests: Vec<serde_json::Value> = request
            .input
            .texts()
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": {"parts": [{"text": text}]},
                })
            })
            .collect();

        let http = shared_http_client()
            .post(self.model_url(&request.model, "batchEmbedContents", false))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&json!({"requests": requests}));
        let response = execute(
            &self.config.provider_id,
            "create_embeddings",
            self.config.timeout,
            http,
        )
        .await?;

        let value: serde_json::Value = json_body(response).await?;
        let embeddings = value["embeddings"]
            .as_array()
            .ok_or_else(|| ProviderError::InvalidResponse("missing embeddings".into()))?;
        let data = embeddings
            .iter()
            .enumerate()
            .map(|(index, e)| EmbeddingData {
                object: "embedding".into(),
                index: index as u32,
                embedding: e["values"]
                    .as_array()
                    .map(|v| {
                        v.iter()
                            .filter_map(serde_json::Value::as_f64)
                            .map(|f| f as f32)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        Ok(EmbeddingResponse {
            object: "list".into(),
            data,
            model: request.model,
            usage: None,
        })
    }

    async fn generate_images(
        &self,
        request: ImageGenerationRequest,
    ) -> Result<ImageResponse, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| "imagen-3.0-generate-002".to_string());
        let body = json!({
            "instances": [{"prompt": request.prompt}],
            "parameters": {
                "sampleCount": request.n.unwrap_or(1),
                "aspectRatio": request.aspect_ratio(),
            }
        });

        let http = shared_http_client()
            .post(self.model_url(&model, "predict", false))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&body);
        let response = execute(
            &self.config.provider_id,
            "generate_images",
            self.config.timeout,
            http,
        )
        .await?;

        let value: serde_json::Value = json_body(response).await?;
        let predictions = value["predictions"].as_array().cloned().unwrap_or_default();
        Ok(ImageResponse {
            created: unix_now(),
            data: predictions
                .iter()
                .map(|p| ImageData {
                    url: None,
                    b64_json: p["bytesBase64Encoded"].as_str().map(str::to_string),
                    revised_prompt: None,
                })
                .collect(),
        })
    }
}
