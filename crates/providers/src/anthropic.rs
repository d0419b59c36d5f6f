//! Anthropic messages-API adapter.
//!
//! Translation highlights: system/developer messages are hoisted into the
//! top-level `system` field, assistant tool calls become `tool_use` blocks,
//! `tool` results become user messages with `tool_result` blocks, consecutive
//! user messages are merged (the API rejects back-to-back user turns), and
//! `reasoning_effort` maps to a thinking budget with temperature forced to
//! 1.0.

use {futures::StreamExt, secrecy::ExposeSecret, serde_json::json, tracing::debug};

use switchyard_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, ContentPart, MessageContent, ReasoningEffort,
    ResponseMessage, Role, ToolCall, Usage,
};

use crate::{
    adapter::{AdapterConfig, ChatOutcome, ChunkStream, ProviderAdapter, execute, json_body},
    anthropic_stream::{AnthropicStreamState, map_finish_reason},
    error::ProviderError,
    shared_http_client,
    sse::{SseDecoder, SseFrame},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Thinking budget per requested effort.
#[must_use]
pub fn thinking_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 2048,
        ReasoningEffort::High => 4096,
    }
}

fn content_blocks(content: &MessageContent) -> Vec<serde_json::Value> {
    match content {
        MessageContent::Text(text) => vec![json!({"type": "text", "text": text})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({"type": "text", "text": text}),
                ContentPart::ImageUrl { image_url } => image_block(&image_url.url),
            })
            .collect(),
    }
}

/// `data:` URLs become inline base64 sources; anything else is a URL source.
fn image_block(url: &str) -> serde_json::Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media_type,
                "data": data,
            }
        });
    }
    json!({
        "type": "image",
        "source": {
            "type": "url",
            "url": url,
        }
    })
}

fn to_anthropic_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t["function"]["name"],
                "description": t["function"]["description"],
                "input_schema": t["function"]["parameters"],
            })
        })
        .collect()
}

fn to_anthropic_tool_choice(choice: &serde_json::Value) -> Option<serde_json::Value> {
    if let Some(kind) = choice.as_str() {
        return match kind {
            "auto" => Some(json!({"type": "auto"})),
            "required" => Some(json!({"type": "any"})),
            "none" => None,
            _ => None,
        };
    }
    choice["function"]["name"]
        .as_str()
        .map(|name| json!({"type": "tool", "name": name}))
}

/// Build the messages-API body from a unified request.
#[must_use]
pub fn to_anthropic_request(
    request: &ChatCompletionRequest,
    upstream_model: &str,
    stream: bool,
) -> serde_json::Value {
    let mut system_text: Option<String> = None;
    let mut messages: Vec<serde_json::Value> = Vec::new();

    for msg in &request.messages {
        match msg.role {
            role if role.is_system_like() => {
                let text = msg
                    .content
                    .as_ref()
                    .map(MessageContent::flattened_text)
                    .unwrap_or_default();
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{text}"),
                    None => text,
                });
            },
            Role::User => {
                let blocks = msg.content.as_ref().map(content_blocks).unwrap_or_default();
                push_user_blocks(&mut messages, blocks);
            },
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(content) = &msg.content {
                    let text = content.flattened_text();
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                for tc in msg.tool_calls.as_deref().unwrap_or_default() {
                    let input = serde_json::from_str::<serde_json::Value>(&tc.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.function.name,
                        "input": input,
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            },
            Role::Tool | Role::Function => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
                    "content": msg
                        .content
                        .as_ref()
                        .map(MessageContent::flattened_text)
                        .unwrap_or_default(),
                });
                push_user_blocks(&mut messages, vec![block]);
            },
            _ => {},
        }
    }

    let mut max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let mut body = json!({
        "model": upstream_model,
        "messages": messages,
    });

    if let Some(system) = system_text {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &request.stop {
        body["stop_sequences"] = match stop {
            serde_json::Value::String(s) => json!([s]),
            other => other.clone(),
        };
    }
    if let Some(tools) = &request.tools
        && !tools.is_empty()
    {
        body["tools"] = serde_json::Value::Array(to_anthropic_tools(tools));
        if let Some(choice) = request
            .tool_choice
            .as_ref()
            .and_then(to_anthropic_tool_choice)
        {
            body["tool_choice"] = choice;
        }
    }

    if let Some(effort) = request.reasoning_effort {
        let budget = thinking_budget(effort);
        // Extended thinking demands temperature 1.0 and headroom above the
        // budget for the visible answer.
        max_tokens = max_tokens.max(budget + 1024);
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        body["temperature"] = json!(1.0);
    }

    body["max_tokens"] = json!(max_tokens);
    if stream {
        body["stream"] = json!(true);
    }
    body
}

/// Merge into the previous user message instead of appending a sibling.
fn push_user_blocks(messages: &mut Vec<serde_json::Value>, blocks: Vec<serde_json::Value>) {
    if let Some(last) = messages.last_mut()
        && last["role"] == "user"
        && let Some(existing) = last["content"].as_array_mut()
    {
        existing.extend(blocks);
        return;
    }
    messages.push(json!({"role": "user", "content": blocks}));
}

/// Translate a buffered messages-API response back to the unified shape.
pub fn from_anthropic_response(
    value: &serde_json::Value,
    model: &str,
) -> Result<ChatCompletionResponse, ProviderError> {
    let content = value["content"]
        .as_array()
        .ok_or_else(|| ProviderError::InvalidResponse("missing content array".into()))?;

    let text = content
        .iter()
        .filter_map(|block| {
            if block["type"].as_str() == Some("text") {
                block["text"].as_str()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<ToolCall> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("tool_use"))
        .map(|block| ToolCall {
            id: block["id"].as_str().unwrap_or("").to_string(),
            kind: "function".into(),
            function: switchyard_protocol::FunctionCall {
                name: block["name"].as_str().unwrap_or("").to_string(),
                arguments: block["input"].to_string(),
            },
        })
        .collect();

    let finish_reason = value["stop_reason"]
        .as_str()
        .map(|r| map_finish_reason(r).to_string());

    let usage = Usage::new(
        value["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    );

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
        Some(usage),
    ))
}

pub struct AnthropicAdapter {
    config: AdapterConfig,
}

impl AnthropicAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.trimmed_base())
    }

    fn stream_chunks(&self, response: reqwest::Response, model: String) -> ChunkStream {
        let idle_timeout = self.config.timeout;
        Box::pin(async_stream::stream! {
            let mut decoder = SseDecoder::default();
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

                for frame in decoder.feed(&bytes) {
                    let SseFrame::Data(data) = frame else {
                        // Anthropic streams end with message_stop, not [DONE].
                        return;
                    };
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&data) else {
                        continue;
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
impl ProviderAdapter for AnthropicAdapter {
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
        let body = to_anthropic_request(&request, &request.model, stream);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream,
            "anthropic chat completion"
        );

        let http = shared_http_client()
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
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
