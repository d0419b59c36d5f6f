//! Anthropic event-stream state machine.
//!
//! Converts the typed events of an Anthropic messages stream
//! (`content_block_start`, `content_block_delta`, `content_block_stop`,
//! `message_delta`, `message_stop`) into unified `chat.completion.chunk`
//! values. Tool-call argument JSON arrives as `input_json_delta` fragments;
//! they are accumulated and emitted as one synthetic `tool_calls` chunk when
//! the block stops. Bedrock routes its decoded frames through the same
//! machine.

use switchyard_protocol::{
    ChunkDelta, FunctionCallDelta, StreamChunk, ToolCallDelta, Usage,
};

use crate::error::ProviderError;

/// Map Anthropic stop reasons onto OpenAI finish reasons.
#[must_use]
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        // end_turn, stop_sequence, and anything novel.
        _ => "stop",
    }
}

struct ToolBlock {
    /// Content-block index in the Anthropic message.
    block_index: u64,
    id: String,
    name: String,
    arguments: String,
    /// 0-based position among emitted tool calls, for the OpenAI delta index.
    emit_index: u32,
}

/// Single-message FSM; construct one per streaming request.
pub struct AnthropicStreamState {
    model: String,
    role_sent: bool,
    current_tool: Option<ToolBlock>,
    tools_emitted: u32,
    input_tokens: u32,
    output_tokens: u32,
    finish_reason: Option<String>,
}

impl AnthropicStreamState {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            role_sent: false,
            current_tool: None,
            tools_emitted: 0,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: None,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> StreamChunk {
        StreamChunk::new(self.model.clone(), delta, finish_reason)
    }

    /// First content chunk carries the assistant role, as OpenAI streams do.
    fn role_delta(&mut self) -> Option<StreamChunk> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some(self.chunk(
            ChunkDelta {
                role: Some("assistant".into()),
                ..ChunkDelta::default()
            },
            None,
        ))
    }

    /// Process one decoded event, returning any chunks to forward.
    pub fn process(
        &mut self,
        event: &serde_json::Value,
    ) -> Result<Vec<StreamChunk>, ProviderError> {
        let mut out = Vec::new();
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                out.extend(self.role_delta());
            },
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.current_tool = Some(ToolBlock {
                        block_index: event["index"].as_u64().unwrap_or(0),
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: String::new(),
                        emit_index: self.tools_emitted,
                    });
                }
            },
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str()
                            && !text.is_empty()
                        {
                            out.extend(self.role_delta());
                            out.push(self.chunk(
                                ChunkDelta {
                                    content: Some(text.to_string()),
                                    ..ChunkDelta::default()
                                },
                                None,
                            ));
                        }
                    },
                    "input_json_delta" => {
                        if let (Some(tool), Some(fragment)) =
                            (self.current_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.arguments.push_str(fragment);
                        }
                    },
                    "thinking_delta" => {
                        if let Some(text) = delta["thinking"].as_str()
                            && !text.is_empty()
                        {
                            out.extend(self.role_delta());
                            out.push(self.chunk(
                                ChunkDelta {
                                    reasoning_content: Some(text.to_string()),
                                    ..ChunkDelta::default()
                                },
                                None,
                            ));
                        }
                    },
                    _ => {},
                }
            },
            "content_block_stop" => {
                let index = event["index"].as_u64().unwrap_or(0);
                if self
                    .current_tool
                    .as_ref()
                    .is_some_and(|t| t.block_index == index)
                {
                    // One synthetic tool_calls chunk per completed block.
                    if let Some(tool) = self.current_tool.take() {
                        self.tools_emitted += 1;
                        out.extend(self.role_delta());
                        out.push(self.chunk(
                            ChunkDelta {
                                tool_calls: Some(vec![ToolCallDelta {
                                    index: tool.emit_index,
                                    id: Some(tool.id),
                                    kind: Some("function".into()),
                                    function: Some(FunctionCallDelta {
                                        name: Some(tool.name),
                                        arguments: Some(tool.arguments),
                                    }),
                                }]),
                                ..ChunkDelta::default()
                            },
                            None,
                        ));
                    }
                }
            },
            "message_delta" => {
                if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = tokens as u32;
                }
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.finish_reason = Some(map_finish_reason(reason).to_string());
                }
            },
            "message_stop" => {
                let reason = self
                    .finish_reason
                    .take()
                    .unwrap_or_else(|| "stop".to_string());
                let mut chunk = self.chunk(ChunkDelta::default(), Some(reason));
                chunk.usage = Some(Usage::new(self.input_tokens, self.output_tokens));
                out.push(chunk);
            },
            "error" => {
                let message = event["error"]["message"].as_str().unwrap_or("unknown error");
                return Err(ProviderError::InvalidResponse(format!(
                    "anthropic stream error: {message}"
                )));
            },
            // ping, unknown future events.
            _ => {},
        }
        Ok(out)
    }
}
