//! Streaming chunk types (`chat.completion.chunk` shape).
//!
//! Every streaming decoder, whatever the vendor wire format, produces these
//! chunks; the HTTP layer re-serializes them as `data: <JSON>` SSE lines.

use serde::{Deserialize, Serialize};

use crate::chat::Usage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning text from vendors that stream thinking separately; carried
    /// as the widely-used `reasoning_content` extension field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    #[must_use]
    pub fn new(model: impl Into<String>, delta: ChunkDelta, finish_reason: Option<String>) -> Self {
        Self {
            id: crate::response_id("chatcmpl"),
            object: "chat.completion.chunk".into(),
            created: crate::unix_now(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// A chunk carrying only text content.
    #[must_use]
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            model,
            ChunkDelta {
                content: Some(content.into()),
                ..ChunkDelta::default()
            },
            None,
        )
    }

    /// A terminal chunk carrying only a finish reason.
    #[must_use]
    pub fn finish(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(model, ChunkDelta::default(), Some(reason.into()))
    }

    /// Text content of the first choice's delta, if any.
    #[must_use]
    pub fn content_delta(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }
}
