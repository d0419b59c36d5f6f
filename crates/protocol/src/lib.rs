//! OpenAI-compatible wire schema.
//!
//! These types are the canonical exchange form between the HTTP surface, the
//! dispatcher, and the provider adapters: every adapter translates between
//! this schema and its vendor's protocol, so the rest of the gateway never
//! sees vendor shapes.

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod error;
pub mod images;
pub mod models;
pub mod moderations;
pub mod stream;

pub use {
    audio::{SpeechRequest, TranscriptionRequest, TranscriptionResponse},
    chat::{
        ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, ContentPart,
        FunctionCall, ImageUrl, MessageContent, ReasoningEffort, ResponseMessage, Role, ToolCall,
        Usage,
    },
    embeddings::{EmbeddingData, EmbeddingInput, EmbeddingRequest, EmbeddingResponse},
    error::{ApiError, ApiErrorBody},
    images::{ImageData, ImageEditRequest, ImageGenerationRequest, ImageResponse},
    models::{ModelList, ModelObject},
    moderations::{ModerationInput, ModerationRequest, ModerationResponse, ModerationResult},
    stream::{ChunkChoice, ChunkDelta, FunctionCallDelta, StreamChunk, ToolCallDelta},
};

/// Seconds since the epoch, for `created` fields.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Generate a response id with the given prefix (e.g. `chatcmpl`).
#[must_use]
pub fn response_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
