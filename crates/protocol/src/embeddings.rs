//! Embedding request/response types.

use serde::{Deserialize, Serialize};

use crate::chat::Usage;

/// A single string or a batch of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Text(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    #[must_use]
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Text(t) => vec![t.as_str()],
            Self::Batch(v) => v.iter().map(String::as_str).collect(),
        }
    }

    /// Total character count, for token estimation.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.texts().iter().map(|t| t.chars().count()).sum()
    }
}

/// `POST /v1/embeddings` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: EmbeddingInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub index: u32,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_accepts_string_and_batch() {
        let single: EmbeddingRequest =
            serde_json::from_str(r#"{"model":"m","input":"hello"}"#).unwrap();
        assert_eq!(single.input.texts(), vec!["hello"]);

        let batch: EmbeddingRequest =
            serde_json::from_str(r#"{"model":"m","input":["a","bb"]}"#).unwrap();
        assert_eq!(batch.input.texts().len(), 2);
        assert_eq!(batch.input.char_len(), 3);
    }
}
