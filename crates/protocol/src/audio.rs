//! Audio speech/transcription types.

use serde::{Deserialize, Serialize};

/// `POST /v1/audio/speech` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// `POST /v1/audio/transcriptions` unified form (the multipart body is
/// flattened by the HTTP layer). Translations reuse the same shape.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub model: String,
    pub file_name: String,
    pub file_bytes: Vec<u8>,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub response_format: Option<String>,
    pub temperature: Option<f64>,
    /// True for `/v1/audio/translations` (transcribe-and-translate).
    pub translate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}
