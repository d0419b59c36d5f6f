//! Moderation types.

use serde::{Deserialize, Serialize};

/// A single string or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModerationInput {
    Text(String),
    Batch(Vec<String>),
    /// Multimodal input array (text and image_url parts), forwarded opaquely.
    Parts(Vec<serde_json::Value>),
}

/// `POST /v1/moderations` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input: ModerationInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    pub categories: serde_json::Value,
    pub category_scores: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationResponse {
    pub id: String,
    pub model: String,
    pub results: Vec<ModerationResult>,
}

impl ModerationResponse {
    /// Whether any result is flagged, with the highest category score seen.
    #[must_use]
    pub fn verdict(&self) -> (bool, f64) {
        let flagged = self.results.iter().any(|r| r.flagged);
        let score = self
            .results
            .iter()
            .filter_map(|r| r.category_scores.as_object())
            .flat_map(|scores| scores.values())
            .filter_map(serde_json::Value::as_f64)
            .fold(0.0_f64, f64::max);
        (flagged, score)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_takes_max_score() {
        let resp: ModerationResponse = serde_json::from_str(
            r#"{
                "id": "modr-1",
                "model": "omni-moderation-latest",
                "results": [
                    {"flagged": false, "categories": {}, "category_scores": {"hate": 0.1}},
                    {"flagged": true, "categories": {"violence": true}, "category_scores": {"violence": 0.93}}
                ]
            }"#,
        )
        .unwrap();
        let (flagged, score) = resp.verdict();
        assert!(flagged);
        assert!((score - 0.93).abs() < 1e-9);
    }
}
