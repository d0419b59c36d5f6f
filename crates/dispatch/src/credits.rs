//! Credit computation and token estimation.
//!
//! Token counts are heuristic by design: four characters per token, rounded
//! up. Chat and embeddings charge tokens times a per-model multiplier;
//! images, audio, and moderation charge fixed per-call costs.

use std::collections::HashMap;

/// `ceil(chars / 4)`.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count().div_ceil(4)) as u32
}

#[derive(Debug, Clone)]
pub struct CreditSchedule {
    /// Credits per token for models not in the table.
    pub default_per_token: f64,
    /// Per-model overrides, matched by exact id then by prefix.
    pub per_token: HashMap<String, f64>,
    pub image_generation: f64,
    pub image_edit: f64,
    pub audio_speech: f64,
    pub audio_transcription: f64,
    pub moderation: f64,
}

impl Default for CreditSchedule {
    fn default() -> Self {
        let mut per_token = HashMap::new();
        per_token.insert("gpt-4o-mini".into(), 0.000_4);
        per_token.insert("gpt-4o".into(), 0.002);
        per_token.insert("claude".into(), 0.002);
        per_token.insert("gemini".into(), 0.001);
        Self {
            default_per_token: 0.001,
            per_token,
            image_generation: 4.0,
            image_edit: 4.0,
            audio_speech: 1.5,
            audio_transcription: 0.6,
            moderation: 0.1,
        }
    }
}

impl CreditSchedule {
    fn multiplier(&self, model: &str) -> f64 {
        if let Some(rate) = self.per_token.get(model) {
            return *rate;
        }
        self.per_token
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            // Longest prefix wins so "gpt-4o-mini" beats "gpt-4o".
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.default_per_token)
    }

    /// Token-metered credits for chat and embeddings.
    #[must_use]
    pub fn token_credits(&self, model: &str, tokens: u32) -> f64 {
        f64::from(tokens) * self.multiplier(model)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_per_token_rounded_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("12345678"), 2);
    }

    #[test]
    fn estimate_counts_chars_not_bytes() {
        // Four multi-byte characters are still one token.
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn exact_model_match_wins() {
        let schedule = CreditSchedule::default();
        let credits = schedule.token_credits("gpt-4o-mini", 1000);
        assert!((credits - 0.4).abs() < 1e-9);
    }

    #[test]
    fn longest_prefix_beats_shorter() {
        let schedule = CreditSchedule::default();
        // "gpt-4o-mini-2024" matches both prefixes; the longer one applies.
        let credits = schedule.token_credits("gpt-4o-mini-2024", 1000);
        assert!((credits - 0.4).abs() < 1e-9);
        let credits = schedule.token_credits("gpt-4o-2024", 1000);
        assert!((credits - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        let schedule = CreditSchedule::default();
        let credits = schedule.token_credits("sonar-pro", 500);
        assert!((credits - 0.5).abs() < 1e-9);
    }
}
