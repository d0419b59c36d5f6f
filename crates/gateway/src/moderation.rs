//! Abuse-material pre-check, run before any upstream call.
//!
//! The check is fail-open by explicit policy: when the moderation service
//! itself errors, the request proceeds and the failure is logged. A flagged
//! request disables the user and returns a fixed 400. Do not switch this to
//! fail-closed without a policy decision.

use std::{sync::Arc, time::Duration};

use {secrecy::SecretString, tracing::{debug, warn}};

use {
    switchyard_config::Settings,
    switchyard_protocol::{
        ChatMessage, ContentPart, MessageContent, ModerationInput, ModerationRequest,
    },
    switchyard_providers::{AdapterConfig, ProviderAdapter, openai::OpenAiAdapter},
    switchyard_store::Capabilities,
};

const MODERATION_MODEL: &str = "omni-moderation-latest";
const MODERATION_BASE_URL: &str = "https://api.openai.com/v1";

/// Outcome of a pre-check.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verdict {
    pub is_flagged: bool,
    pub score: f64,
}

pub struct ModerationPreCheck {
    adapter: Option<Arc<OpenAiAdapter>>,
}

impl ModerationPreCheck {
    /// Build from settings; without `OPENAI_API_KEY` the check is disabled
    /// (and every request passes, loudly).
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let adapter = settings
            .moderation
            .openai_api_key
            .clone()
            .and_then(|key| Self::build_adapter(key));
        if adapter.is_none() {
            warn!("moderation pre-check disabled: OPENAI_API_KEY unset");
        }
        Self { adapter }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { adapter: None }
    }

    fn build_adapter(api_key: SecretString) -> Option<Arc<OpenAiAdapter>> {
        let config = AdapterConfig {
            provider_id: "openai".into(),
            name: "moderation-precheck".into(),
            base_url: MODERATION_BASE_URL.into(),
            api_key,
            timeout: Duration::from_secs(10),
            max_retries: 1,
            requests_per_minute: None,
            supported_models: vec![MODERATION_MODEL.into()],
            capabilities: Capabilities {
                moderation: true,
                ..Capabilities::default()
            },
        };
        match OpenAiAdapter::new(config) {
            Ok(adapter) => Some(Arc::new(adapter)),
            Err(e) => {
                warn!(error = %e, "moderation pre-check adapter failed to build");
                None
            },
        }
    }

    /// Check the text and image content of a chat request.
    pub async fn check_messages(&self, messages: &[ChatMessage]) -> Verdict {
        let mut parts: Vec<serde_json::Value> = Vec::new();
        for msg in messages {
            match &msg.content {
                Some(MessageContent::Text(text)) if !text.is_empty() => {
                    parts.push(serde_json::json!({"type": "text", "text": text}));
                },
                Some(MessageContent::Parts(content_parts)) => {
                    for part in content_parts {
                        match part {
                            ContentPart::Text { text } => {
                                parts.push(serde_json::json!({"type": "text", "text": text}));
                            },
                            ContentPart::ImageUrl { image_url } => {
                                parts.push(serde_json::json!({
                                    "type": "image_url",
                                    "image_url": {"url": image_url.url},
                                }));
                            },
                        }
                    }
                },
                _ => {},
            }
        }
        if parts.is_empty() {
            return Verdict::default();
        }
        self.run(ModerationInput::Parts(parts)).await
    }

    /// Check a bare prompt (images, audio input).
    pub async fn check_prompt(&self, prompt: &str) -> Verdict {
        if prompt.trim().is_empty() {
            return Verdict::default();
        }
        self.run(ModerationInput::Text(prompt.to_string())).await
    }

    async fn run(&self, input: ModerationInput) -> Verdict {
        let Some(adapter) = &self.adapter else {
            return Verdict::default();
        };

        let request = ModerationRequest {
            model: Some(MODERATION_MODEL.into()),
            input,
        };
        match adapter.moderate_content(request).await {
            Ok(response) => {
                let (is_flagged, score) = response.verdict();
                if is_flagged {
                    debug!(score, "moderation pre-check flagged content");
                }
                Verdict { is_flagged, score }
            },
            Err(e) => {
                // Fail-open: the request proceeds.
                warn!(error = %e, "moderation pre-check failed, allowing content");
                Verdict::default()
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, switchyard_protocol::Role};

    #[tokio::test]
    async fn disabled_check_allows_everything() {
        let check = ModerationPreCheck::disabled();
        let verdict = check
            .check_messages(&[ChatMessage::text(Role::User, "anything at all")])
            .await;
        assert!(!verdict.is_flagged);
    }

    #[tokio::test]
    async fn empty_prompt_short_circuits() {
        let check = ModerationPreCheck::disabled();
        let verdict = check.check_prompt("   ").await;
        assert!(!verdict.is_flagged);
    }
}
