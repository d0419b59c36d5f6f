//! Persisted entities.

use std::collections::HashMap;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use switchyard_vault::SealedKey;

/// Which operations a provider can serve.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Capabilities {
    pub chat: bool,
    pub audio: bool,
    pub embeddings: bool,
    pub images: bool,
    pub moderation: bool,
}

impl Capabilities {
    #[must_use]
    pub fn chat_only() -> Self {
        Self {
            chat: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn all() -> Self {
        Self {
            chat: true,
            audio: true,
            embeddings: true,
            images: true,
            moderation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric weight used by the health scorer.
    #[must_use]
    pub fn score(self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Unhealthy => 0.0,
        }
    }
}

/// A vendor family (openai, anthropic, google, bedrock, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
    /// When false the provider carries its own key and is selected without a
    /// sub-provider.
    pub needs_sub_providers: bool,
    pub models: Vec<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Direct key for providers without sub-provider pools.
    #[serde(default)]
    pub api_key: Option<SealedKey>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default)]
    pub health_status: HealthStatus,
}

impl ProviderRecord {
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Per-minute/hour quota knobs for one key slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubProviderLimits {
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
    pub max_tokens_per_minute: u32,
    pub max_concurrent_requests: u32,
}

impl Default for SubProviderLimits {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_requests_per_hour: 1_000,
            max_tokens_per_minute: 100_000,
            max_concurrent_requests: 10,
        }
    }
}

/// A concrete API-key slot bound to one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubProviderRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: u32,
    pub weight: f64,
    pub api_key: SealedKey,
    /// Incoming model → upstream model. Empty means "serve everything the
    /// provider serves, unmapped".
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    #[serde(default)]
    pub limits: SubProviderLimits,
}

impl SubProviderRecord {
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.model_mapping.is_empty() || self.model_mapping.contains_key(model)
    }

    /// The model id to send upstream for an incoming model.
    #[must_use]
    pub fn upstream_model(&self, model: &str) -> String {
        self.model_mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl RequestStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

/// Accounting record for one gateway request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub model: String,
    pub endpoint: String,
    pub method: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub credits_used: f64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub request_size: u64,
    #[serde(default)]
    pub response_size: u64,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApiRequestRecord {
    /// A fresh `pending` record accepted at the HTTP edge.
    #[must_use]
    pub fn accepted(
        user_id: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        request_size: u64,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status: RequestStatus::Pending,
            tokens_used: 0,
            credits_used: 0.0,
            latency_ms: 0,
            request_size,
            response_size: 0,
            status_code: None,
            error_message: None,
            retry_count: 0,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Terminal success fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionUpdate {
    pub tokens_used: u32,
    pub credits_used: f64,
    pub latency_ms: u64,
    pub response_size: u64,
    pub status_code: u16,
    pub retry_count: u32,
}

/// Terminal failure fields.
#[derive(Debug, Clone, Default)]
pub struct FailureUpdate {
    pub status_code: u16,
    pub error_message: String,
    pub latency_ms: u64,
    pub retry_count: u32,
}

/// A tenant account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// SHA-256 of the bearer API key; plaintext keys are never stored.
    pub api_key_hash: String,
    pub enabled: bool,
    pub credits: f64,
    pub plan: String,
    /// Empty means every model is allowed.
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl UserRecord {
    #[must_use]
    pub fn may_use_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn sub(mapping: &[(&str, &str)]) -> SubProviderRecord {
        SubProviderRecord {
            id: "sub-1".into(),
            provider_id: "openai".into(),
            name: "slot-a".into(),
            enabled: true,
            priority: 0,
            weight: 1.0,
            api_key: SealedKey {
                key_material: String::new(),
                iv: String::new(),
                ciphertext: String::new(),
            },
            model_mapping: mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            limits: SubProviderLimits::default(),
        }
    }

    #[test]
    fn empty_mapping_serves_all_models_unmapped() {
        let s = sub(&[]);
        assert!(s.supports_model("gpt-4o"));
        assert_eq!(s.upstream_model("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn mapping_restricts_and_rewrites() {
        let s = sub(&[("gpt-4o", "gpt-4o-2024-11-20")]);
        assert!(s.supports_model("gpt-4o"));
        assert!(!s.supports_model("gpt-3.5-turbo"));
        assert_eq!(s.upstream_model("gpt-4o"), "gpt-4o-2024-11-20");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Timeout.is_terminal());
    }

    #[test]
    fn user_model_allowlist() {
        let mut user = UserRecord {
            id: "u1".into(),
            name: "acme".into(),
            api_key_hash: String::new(),
            enabled: true,
            credits: 10.0,
            plan: "pro".into(),
            allowed_models: vec![],
            is_admin: false,
        };
        assert!(user.may_use_model("gpt-4o"));
        user.allowed_models = vec!["gpt-4o-mini".into()];
        assert!(!user.may_use_model("gpt-4o"));
        assert!(user.may_use_model("gpt-4o-mini"));
    }

    #[test]
    fn health_status_scores() {
        assert!((HealthStatus::Healthy.score() - 1.0).abs() < f64::EPSILON);
        assert!((HealthStatus::Degraded.score() - 0.5).abs() < f64::EPSILON);
        assert!((HealthStatus::Unhealthy.score() - 0.0).abs() < f64::EPSILON);
    }
}
