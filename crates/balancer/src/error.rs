use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalancerError {
    /// No enabled, healthy provider supports the requested model (HTTP 503).
    #[error("no providers available for model {model}")]
    NoProvidersAvailable { model: String },

    /// The chosen provider has no sub-provider that is available, under
    /// capacity, and serving the model (HTTP 503).
    #[error("no sub-providers available for provider {provider}")]
    NoSubProvidersAvailable { provider: String },
}
