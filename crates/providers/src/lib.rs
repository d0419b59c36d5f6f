//! Vendor adapter implementations and the adapter cache.
//!
//! Every adapter translates between the unified OpenAI-compatible schema
//! (`switchyard-protocol`) and one vendor's wire protocol. Adapters are
//! registered explicitly in [`factory::AdapterFactory::build_adapter`]; there
//! is no runtime discovery.

pub mod adapter;
pub mod anthropic;
pub mod anthropic_stream;
pub mod bedrock;
mod error;
pub mod eventstream;
pub mod factory;
pub mod google;
pub mod openai;
pub mod openai_compat;
pub mod sse;

pub use {
    adapter::{AdapterConfig, ChatOutcome, ChunkStream, ProviderAdapter},
    error::ProviderError,
    factory::AdapterFactory,
};

/// Shared HTTP client for upstream calls.
///
/// All adapters reuse this client to share connection pools, DNS cache, and
/// TLS sessions; per-request timeouts are set at the call site.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}
