//! Repository interfaces consumed by the core.

use {async_trait::async_trait, thiserror::Error};

use crate::model::{
    ApiRequestRecord, CompletionUpdate, FailureUpdate, ProviderRecord, SubProviderRecord,
    UserRecord,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "mongo")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Look up a user by the SHA-256 hash of their bearer key.
    async fn get_by_api_key_hash(&self, hash: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError>;

    /// Atomically debit credits. Returns false (and debits nothing) when the
    /// balance is insufficient.
    async fn decrement_credits(&self, id: &str, amount: f64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ProviderRecord>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError>;
    async fn upsert(&self, record: ProviderRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SubProviderStore: Send + Sync {
    async fn list(&self) -> Result<Vec<SubProviderRecord>, StoreError>;
    async fn list_for_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<SubProviderRecord>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<SubProviderRecord>, StoreError>;
    async fn upsert(&self, record: SubProviderRecord) -> Result<(), StoreError>;
}

/// Lifecycle writes for [`ApiRequestRecord`]s.
///
/// Terminal transitions (`complete`, `fail`, `timeout`) are idempotent keyed
/// by request id: the first one wins, later ones are no-ops returning false.
#[async_trait]
pub trait AccountingStore: Send + Sync {
    async fn create(&self, record: ApiRequestRecord) -> Result<(), StoreError>;

    async fn start_processing(&self, id: &str) -> Result<(), StoreError>;

    async fn complete(&self, id: &str, update: CompletionUpdate) -> Result<bool, StoreError>;

    async fn fail(&self, id: &str, update: FailureUpdate) -> Result<bool, StoreError>;

    async fn timeout(&self, id: &str, latency_ms: u64) -> Result<bool, StoreError>;
}
