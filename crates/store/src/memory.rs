//! In-memory repositories for tests and keyless dev boots.

use std::collections::HashMap;

use {async_trait::async_trait, chrono::Utc, tokio::sync::RwLock};

use crate::{
    model::{
        ApiRequestRecord, CompletionUpdate, FailureUpdate, ProviderRecord, RequestStatus,
        SubProviderRecord, UserRecord,
    },
    traits::{AccountingStore, ProviderStore, StoreError, SubProviderStore, UserStore},
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn get_by_api_key_hash(&self, hash: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.api_key_hash == hash)
            .cloned())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        user.enabled = enabled;
        Ok(())
    }

    async fn decrement_credits(&self, id: &str, amount: f64) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if user.credits < amount {
            return Ok(false);
        }
        user.credits -= amount;
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemoryProviderStore {
    providers: RwLock<HashMap<String, ProviderRecord>>,
}

impl MemoryProviderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn list(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        Ok(self.providers.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError> {
        Ok(self.providers.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: ProviderRecord) -> Result<(), StoreError> {
        self.providers
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySubProviderStore {
    subs: RwLock<HashMap<String, SubProviderRecord>>,
}

impl MemorySubProviderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubProviderStore for MemorySubProviderStore {
    async fn list(&self) -> Result<Vec<SubProviderRecord>, StoreError> {
        Ok(self.subs.read().await.values().cloned().collect())
    }

    async fn list_for_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<SubProviderRecord>, StoreError> {
        Ok(self
            .subs
            .read()
            .await
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<SubProviderRecord>, StoreError> {
        Ok(self.subs.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: SubProviderRecord) -> Result<(), StoreError> {
        self.subs.write().await.insert(record.id.clone(), record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAccountingStore {
    requests: RwLock<HashMap<String, ApiRequestRecord>>,
}

impl MemoryAccountingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: read a record back.
    pub async fn get(&self, id: &str) -> Option<ApiRequestRecord> {
        self.requests.read().await.get(id).cloned()
    }

    /// Test helper: snapshot every record.
    pub async fn all(&self) -> Vec<ApiRequestRecord> {
        self.requests.read().await.values().cloned().collect()
    }

    async fn terminal_transition<F>(&self, id: &str, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut ApiRequestRecord),
    {
        let mut requests = self.requests.write().await;
        let record = requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        apply(record);
        record.completed_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl AccountingStore for MemoryAccountingStore {
    async fn create(&self, record: ApiRequestRecord) -> Result<(), StoreError> {
        self.requests
            .write()
            .await
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn start_processing(&self, id: &str) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        let record = requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.status == RequestStatus::Pending {
            record.status = RequestStatus::Processing;
        }
        Ok(())
    }

    async fn complete(&self, id: &str, update: CompletionUpdate) -> Result<bool, StoreError> {
        self.terminal_transition(id, |record| {
            record.status = RequestStatus::Completed;
            record.tokens_used = update.tokens_used;
            record.credits_used = update.credits_used;
            record.latency_ms = update.latency_ms;
            record.response_size = update.response_size;
            record.status_code = Some(update.status_code);
            record.retry_count = update.retry_count;
        })
        .await
    }

    async fn fail(&self, id: &str, update: FailureUpdate) -> Result<bool, StoreError> {
        self.terminal_transition(id, |record| {
            record.status = RequestStatus::Failed;
            record.status_code = Some(update.status_code);
            record.error_message = Some(update.error_message.clone());
            record.latency_ms = update.latency_ms;
            record.retry_count = update.retry_count;
        })
        .await
    }

    async fn timeout(&self, id: &str, latency_ms: u64) -> Result<bool, StoreError> {
        self.terminal_transition(id, |record| {
            record.status = RequestStatus::Timeout;
            record.status_code = Some(504);
            record.latency_ms = latency_ms;
        })
        .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn user(credits: f64) -> UserRecord {
        UserRecord {
            id: "u1".into(),
            name: "acme".into(),
            api_key_hash: "hash".into(),
            enabled: true,
            credits,
            plan: "pro".into(),
            allowed_models: vec![],
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn decrement_credits_refuses_overdraft() {
        let store = MemoryUserStore::new();
        store.insert(user(5.0)).await;

        assert!(store.decrement_credits("u1", 3.0).await.unwrap());
        assert!(!store.decrement_credits("u1", 3.0).await.unwrap());
        let remaining = store.get_by_id("u1").await.unwrap().unwrap().credits;
        assert!((remaining - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn terminal_transition_is_exactly_once() {
        let store = MemoryAccountingStore::new();
        let record = ApiRequestRecord::accepted("u1", "gpt-4o", "/v1/chat/completions", "POST", 42, "", "");
        let id = record.id.clone();
        store.create(record).await.unwrap();
        store.start_processing(&id).await.unwrap();

        let applied = store
            .complete(&id, CompletionUpdate {
                tokens_used: 10,
                credits_used: 0.5,
                latency_ms: 120,
                response_size: 512,
                status_code: 200,
                retry_count: 0,
            })
            .await
            .unwrap();
        assert!(applied);

        // A late failure write must not clobber the completed record.
        let applied = store
            .fail(&id, FailureUpdate {
                status_code: 500,
                error_message: "late".into(),
                latency_ms: 0,
                retry_count: 0,
            })
            .await
            .unwrap();
        assert!(!applied);

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.status_code, Some(200));
    }

    #[tokio::test]
    async fn lookup_by_key_hash() {
        let store = MemoryUserStore::new();
        store.insert(user(1.0)).await;
        assert!(store.get_by_api_key_hash("hash").await.unwrap().is_some());
        assert!(store.get_by_api_key_hash("nope").await.unwrap().is_none());
    }
}
