//! MongoDB repositories.
//!
//! Collections: `users`, `providers`, `sub_providers`, `api_requests`, each
//! keyed by `_id` with a small set of secondary indexes created at connect
//! time.

use {
    async_trait::async_trait,
    chrono::Utc,
    mongodb::{
        Client, Collection, Database, IndexModel,
        bson::{Document, doc, to_bson},
    },
    tracing::info,
};

use crate::{
    model::{
        ApiRequestRecord, CompletionUpdate, FailureUpdate, ProviderRecord, SubProviderRecord,
        UserRecord,
    },
    traits::{AccountingStore, ProviderStore, StoreError, SubProviderStore, UserStore},
};

/// Shared handle to the gateway's collections.
#[derive(Clone)]
pub struct MongoStores {
    users: Collection<UserRecord>,
    providers: Collection<ProviderRecord>,
    sub_providers: Collection<SubProviderRecord>,
    api_requests: Collection<ApiRequestRecord>,
}

impl MongoStores {
    /// Connect and ensure secondary indexes.
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database_name);
        let stores = Self::from_database(&db);
        stores.ensure_indexes().await?;
        info!(database = database_name, "connected to mongodb");
        Ok(stores)
    }

    #[must_use]
    pub fn from_database(db: &Database) -> Self {
        Self {
            users: db.collection("users"),
            providers: db.collection("providers"),
            sub_providers: db.collection("sub_providers"),
            api_requests: db.collection("api_requests"),
        }
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.users
            .create_index(IndexModel::builder().keys(doc! { "api_key_hash": 1 }).build())
            .await?;
        self.sub_providers
            .create_index(IndexModel::builder().keys(doc! { "provider_id": 1 }).build())
            .await?;
        self.api_requests
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .build(),
            )
            .await?;
        self.api_requests
            .create_index(IndexModel::builder().keys(doc! { "endpoint": 1 }).build())
            .await?;
        Ok(())
    }

    /// Terminal update applied only while the record is still non-terminal.
    async fn terminal_update(&self, id: &str, update: Document) -> Result<bool, StoreError> {
        let filter = doc! {
            "_id": id,
            "status": { "$in": ["pending", "processing"] },
        };
        let result = self.api_requests.update_one(filter, update).await?;
        Ok(result.modified_count > 0)
    }
}

#[async_trait]
impl UserStore for MongoStores {
    async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.find_one(doc! { "_id": id }).await?)
    }

    async fn get_by_api_key_hash(&self, hash: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.find_one(doc! { "api_key_hash": hash }).await?)
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let result = self
            .users
            .update_one(doc! { "_id": id }, doc! { "$set": { "enabled": enabled } })
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn decrement_credits(&self, id: &str, amount: f64) -> Result<bool, StoreError> {
        // Filtering on the balance makes check-and-debit a single atomic op.
        let result = self
            .users
            .update_one(
                doc! { "_id": id, "credits": { "$gte": amount } },
                doc! { "$inc": { "credits": -amount } },
            )
            .await?;
        Ok(result.modified_count > 0)
    }
}

#[async_trait]
impl ProviderStore for MongoStores {
    async fn list(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        let mut cursor = self.providers.find(doc! {}).await?;
        let mut out = Vec::new();
        while cursor.advance().await? {
            out.push(cursor.deserialize_current()?);
        }
        Ok(out)
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderRecord>, StoreError> {
        Ok(self.providers.find_one(doc! { "_id": id }).await?)
    }

    async fn upsert(&self, record: ProviderRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let bson = to_bson(&record).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.providers
            .update_one(doc! { "_id": id }, doc! { "$set": bson })
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubProviderStore for MongoStores {
    async fn list(&self) -> Result<Vec<SubProviderRecord>, StoreError> {
        let mut cursor = self.sub_providers.find(doc! {}).await?;
        let mut out = Vec::new();
        while cursor.advance().await? {
            out.push(cursor.deserialize_current()?);
        }
        Ok(out)
    }

    async fn list_for_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<SubProviderRecord>, StoreError> {
        let mut cursor = self
            .sub_providers
            .find(doc! { "provider_id": provider_id })
            .await?;
        let mut out = Vec::new();
        while cursor.advance().await? {
            out.push(cursor.deserialize_current()?);
        }
        Ok(out)
    }

    async fn get(&self, id: &str) -> Result<Option<SubProviderRecord>, StoreError> {
        Ok(self.sub_providers.find_one(doc! { "_id": id }).await?)
    }

    async fn upsert(&self, record: SubProviderRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let bson = to_bson(&record).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.sub_providers
            .update_one(doc! { "_id": id }, doc! { "$set": bson })
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountingStore for MongoStores {
    async fn create(&self, record: ApiRequestRecord) -> Result<(), StoreError> {
        self.api_requests.insert_one(record).await?;
        Ok(())
    }

    async fn start_processing(&self, id: &str) -> Result<(), StoreError> {
        self.api_requests
            .update_one(
                doc! { "_id": id, "status": "pending" },
                doc! { "$set": { "status": "processing" } },
            )
            .await?;
        Ok(())
    }

    async fn complete(&self, id: &str, update: CompletionUpdate) -> Result<bool, StoreError> {
        self.terminal_update(
            id,
            doc! { "$set": {
                "status": "completed",
                "tokens_used": update.tokens_used,
                "credits_used": update.credits_used,
                "latency_ms": update.latency_ms as i64,
                "response_size": update.response_size as i64,
                "status_code": i32::from(update.status_code),
                "retry_count": update.retry_count,
                "completed_at": to_bson(&Utc::now()).unwrap_or(mongodb::bson::Bson::Null),
            } },
        )
        .await
    }

    async fn fail(&self, id: &str, update: FailureUpdate) -> Result<bool, StoreError> {
        self.terminal_update(
            id,
            doc! { "$set": {
                "status": "failed",
                "status_code": i32::from(update.status_code),
                "error_message": update.error_message,
                "latency_ms": update.latency_ms as i64,
                "retry_count": update.retry_count,
                "completed_at": to_bson(&Utc::now()).unwrap_or(mongodb::bson::Bson::Null),
            } },
        )
        .await
    }

    async fn timeout(&self, id: &str, latency_ms: u64) -> Result<bool, StoreError> {
        self.terminal_update(
            id,
            doc! { "$set": {
                "status": "timeout",
                "status_code": 504,
                "latency_ms": latency_ms as i64,
                "completed_at": to_bson(&Utc::now()).unwrap_or(mongodb::bson::Bson::Null),
            } },
        )
        .await
    }
}
