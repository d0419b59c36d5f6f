//! Data model and repository interfaces.
//!
//! The core consumes persistence exclusively through the traits in
//! [`traits`]; the in-memory backend serves tests and keyless dev boots, the
//! MongoDB backend (feature `mongo`) serves production.

pub mod memory;
mod model;
mod traits;

#[cfg(feature = "mongo")]
pub mod mongo;

pub use {
    model::{
        ApiRequestRecord, Capabilities, CompletionUpdate, FailureUpdate, HealthStatus,
        ProviderRecord, RequestStatus, SubProviderLimits, SubProviderRecord, UserRecord,
    },
    traits::{AccountingStore, ProviderStore, StoreError, SubProviderStore, UserStore},
};
