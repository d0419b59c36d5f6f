//! Provider and sub-provider load balancing.
//!
//! The registry holds one live handle per provider and per sub-provider
//! (capacity windows, breaker, rolling metrics); the load balancer evaluates
//! fresh snapshots of those handles on every selection. Selection is
//! stateless: no sticky sessions, no cached scores.

pub mod breaker;
pub mod capacity;
pub mod classify;
mod error;
pub mod health;
pub mod registry;
pub mod select;

pub use {
    breaker::{BreakerState, CircuitBreaker},
    capacity::CapacityGate,
    classify::{Classification, ClassifierConfig, ErrorClass, classify},
    error::BalancerError,
    registry::{ProviderHandle, Registry, SubProviderHandle},
    select::{LoadBalancer, Selection},
};
