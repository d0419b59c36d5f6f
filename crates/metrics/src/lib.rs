//! Metrics collection and export for switchyard.
//!
//! This crate provides a unified metrics interface using the `metrics` crate
//! facade. When the `prometheus` feature is enabled, metrics are exported in
//! Prometheus text format for the gateway's `/metrics` endpoint.
//!
//! # Usage
//!
//! ```rust,ignore
//! use switchyard_metrics::{counter, labels, provider};
//!
//! counter!(
//!     provider::REQUESTS_TOTAL,
//!     labels::PROVIDER => "openai",
//!     labels::STATUS => "success"
//! )
//! .increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
