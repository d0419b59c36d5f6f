//! Environment-driven configuration.
//!
//! The gateway is configured entirely through environment variables (the
//! deployment surface is a container). [`Settings::from_env`] snapshots the
//! recognized variables into a typed struct; [`validate`] enforces the
//! invariants that must hold before the server binds.

pub mod schema;
pub mod validate;

pub use schema::{
    CorsSettings, DatabaseSettings, Environment, LoggingSettings, MetricsSettings,
    ModerationSettings, SecuritySettings, ServerSettings, Settings,
};
pub use validate::validate;
