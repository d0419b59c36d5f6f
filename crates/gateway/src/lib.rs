//! The OpenAI-compatible HTTP surface.
//!
//! Handlers authenticate, authorize, run the moderation pre-check, open an
//! accounting record, and hand the request to the dispatcher (buffered) or
//! the stream machine (streaming), then close the record exactly once.

pub mod auth;
mod error;
pub mod moderation;
pub mod routes;
pub mod server;
pub mod sse;
pub mod state;

pub use {
    error::GatewayError,
    server::{build_router, run},
    state::AppState,
};
