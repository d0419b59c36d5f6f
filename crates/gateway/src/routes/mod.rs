//! `/v1` route handlers.
//!
//! Every handler follows the same arc: authenticate → authorize → moderation
//! pre-check → open the accounting record → dispatch → close the record
//! exactly once (the streaming path delegates the close to the stream
//! machine's finalizer).

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod images;
pub mod models;
pub mod moderations;

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {axum::http::HeaderMap, tracing::warn};

use switchyard_store::{ApiRequestRecord, CompletionUpdate, FailureUpdate, UserRecord};

use crate::{error::GatewayError, state::AppState};

/// Caller context threaded from the HTTP layer into accounting records.
pub(crate) struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub request_size: u64,
}

impl ClientInfo {
    pub(crate) fn from_parts(addr: SocketAddr, headers: &HeaderMap) -> Self {
        // Honor the proxy header when present; the socket address otherwise.
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| addr.ip().to_string());
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let request_size = headers
            .get(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self {
            ip,
            user_agent,
            request_size,
        }
    }
}

/// An open accounting record and its timer.
pub(crate) struct RequestScope {
    state: Arc<AppState>,
    pub record_id: String,
    started: Instant,
}

impl RequestScope {
    /// Create the `pending` record and move it to `processing`.
    pub(crate) async fn open(
        state: &Arc<AppState>,
        user: &UserRecord,
        model: &str,
        endpoint: &str,
        client: &ClientInfo,
    ) -> Result<Self, GatewayError> {
        let record = ApiRequestRecord::accepted(
            user.id.as_str(),
            model,
            endpoint,
            "POST",
            client.request_size,
            client.ip.as_str(),
            client.user_agent.as_str(),
        );
        let record_id = record.id.clone();
        state.accounting.create(record).await?;
        state.accounting.start_processing(&record_id).await?;
        Ok(Self {
            state: Arc::clone(state),
            record_id,
            started: Instant::now(),
        })
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Terminal success write plus the credit debit.
    pub(crate) async fn complete(
        &self,
        user_id: &str,
        tokens_used: u32,
        credits_used: f64,
        response_size: u64,
        retry_count: u32,
    ) {
        if credits_used > 0.0 {
            match self
                .state
                .users
                .decrement_credits(user_id, credits_used)
                .await
            {
                Ok(true) => {},
                Ok(false) => warn!(user = user_id, credits_used, "balance insufficient at debit"),
                Err(e) => warn!(user = user_id, error = %e, "credit debit failed"),
            }
        }
        let update = CompletionUpdate {
            tokens_used,
            credits_used,
            latency_ms: self.elapsed_ms(),
            response_size,
            status_code: 200,
            retry_count,
        };
        if let Err(e) = self.state.accounting.complete(&self.record_id, update).await {
            warn!(request = %self.record_id, error = %e, "accounting completion failed");
        }
    }

    /// Terminal failure write. Deadline breaches land in the `timeout`
    /// state, everything else in `failed`.
    pub(crate) async fn fail(&self, err: &GatewayError, retry_count: u32) {
        let result = if matches!(err, GatewayError::Timeout(_)) {
            self.state
                .accounting
                .timeout(&self.record_id, self.elapsed_ms())
                .await
        } else {
            let update = FailureUpdate {
                status_code: err.status_code().as_u16(),
                error_message: err.to_string(),
                latency_ms: self.elapsed_ms(),
                retry_count,
            };
            self.state.accounting.fail(&self.record_id, update).await
        };
        if let Err(e) = result {
            warn!(request = %self.record_id, error = %e, "accounting failure write failed");
        }
    }
}

/// Run the moderation verdict: flagged content disables the user and fails
/// the open record with the fixed 400.
pub(crate) async fn enforce_verdict(
    state: &Arc<AppState>,
    scope: &RequestScope,
    user: &UserRecord,
    flagged: bool,
) -> Result<(), GatewayError> {
    if !flagged {
        return Ok(());
    }
    if let Err(e) = state.users.set_enabled(&user.id, false).await {
        warn!(user = %user.id, error = %e, "failed to disable user after flagged content");
    }
    let err = GatewayError::ContentBlocked;
    scope.fail(&err, 0).await;
    Err(err)
}
