//! Bearer-key authentication and per-user authorization.

use std::sync::Arc;

use {
    axum::http::HeaderMap,
    sha2::{Digest, Sha256},
};

use switchyard_store::{UserRecord, UserStore};

use crate::error::GatewayError;

/// SHA-256 hex of a bearer key; the store never sees plaintext keys.
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Resolve the caller from the `Authorization` header.
pub async fn authenticate(
    users: &Arc<dyn UserStore>,
    headers: &HeaderMap,
) -> Result<UserRecord, GatewayError> {
    let token = bearer_token(headers).ok_or_else(|| {
        GatewayError::AuthenticationFailed("Missing bearer token".into())
    })?;
    if token.is_empty() {
        return Err(GatewayError::AuthenticationFailed(
            "Missing bearer token".into(),
        ));
    }

    let user = users
        .get_by_api_key_hash(&hash_api_key(token))
        .await?
        .ok_or_else(|| GatewayError::AuthenticationFailed("Invalid API key".into()))?;

    if !user.enabled {
        return Err(GatewayError::AuthorizationDenied {
            reason: "Account disabled".into(),
            status: 403,
        });
    }
    Ok(user)
}

/// The model must be on the user's plan allowlist (empty list = all).
pub fn authorize_model(user: &UserRecord, model: &str) -> Result<(), GatewayError> {
    if user.may_use_model(model) {
        return Ok(());
    }
    Err(GatewayError::AuthorizationDenied {
        reason: format!("Model {model} is not available on the {} plan", user.plan),
        status: 403,
    })
}

/// The balance must cover the estimated cost before any upstream call.
pub fn authorize_credits(user: &UserRecord, estimated: f64) -> Result<(), GatewayError> {
    if user.credits >= estimated {
        return Ok(());
    }
    Err(GatewayError::AuthorizationDenied {
        reason: "Insufficient credits".into(),
        status: 402,
    })
}

pub fn authorize_admin(user: &UserRecord) -> Result<(), GatewayError> {
    if user.is_admin {
        return Ok(());
    }
    Err(GatewayError::AuthorizationDenied {
        reason: "Admin access required".into(),
        status: 403,
    })
}
