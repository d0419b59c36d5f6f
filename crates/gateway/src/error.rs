//! Error taxonomy and its HTTP mapping.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    thiserror::Error,
};

use {
    switchyard_balancer::ErrorClass,
    switchyard_dispatch::DispatchError,
    switchyard_protocol::ApiErrorBody,
    switchyard_providers::ProviderError,
    switchyard_store::StoreError,
};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    AuthenticationFailed(String),

    #[error("{reason}")]
    AuthorizationDenied { reason: String, status: u16 },

    #[error("{0}")]
    RateLimitExceeded(String),

    #[error("Content violates our terms of service and has been blocked")]
    ContentBlocked,

    #[error("{0}")]
    NoProvidersAvailable(String),

    #[error("{message}")]
    Upstream { message: String, class: ErrorClass },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::FORBIDDEN)
            },
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ContentBlocked | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoProvidersAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The OpenAI-style `error.type` string.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_)
            | Self::AuthorizationDenied { .. }
            | Self::ContentBlocked
            | Self::BadRequest(_) => "invalid_request_error",
            Self::RateLimitExceeded(_) => "rate_limit_error",
            Self::NoProvidersAvailable(_) => "service_unavailable",
            Self::Upstream { .. } | Self::Timeout(_) | Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn body(&self) -> ApiErrorBody {
        ApiErrorBody::new(self.error_type(), self.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

impl From<DispatchError> for GatewayError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Balancer(e) => Self::NoProvidersAvailable(e.to_string()),
            DispatchError::Upstream { source, class, .. } => match source {
                ProviderError::Timeout { .. } | ProviderError::StreamIdle { .. } => {
                    Self::Timeout(source.to_string())
                },
                other => Self::Upstream {
                    message: other.to_string(),
                    class,
                },
            },
            // Transient upstream failures are masked as a plain internal
            // error once the retry budget is spent.
            DispatchError::AttemptsExhausted { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, switchyard_balancer::BalancerError};

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            GatewayError::AuthenticationFailed("bad key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::AuthorizationDenied {
                reason: "insufficient credits".into(),
                status: 402,
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            GatewayError::ContentBlocked.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::NoProvidersAvailable("none".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::Timeout("deadline".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn balancer_error_maps_to_503() {
        let err: GatewayError = DispatchError::Balancer(BalancerError::NoProvidersAvailable {
            model: "gpt-4o".into(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_type(), "service_unavailable");
    }

    #[test]
    fn upstream_timeout_maps_to_504() {
        let err: GatewayError = DispatchError::Upstream {
            source: ProviderError::Timeout { seconds: 30 },
            class: ErrorClass::Retryable,
            attempts: 10,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn exhausted_attempts_masked_as_internal() {
        let err: GatewayError = DispatchError::AttemptsExhausted { attempts: 10 }.into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "internal_error");
        assert_eq!(err.to_string(), "All 10 provider attempts failed");
    }

    #[test]
    fn body_shape() {
        let body = GatewayError::RateLimitExceeded("slow down".into()).body();
        assert_eq!(body.error.kind, "rate_limit_error");
        assert_eq!(body.error.message, "slow down");
    }

    #[test]
    fn content_blocked_message_is_fixed() {
        assert_eq!(
            GatewayError::ContentBlocked.to_string(),
            "Content violates our terms of service and has been blocked"
        );
    }
}
