//! Metric name and label definitions.
//!
//! Centralizing these definitions keeps the Prometheus surface consistent and
//! documents what the gateway exports. Names follow Prometheus conventions;
//! `METRICS_PREFIX` is applied by the recorder, not baked into the constants.

/// HTTP surface metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    /// Number of currently open client connections
    pub const ACTIVE_CONNECTIONS: &str = "active_connections";
}

/// Upstream provider metrics
pub mod provider {
    /// Total upstream requests by provider and outcome
    pub const REQUESTS_TOTAL: &str = "provider_requests_total";
    /// Total tokens attributed to a provider
    pub const TOKENS_TOTAL: &str = "provider_tokens_total";
    /// Rolling p50 latency in milliseconds
    pub const LATENCY_P50_MILLISECONDS: &str = "provider_latency_p50_milliseconds";
    /// Rolling p95 latency in milliseconds
    pub const LATENCY_P95_MILLISECONDS: &str = "provider_latency_p95_milliseconds";
    /// Rolling p99 latency in milliseconds
    pub const LATENCY_P99_MILLISECONDS: &str = "provider_latency_p99_milliseconds";
    /// Consecutive error count per sub-provider
    pub const CONSECUTIVE_ERRORS: &str = "provider_consecutive_errors";
    /// Health status gauge (1 healthy, 0.5 degraded, 0 unhealthy)
    pub const HEALTH_STATUS: &str = "provider_health_status";
}

/// Outbound HTTP calls made by provider adapters
pub mod upstream {
    /// Total upstream HTTP requests by provider, operation, and status
    pub const REQUESTS_TOTAL: &str = "upstream_requests_total";
    /// Upstream HTTP request duration in seconds
    pub const DURATION_SECONDS: &str = "upstream_request_duration_seconds";
}

/// Dispatcher metrics
pub mod dispatch {
    /// Requests waiting on a selection or reservation
    pub const QUEUE_SIZE: &str = "queue_size";
    /// Terminal errors by endpoint and kind
    pub const ERRORS_TOTAL: &str = "errors_total";
}

/// Common label keys
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const PROVIDER: &str = "provider";
    pub const SUB_PROVIDER: &str = "sub_provider";
    pub const MODEL: &str = "model";
    pub const ERROR_TYPE: &str = "error_type";
    pub const TOKEN_TYPE: &str = "token_type";
}

/// Histogram bucket layouts
pub mod buckets {
    /// HTTP request durations (fast local handling through slow upstreams)
    pub const HTTP_DURATION: [f64; 11] = [
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    /// Upstream completion durations (LLM calls have a long tail)
    pub const UPSTREAM_DURATION: [f64; 10] =
        [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];
}
