//! Router assembly and server lifecycle.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::{
        Router,
        body::Body,
        http::{HeaderValue, Request},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{AllowOrigin, Any, CorsLayer},
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        sensitive_headers::SetSensitiveRequestHeadersLayer,
        trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    },
    tracing::{Level, info},
};

use {
    switchyard_config::CorsSettings,
    switchyard_metrics::{counter, gauge, histogram, http as http_metrics, labels},
};

use crate::{routes, state::AppState};

const X_REQUEST_ID: &str = "x-request-id";

/// HTTP surface metrics: request counts, durations, open connections.
async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();

    gauge!(http_metrics::ACTIVE_CONNECTIONS).increment(1.0);
    let response = next.run(request).await;
    gauge!(http_metrics::ACTIVE_CONNECTIONS).decrement(1.0);

    let status = response.status().as_u16().to_string();
    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status
    )
    .increment(1);
    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint,
        labels::METHOD => method
    )
    .record(start.elapsed().as_secs_f64());

    response
}

fn cors_layer(settings: &CorsSettings) -> CorsLayer {
    let mut layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if settings.origin == "*" {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = settings
            .origin
            .split(',')
            .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(origins));
        if settings.credentials {
            // allow_credentials is rejected with wildcard origins upstream.
            layer = CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(AllowOrigin::list(
                    settings
                        .origin
                        .split(',')
                        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
                        .collect::<Vec<_>>(),
                ))
                .allow_credentials(true);
        }
    }
    layer
}

async fn healthz() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_endpoint(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Response {
    if !state.settings.metrics.enabled {
        return (axum::http::StatusCode::NOT_FOUND, "metrics disabled").into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Assemble the full router with its middleware stack.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.settings.cors);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/embeddings", post(routes::embeddings::create_embeddings))
        .route("/v1/images/generations", post(routes::images::generate_images))
        .route("/v1/images/edits", post(routes::images::edit_images))
        .route("/v1/audio/speech", post(routes::audio::create_speech))
        .route(
            "/v1/audio/transcriptions",
            post(routes::audio::create_transcription),
        )
        .route(
            "/v1/audio/translations",
            post(routes::audio::create_translation),
        )
        .route("/v1/moderations", post(routes::moderations::create_moderation))
        .route("/v1/models", get(routes::models::list_models))
        .route("/v1/models/{id}", get(routes::models::get_model))
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(SetSensitiveRequestHeadersLayer::new([
            axum::http::header::AUTHORIZATION,
        ]))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static(X_REQUEST_ID),
            MakeRequestUuid,
        ))
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()?;

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;
    Ok(())
}
