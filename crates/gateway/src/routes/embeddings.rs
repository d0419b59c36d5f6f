//! `POST /v1/embeddings`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use {
    switchyard_dispatch::OperationKind,
    switchyard_protocol::EmbeddingRequest,
};

use crate::{
    auth,
    error::GatewayError,
    routes::{ClientInfo, RequestScope},
    state::AppState,
};

pub async fn create_embeddings(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    auth::authorize_model(&user, &request.model)?;

    let est_tokens = (request.input.char_len().div_ceil(4)) as u32;
    let est_credits = state.schedule.token_credits(&request.model, est_tokens);
    auth::authorize_credits(&user, est_credits)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope =
        RequestScope::open(&state, &user, &request.model, "/v1/embeddings", &client).await?;

    let incoming_model = request.model.clone();
    let result = state
        .dispatcher
        .execute(
            OperationKind::Embeddings,
            &incoming_model,
            est_tokens,
            move |adapter, selection| {
                let mut upstream_request = request.clone();
                if let Some(sub) = &selection.sub_provider {
                    upstream_request.model = sub.record().upstream_model(&upstream_request.model);
                }
                async move {
                    let response = adapter.create_embeddings(upstream_request).await?;
                    let tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0);
                    Ok((response, tokens))
                }
            },
        )
        .await;

    match result {
        Ok(success) => {
            let retry_count = success.retry_count();
            let mut response = success.value;
            response.model = incoming_model.clone();

            let tokens_used = response
                .usage
                .map(|u| u.total_tokens)
                .filter(|t| *t > 0)
                .unwrap_or(est_tokens);
            let credits = state.schedule.token_credits(&incoming_model, tokens_used);
            let response_size = serde_json::to_vec(&response).map(|b| b.len()).unwrap_or(0) as u64;

            scope
                .complete(
                    &user.id,
                    tokens_used,
                    credits,
                    response_size,
                    retry_count,
                )
                .await;
            Ok(Json(response).into_response())
        },
        Err(e) => {
            let retry_count = e.retry_count();
            let err: GatewayError = e.into();
            scope.fail(&err, retry_count).await;
            Err(err)
        },
    }
}
