//! `POST /v1/moderations`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use {
    switchyard_dispatch::OperationKind,
    switchyard_protocol::ModerationRequest,
};

use crate::{
    auth,
    error::GatewayError,
    routes::{ClientInfo, RequestScope},
    state::AppState,
};

const DEFAULT_MODERATION_MODEL: &str = "omni-moderation-latest";

pub async fn create_moderation(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ModerationRequest>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODERATION_MODEL.to_string());
    auth::authorize_model(&user, &model)?;
    auth::authorize_credits(&user, state.schedule.moderation)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope = RequestScope::open(&state, &user, &model, "/v1/moderations", &client).await?;

    let resolved_model = model.clone();
    let result = state
        .dispatcher
        .execute(
            OperationKind::Moderation,
            &model,
            0,
            move |adapter, selection| {
                let mut upstream_request = request.clone();
                if let Some(sub) = &selection.sub_provider {
                    upstream_request.model =
                        Some(sub.record().upstream_model(&resolved_model));
                }
                async move {
                    let response = adapter.moderate_content(upstream_request).await?;
                    Ok((response, 0u32))
                }
            },
        )
        .await;

    match result {
        Ok(success) => {
            let retry_count = success.retry_count();
            let response = success.value;
            let response_size = serde_json::to_vec(&response).map(|b| b.len()).unwrap_or(0) as u64;
            scope
                .complete(
                    &user.id,
                    0,
                    state.schedule.moderation,
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
