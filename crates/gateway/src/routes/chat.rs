//! `POST /v1/chat/completions`.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json,
        extract::{ConnectInfo, State},
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    tracing::debug,
};

use {
    switchyard_dispatch::{OperationKind, estimate_tokens},
    switchyard_protocol::ChatCompletionRequest,
    switchyard_providers::{ChatOutcome, ProviderError},
};

use crate::{
    auth,
    error::GatewayError,
    routes::{ClientInfo, RequestScope, enforce_verdict},
    sse::sse_response,
    state::AppState,
};

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    auth::authorize_model(&user, &request.model)?;

    let prompt_tokens = estimate_tokens(&request.prompt_text());
    let est_tokens = prompt_tokens + request.max_tokens.unwrap_or(1024);
    let est_credits = state.schedule.token_credits(&request.model, est_tokens);
    auth::authorize_credits(&user, est_credits)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope = RequestScope::open(
        &state,
        &user,
        &request.model,
        "/v1/chat/completions",
        &client,
    )
    .await?;

    let verdict = state.moderation.check_messages(&request.messages).await;
    enforce_verdict(&state, &scope, &user, verdict.is_flagged).await?;

    if request.wants_stream() {
        let outcome =
            state
                .stream_machine
                .run(scope.record_id.clone(), user.id.clone(), request);
        let stream = outcome.stream;
        let finalization = outcome.finalization;
        let record_id = scope.record_id.clone();
        tokio::spawn(async move {
            finalization.wait().await;
            debug!(request = %record_id, "stream post-response accounting done");
        });
        return Ok(sse_response(stream).into_response());
    }

    let incoming_model = request.model.clone();
    let result = state
        .dispatcher
        .execute(
            OperationKind::Chat,
            &incoming_model,
            est_tokens,
            move |adapter, selection| {
                let mut upstream_request = request.clone();
                if let Some(sub) = &selection.sub_provider {
                    upstream_request.model = sub.record().upstream_model(&upstream_request.model);
                }
                async move {
                    match adapter.chat_completion(upstream_request).await? {
                        ChatOutcome::Buffered(response) => {
                            let tokens = response
                                .usage
                                .map(|u| u.total_tokens)
                                .unwrap_or(0);
                            Ok((response, tokens))
                        },
                        ChatOutcome::Stream(_) => Err(ProviderError::InvalidResponse(
                            "adapter streamed a buffered request".into(),
                        )),
                    }
                }
            },
        )
        .await;

    match result {
        Ok(success) => {
            let retry_count = success.retry_count();
            let mut response = success.value;
            // The caller sees the model they asked for, not the mapped id.
            response.model = incoming_model.clone();

            let tokens_used = response
                .usage
                .map(|u| u.total_tokens)
                .filter(|t| *t > 0)
                .unwrap_or_else(|| {
                    let completion: u32 = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.as_deref())
                        .map(estimate_tokens)
                        .unwrap_or(0);
                    prompt_tokens + completion
                });
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
