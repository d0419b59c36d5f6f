//! `POST /v1/images/generations` and `POST /v1/images/edits`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::{ConnectInfo, Multipart, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use {
    switchyard_dispatch::OperationKind,
    switchyard_protocol::{ImageEditRequest, ImageGenerationRequest},
};

use crate::{
    auth,
    error::GatewayError,
    routes::{ClientInfo, RequestScope, enforce_verdict},
    state::AppState,
};

const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

pub async fn generate_images(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ImageGenerationRequest>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
    auth::authorize_model(&user, &model)?;
    auth::authorize_credits(&user, state.schedule.image_generation)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope =
        RequestScope::open(&state, &user, &model, "/v1/images/generations", &client).await?;

    let verdict = state.moderation.check_prompt(&request.prompt).await;
    enforce_verdict(&state, &scope, &user, verdict.is_flagged).await?;

    let credits = state.schedule.image_generation;
    let resolved_model = model.clone();
    let result = state
        .dispatcher
        .execute(OperationKind::Images, &model, 0, move |adapter, selection| {
            let mut upstream_request = request.clone();
            if let Some(sub) = &selection.sub_provider {
                upstream_request.model = Some(sub.record().upstream_model(&resolved_model));
            }
            async move {
                let response = adapter.generate_images(upstream_request).await?;
                Ok((response, 0u32))
            }
        })
        .await;

    respond(scope, &user.id, credits, result).await
}

pub async fn edit_images(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    let request = parse_edit_multipart(multipart).await?;
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| "gpt-image-1".to_string());
    auth::authorize_model(&user, &model)?;
    auth::authorize_credits(&user, state.schedule.image_edit)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope = RequestScope::open(&state, &user, &model, "/v1/images/edits", &client).await?;

    let verdict = state.moderation.check_prompt(&request.prompt).await;
    enforce_verdict(&state, &scope, &user, verdict.is_flagged).await?;

    let credits = state.schedule.image_edit;
    let resolved_model = model.clone();
    let result = state
        .dispatcher
        .execute(OperationKind::Images, &model, 0, move |adapter, selection| {
            let mut upstream_request = request.clone();
            if let Some(sub) = &selection.sub_provider {
                upstream_request.model = Some(sub.record().upstream_model(&resolved_model));
            }
            async move {
                let response = adapter.edit_images(upstream_request).await?;
                Ok((response, 0u32))
            }
        })
        .await;

    respond(scope, &user.id, credits, result).await
}

async fn respond(
    scope: RequestScope,
    user_id: &str,
    credits: f64,
    result: Result<
        switchyard_dispatch::DispatchSuccess<switchyard_protocol::ImageResponse>,
        switchyard_dispatch::DispatchError,
    >,
) -> Result<Response, GatewayError> {
    match result {
        Ok(success) => {
            let retry_count = success.retry_count();
            let response = success.value;
            let response_size = serde_json::to_vec(&response).map(|b| b.len()).unwrap_or(0) as u64;
            scope
                .complete(user_id, 0, credits, response_size, retry_count)
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

/// Flatten the multipart body into the unified edit request.
async fn parse_edit_multipart(mut multipart: Multipart) -> Result<ImageEditRequest, GatewayError> {
    let mut prompt = None;
    let mut model = None;
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut mask = None;
    let mut n = None;
    let mut size = None;
    let mut response_format = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("image.png").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::BadRequest(format!("reading image: {e}")))?;
                image = Some((file_name, bytes.to_vec()));
            },
            "mask" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::BadRequest(format!("reading mask: {e}")))?;
                mask = Some(bytes.to_vec());
            },
            "prompt" => prompt = Some(read_text(field).await?),
            "model" => model = Some(read_text(field).await?),
            "n" => n = read_text(field).await?.parse().ok(),
            "size" => size = Some(read_text(field).await?),
            "response_format" => response_format = Some(read_text(field).await?),
            _ => {},
        }
    }

    let (image_name, image) =
        image.ok_or_else(|| GatewayError::BadRequest("missing image field".into()))?;
    let prompt = prompt.ok_or_else(|| GatewayError::BadRequest("missing prompt field".into()))?;

    Ok(ImageEditRequest {
        model,
        prompt,
        image,
        image_name,
        mask,
        n,
        size,
        response_format,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, GatewayError> {
    field
        .text()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("malformed multipart field: {e}")))
}
