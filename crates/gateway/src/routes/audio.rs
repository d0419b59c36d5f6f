//! `POST /v1/audio/speech`, `/v1/audio/transcriptions`, `/v1/audio/translations`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    extract::{ConnectInfo, Multipart, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};

use {
    switchyard_dispatch::OperationKind,
    switchyard_protocol::{SpeechRequest, TranscriptionRequest},
};

use crate::{
    auth,
    error::GatewayError,
    routes::{ClientInfo, RequestScope, enforce_verdict},
    state::AppState,
};

pub async fn create_speech(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SpeechRequest>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    auth::authorize_model(&user, &request.model)?;
    auth::authorize_credits(&user, state.schedule.audio_speech)?;

    let client = ClientInfo::from_parts(addr, &headers);
    let scope =
        RequestScope::open(&state, &user, &request.model, "/v1/audio/speech", &client).await?;

    let verdict = state.moderation.check_prompt(&request.input).await;
    enforce_verdict(&state, &scope, &user, verdict.is_flagged).await?;

    let model = request.model.clone();
    let result = state
        .dispatcher
        .execute(OperationKind::Audio, &model, 0, move |adapter, selection| {
            let mut upstream_request = request.clone();
            if let Some(sub) = &selection.sub_provider {
                upstream_request.model = sub.record().upstream_model(&upstream_request.model);
            }
            async move {
                let bytes = adapter.text_to_speech(upstream_request).await?;
                Ok((bytes, 0u32))
            }
        })
        .await;

    match result {
        Ok(success) => {
            let retry_count = success.retry_count();
            let bytes = success.value;
            scope
                .complete(
                    &user.id,
                    0,
                    state.schedule.audio_speech,
                    bytes.len() as u64,
                    retry_count,
                )
                .await;
            Ok((
                [(header::CONTENT_TYPE, "audio/mpeg")],
                bytes,
            )
                .into_response())
        },
        Err(e) => {
            let retry_count = e.retry_count();
            let err: GatewayError = e.into();
            scope.fail(&err, retry_count).await;
            Err(err)
        },
    }
}

pub async fn create_transcription(
    state: State<Arc<AppState>>,
    connect: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    transcribe(state, connect, headers, multipart, false).await
}

pub async fn create_translation(
    state: State<Arc<AppState>>,
    connect: ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    transcribe(state, connect, headers, multipart, true).await
}

async fn transcribe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Multipart,
    translate: bool,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;
    let request = parse_transcription_multipart(multipart, translate).await?;
    auth::authorize_model(&user, &request.model)?;
    auth::authorize_credits(&user, state.schedule.audio_transcription)?;

    let endpoint = if translate {
        "/v1/audio/translations"
    } else {
        "/v1/audio/transcriptions"
    };
    let client = ClientInfo::from_parts(addr, &headers);
    let scope = RequestScope::open(&state, &user, &request.model, endpoint, &client).await?;

    let model = request.model.clone();
    let result = state
        .dispatcher
        .execute(OperationKind::Audio, &model, 0, move |adapter, selection| {
            let mut upstream_request = request.clone();
            if let Some(sub) = &selection.sub_provider {
                upstream_request.model = sub.record().upstream_model(&upstream_request.model);
            }
            async move {
                let response = adapter.audio_transcription(upstream_request).await?;
                Ok((response, 0u32))
            }
        })
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
                    state.schedule.audio_transcription,
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

async fn parse_transcription_multipart(
    mut multipart: Multipart,
    translate: bool,
) -> Result<TranscriptionRequest, GatewayError> {
    let mut model = None;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut language = None;
    let mut prompt = None;
    let mut response_format = None;
    let mut temperature = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("audio.mp3").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::BadRequest(format!("reading file: {e}")))?;
                file = Some((file_name, bytes.to_vec()));
            },
            "model" => model = Some(read_text(field).await?),
            "language" => language = Some(read_text(field).await?),
            "prompt" => prompt = Some(read_text(field).await?),
            "response_format" => response_format = Some(read_text(field).await?),
            "temperature" => temperature = read_text(field).await?.parse().ok(),
            _ => {},
        }
    }

    let (file_name, file_bytes) =
        file.ok_or_else(|| GatewayError::BadRequest("missing file field".into()))?;
    let model = model.ok_or_else(|| GatewayError::BadRequest("missing model field".into()))?;

    Ok(TranscriptionRequest {
        model,
        file_name,
        file_bytes,
        language,
        prompt,
        response_format,
        temperature,
        translate,
    })
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, GatewayError> {
    field
        .text()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("malformed multipart field: {e}")))
}
