//! `GET /v1/models` and `GET /v1/models/{id}`.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use switchyard_protocol::{ModelList, ModelObject};

use crate::{auth, error::GatewayError, state::AppState};

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;

    let data = state
        .registry
        .known_models()
        .into_iter()
        .filter(|(model, _)| user.may_use_model(model))
        .map(|(model, owner)| ModelObject::new(model, owner))
        .collect();
    Ok(Json(ModelList::new(data)).into_response())
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let user = auth::authenticate(&state.users, &headers).await?;

    state
        .registry
        .known_models()
        .into_iter()
        .find(|(model, _)| *model == id && user.may_use_model(model))
        .map(|(model, owner)| Json(ModelObject::new(model, owner)).into_response())
        .ok_or_else(|| GatewayError::BadRequest(format!("Model {id} not found")))
}
