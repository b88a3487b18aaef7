//! `GET /v1/models`, `GET /v1/models/{id}` — OpenAI-style model listing.
//! Public per spec.md §4.K step 1; never runs the guard pipeline.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::{GatewayError, Result};
use crate::models::Model;
use crate::state::AppState;

fn as_openai_model(model: &Model) -> Value {
    json!({
        "id": model.id,
        "object": "model",
        "created": model.created_at.timestamp(),
        "owned_by": model.provider,
    })
}

pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>> {
    let models = state.models.list_active().await?;
    let data: Vec<Value> = models.iter().map(as_openai_model).collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let model = state
        .models
        .find_active(&id)
        .await?
        .ok_or_else(|| GatewayError::ModelNotFound(id.clone()))?;
    Ok(Json(as_openai_model(&model)))
}
