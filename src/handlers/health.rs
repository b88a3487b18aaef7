use axum::Json;
use serde_json::{json, Value};

/// `GET /health` — always public, never touches the guard pipeline
/// (spec.md §4.K step 1).
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
