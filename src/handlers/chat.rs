use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::errors::Result;
use crate::handlers::{client_ip, user_agent, DelegationQuery};
use crate::middleware::request_guard;
use crate::models::chat::ChatCompletionRequest;
use crate::models::usage_log::RequestMetadata;
use crate::services::delegation::{self, DelegationFields};
use crate::services::proxy::{self, ReservationGuard};
use crate::services::{context_validator, response_sanitizer};
use crate::state::AppState;

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<DelegationQuery>,
    Json(mut request): Json<ChatCompletionRequest>,
) -> Result<Response> {
    let request_id = Uuid::new_v4();
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()).or_else(|| client_ip(&headers));
    let ua = user_agent(&headers);

    let query_fields = DelegationFields { x_user_oid: query.x_user_oid, x_app_id: query.x_app_id };
    let body_fields = DelegationFields {
        x_user_oid: request.x_user_oid.clone(),
        x_app_id: request.x_app_id.clone(),
    };
    let embedded_fields = delegation::extract_embedded_delegation(&mut request.messages);

    let guarded =
        request_guard::authenticate(&state, &headers, ip.as_deref(), query_fields, body_fields, embedded_fields)
            .await?;
    let mut api_key = guarded.api_key;

    let model = request_guard::load_model(&state, api_key.as_ref(), &request.model).await?;

    if request.messages.iter().any(|m| m.has_image()) && !model.supports_vision {
        return Err(crate::errors::GatewayError::VisionNotSupported);
    }

    context_validator::validate(&request.messages, request.max_tokens, &model)?;

    let estimated_cost = request_guard::reserve_budget(&state, &mut api_key, &model, request.max_tokens).await?;

    let created_at = Utc::now();
    let metadata = RequestMetadata {
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        stream: request.stream,
        model: request.model.clone(),
        message_count: request.messages.len(),
        message_roles: request.messages.iter().map(|m| m.role.clone()).collect(),
    };

    let usage_log_id = state
        .usage_logs
        .create_pending(
            created_at,
            &guarded.billed_user_oid,
            api_key.as_ref().map(|k| k.id),
            guarded.app_id.as_deref(),
            &request_id.to_string(),
            ip.as_deref(),
            ua.as_deref(),
            &request.model,
            &serde_json::to_value(&metadata).unwrap_or(serde_json::Value::Null),
        )
        .await?;

    let guard = ReservationGuard::new(
        state.usage_logs.clone(),
        state.api_keys.clone(),
        state.redis.clone(),
        usage_log_id,
        created_at,
        api_key.as_ref().map(|k| k.id),
        estimated_cost,
        model.clone(),
    );

    let endpoint = match proxy::select_endpoint(&state.models, &request.model).await {
        Ok(endpoint) => endpoint,
        Err(err) => {
            let _ = guard
                .finish(proxy::Outcome::Failed { code: "no_healthy_endpoint".to_string(), message: err.to_string() })
                .await;
            return Err(err);
        }
    };

    Ok(proxy::run_chat_completion(state.chat_backend.clone(), endpoint, request, guard).await)
}

/// Adapts a non-streaming sanitized body for direct `axum::Json` responses,
/// used by tests that call the proxy module without the full HTTP stack.
#[allow(dead_code)]
pub(crate) fn sanitized_json(value: serde_json::Value) -> Response {
    axum::Json(response_sanitizer::clean(value)).into_response()
}
