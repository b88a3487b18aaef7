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
use crate::models::RerankRequest;
use crate::services::delegation::DelegationFields;
use crate::services::proxy::{self, Outcome, ReservationGuard};
use crate::services::{rerank, response_sanitizer};
use crate::state::AppState;

/// Rerank has no token usage field of its own, so billing treats
/// `rerank::billed_tokens` as pseudo input tokens against zero output
/// (spec.md §4.J) — it never streams, so it finalizes through
/// `ReservationGuard` in a single shot rather than the SSE exit paths
/// `run_chat_completion` covers.
pub async fn rerank_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<DelegationQuery>,
    Json(request): Json<RerankRequest>,
) -> Result<Response> {
    let request_id = Uuid::new_v4();
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()).or_else(|| client_ip(&headers));
    let ua = user_agent(&headers);

    let query_fields = DelegationFields { x_user_oid: query.x_user_oid, x_app_id: query.x_app_id };
    let body_fields = DelegationFields {
        x_user_oid: request.x_user_oid.clone(),
        x_app_id: request.x_app_id.clone(),
    };

    let guarded = request_guard::authenticate(
        &state,
        &headers,
        ip.as_deref(),
        query_fields,
        body_fields,
        DelegationFields::default(),
    )
    .await?;
    let mut api_key = guarded.api_key;

    let model = request_guard::load_model(&state, api_key.as_ref(), &request.model).await?;

    let billed_tokens = rerank::billed_tokens(&request);
    let estimated_cost =
        request_guard::reserve_budget(&state, &mut api_key, &model, Some(billed_tokens as i32)).await?;

    let created_at = Utc::now();
    let metadata = serde_json::json!({
        "model": request.model,
        "document_count": request.documents.len(),
        "top_n": request.top_n,
    });

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
            &metadata,
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
                .finish(Outcome::Failed { code: "no_healthy_endpoint".to_string(), message: err.to_string() })
                .await;
            return Err(err);
        }
    };

    guard.record_usage(billed_tokens, 0);

    match rerank::rerank(&state.http, &endpoint, &request).await {
        Ok(body) => {
            let cleaned = response_sanitizer::clean(body);
            let _ = guard
                .finish(Outcome::Completed { actual_model: request.model.clone(), endpoint_id: Some(endpoint.id) })
                .await;
            Ok(Json(cleaned).into_response())
        }
        Err(err) => {
            let message = err.to_string();
            let _ = guard.finish(Outcome::Failed { code: "provider_error".to_string(), message: message.clone() }).await;
            Err(err)
        }
    }
}
