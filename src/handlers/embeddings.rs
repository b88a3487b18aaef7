use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::errors::Result;
use crate::handlers::{client_ip, user_agent, DelegationQuery};
use crate::middleware::request_guard;
use crate::models::chat::EmbeddingsRequest;
use crate::services::delegation::DelegationFields;
use crate::services::proxy::{self, ReservationGuard};
use crate::state::AppState;

/// Embeddings skip context validation entirely (spec.md §4.F) and call the
/// selected endpoint's HTTP URL directly rather than the `ChatBackend`
/// router (spec.md §4.I).
pub async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<DelegationQuery>,
    Json(request): Json<EmbeddingsRequest>,
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
    let estimated_cost = request_guard::reserve_budget(&state, &mut api_key, &model, None).await?;

    let created_at = Utc::now();
    let metadata = serde_json::json!({ "model": request.model });

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
                .finish(proxy::Outcome::Failed { code: "no_healthy_endpoint".to_string(), message: err.to_string() })
                .await;
            return Err(err);
        }
    };

    Ok(proxy::run_embeddings(&state.http, &endpoint, &request, guard).await)
}
