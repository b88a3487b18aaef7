//! Internal operator surface (spec.md §6): key rotation and the performance
//! metrics envelope. Both sit behind the same shared-secret header the
//! proxy routes use for their service-to-service auth route (spec.md §4.D
//! Route 1), since neither is meant to be reachable by ordinary API-key
//! callers.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{GatewayError, Result};
use crate::middleware::metrics;
use crate::models::api_key::generate_api_key;
use crate::state::AppState;

/// Grace window before an old key's `expires_at`, after which the rotated-out
/// key is rejected by `ApiKey::is_expired`. Chosen to give in-flight clients
/// a working day to pick up the new credential.
const GRACE_PERIOD_HOURS: i64 = 24;

fn require_gateway_secret(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let provided = headers
        .get("x-gateway-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Unauthorized("X-Gateway-Secret required".into()))?;
    if provided != state.config.gateway_shared_secret {
        return Err(GatewayError::Unauthorized("invalid gateway secret".into()));
    }
    Ok(())
}

pub async fn rotate_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    require_gateway_secret(&state, &headers)?;

    let old_key = state
        .api_keys
        .find_by_id(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("api key {id}")))?;

    let generated = generate_api_key();
    let label = old_key
        .label
        .as_deref()
        .map(|l| format!("{l} (Rotated)"))
        .or_else(|| Some("(Rotated)".to_string()));

    let new_key = state
        .api_keys
        .insert_generated(
            &old_key.user_oid,
            &generated.hashed_key,
            &generated.salt,
            &generated.display_prefix,
            label.as_deref(),
            "internal-rotation",
            old_key.rate_limit_rpm,
            old_key.budget_monthly,
        )
        .await?;

    let expires_at = Utc::now() + ChronoDuration::hours(GRACE_PERIOD_HOURS);
    state.api_keys.mark_replaced(old_key.id, new_key.id, expires_at).await?;

    state
        .audit_logs
        .log(
            &old_key.user_oid,
            "api_key.rotate",
            Some("api_key"),
            Some(&old_key.id.to_string()),
            Some(&json!({ "new_key_id": new_key.id })),
            None,
            None,
        )
        .await?;

    Ok(Json(json!({
        "old_key_id": old_key.id,
        "new_key_id": new_key.id,
        "new_key": generated.plaintext,
        "display_prefix": new_key.display_prefix,
        "expires_at": expires_at,
        "grace_period_hours": GRACE_PERIOD_HOURS,
        "warning": "store new_key now — it will not be shown again",
    })))
}

pub async fn performance_metrics(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>> {
    require_gateway_secret(&state, &headers)?;

    let database = json!({
        "size": state.db.size(),
        "idle": state.db.num_idle(),
    });

    let redis_ok = {
        let mut conn = state.redis.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok()
    };

    Ok(Json(json!({
        "metrics": metrics::collect_metrics_json(),
        "database": database,
        "redis": { "connected": redis_ok },
    })))
}
