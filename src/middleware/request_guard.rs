//! §4.K request guard pipeline — the auth/delegation/user-validation/
//! rate-limit/model-lookup/budget steps shared by every proxied route, run
//! in the order spec.md prescribes. Routed here as plain async functions
//! rather than `tower` middleware because each route needs its own typed
//! body (chat vs. embeddings vs. rerank) parsed exactly once — see
//! SPEC_FULL.md's "dynamic body re-reading" design note.

use axum::http::HeaderMap;
use rust_decimal::Decimal;

use crate::errors::{GatewayError, Result};
use crate::models::{ApiKey, Model, User};
use crate::services::delegation::{self, AuthRoute, DelegationFields};
use crate::services::{budget, rate_limiter};
use crate::state::AppState;

/// What survives authentication + delegation resolution: who gets billed,
/// which app (if any) namespaces the traffic, and the key object governing
/// rate limit / budget / model permission (`None` on the shared-secret route).
pub struct Guarded {
    pub billed_user_oid: String,
    pub app_id: Option<String>,
    pub api_key: Option<ApiKey>,
}

/// spec.md §4.K steps 3-5: authenticate, resolve delegation precedence,
/// validate the billed user (and app, if referenced), then rate-limit.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    client_ip: Option<&str>,
    query: DelegationFields,
    body: DelegationFields,
    embedded: DelegationFields,
) -> Result<Guarded> {
    let mut redis = state.redis.clone();
    let route = delegation::authenticate(
        headers,
        &state.config.gateway_shared_secret,
        &mut redis,
        &state.api_keys,
        state.config.api_key_cache_ttl,
        client_ip,
    )
    .await?;

    let (billed_user_oid, app_id, api_key) = match route {
        AuthRoute::SharedSecret { user_oid, app_id } => (user_oid, Some(app_id), None),
        AuthRoute::ApiKey(key) => {
            let header_fields = delegation::header_delegation(headers);
            let resolved = delegation::resolve(query, body, embedded, header_fields);
            match delegation::resolve_billing(&resolved)? {
                Some((user, app)) => (user, Some(app), Some(key)),
                None => {
                    let owner = key.user_oid.clone();
                    (owner, None, Some(key))
                }
            }
        }
    };

    validate_user(state, &billed_user_oid).await?;
    if let Some(app_id) = &app_id {
        validate_app(state, app_id).await?;
    }

    if let Some(key) = &api_key {
        rate_limiter::check(&mut redis, key.id, key.rate_limit_rpm).await?;
    }

    Ok(Guarded { billed_user_oid, app_id, api_key })
}

async fn validate_user(state: &AppState, oid: &str) -> Result<()> {
    let user = state
        .users
        .find_and_auto_expire(oid)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized(format!("unknown user {oid}")))?;

    if user.payment_status == User::STATUS_BANNED {
        return Err(GatewayError::Forbidden("account banned".into()));
    }
    if user.payment_status == User::STATUS_EXPIRED {
        return Err(GatewayError::Forbidden("payment expired".into()));
    }
    Ok(())
}

async fn validate_app(state: &AppState, app_id: &str) -> Result<()> {
    let app = state
        .apps
        .find_by_id(app_id)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized(format!("unknown app {app_id}")))?;
    if !app.is_active {
        return Err(GatewayError::Forbidden(format!("app {app_id} is disabled")));
    }
    Ok(())
}

/// Model lookup (active only) + `allowed_models` enforcement — shared by
/// chat/embeddings/rerank.
pub async fn load_model(state: &AppState, api_key: Option<&ApiKey>, model_id: &str) -> Result<Model> {
    let model = state
        .models
        .find_active(model_id)
        .await?
        .ok_or_else(|| GatewayError::ModelNotFound(model_id.to_string()))?;
    if let Some(key) = api_key {
        if !key.allows_model(model_id) {
            return Err(GatewayError::ModelNotAllowed);
        }
    }
    Ok(model)
}

/// Reserves budget for the request if the resolved key carries a monthly
/// limit; returns `0` (no-op release later) otherwise.
pub async fn reserve_budget(
    state: &AppState,
    api_key: &mut Option<ApiKey>,
    model: &Model,
    max_tokens: Option<i32>,
) -> Result<Decimal> {
    let Some(key) = api_key.as_mut() else { return Ok(Decimal::ZERO) };
    let mut redis = state.redis.clone();
    budget::reserve(
        &mut redis,
        &state.api_keys,
        key,
        model,
        max_tokens,
        state.config.budget_db_cache_ttl,
        state.config.budget_reservation_ttl,
    )
    .await
}
