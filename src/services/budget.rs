//! §4.G Budget reservation engine — the two-phase commit across the primary
//! store and the shared fast store, plus the mid-stream kill switch.
//!
//! **Invariant**: for every key, `db_usage + sum(active_pending) <=
//! budget_monthly` at every instant, even under concurrent requests. The
//! check-and-increment in `reserve` runs as a single Lua script so no two
//! concurrent reservations can both observe room and both commit.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::{GatewayError, Result};
use crate::models::{ApiKey, Model};
use crate::repositories::ApiKeyRepository;

const RESERVE_SCRIPT: &str = r#"
local pending = tonumber(redis.call('GET', KEYS[1]) or '0')
local db_usage = tonumber(ARGV[1])
local estimated = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
if db_usage + pending + estimated > limit then
    return 0
end
redis.call('INCRBYFLOAT', KEYS[1], estimated)
redis.call('EXPIRE', KEYS[1], ttl)
return 1
"#;

fn db_cache_key(api_key_id: Uuid) -> String {
    format!("budget:db:{api_key_id}")
}

fn pending_key(api_key_id: Uuid) -> String {
    format!("budget:pending:{api_key_id}")
}

pub fn calculate_cost(input_tokens: i64, output_tokens: i64, model: &Model) -> Decimal {
    let million = Decimal::from(1_000_000);
    let input = Decimal::from(input_tokens) / million * model.input_cost;
    let output = Decimal::from(output_tokens) / million * model.output_cost;
    (input + output).round_dp(4)
}

fn estimate_cost(effective_max_tokens: i64, model: &Model) -> Decimal {
    let million = Decimal::from(1_000_000);
    Decimal::from(effective_max_tokens) / million * (model.input_cost + model.output_cost)
}

/// Atomically reserve budget for a request. Returns the estimated (reserved)
/// cost — `0` when the key has no monthly budget configured.
pub async fn reserve(
    redis: &mut ConnectionManager,
    key_repo: &ApiKeyRepository,
    api_key: &mut ApiKey,
    model: &Model,
    max_tokens: Option<i32>,
    budget_db_cache_ttl: Duration,
    reservation_ttl: Duration,
) -> Result<Decimal> {
    let current_month = chrono::Utc::now().format("%Y-%m").to_string();
    if api_key.last_reset_month.as_deref() != Some(current_month.as_str()) {
        key_repo.reset_monthly_usage(api_key.id, &current_month).await?;
        api_key.usage_current_month = Decimal::ZERO;
        api_key.last_reset_month = Some(current_month);
    }

    let Some(budget_monthly) = api_key.budget_monthly else {
        return Ok(Decimal::ZERO);
    };

    let effective_max = max_tokens
        .map(i64::from)
        .unwrap_or_else(|| model.context_window as i64 / 2);
    let estimated_cost = estimate_cost(effective_max, model);

    let db_usage = db_usage_cached(redis, api_key, budget_db_cache_ttl).await?;

    let allowed: i64 = Script::new(RESERVE_SCRIPT)
        .key(pending_key(api_key.id))
        .arg(db_usage.to_f64().unwrap_or(0.0))
        .arg(estimated_cost.to_f64().unwrap_or(0.0))
        .arg(budget_monthly.to_f64().unwrap_or(0.0))
        .arg(reservation_ttl.as_secs())
        .invoke_async(redis)
        .await?;

    if allowed == 0 {
        return Err(GatewayError::BudgetExceeded {
            current: serde_json::json!(db_usage.to_string()),
            budget: serde_json::json!(budget_monthly.to_string()),
        });
    }

    Ok(estimated_cost)
}

async fn db_usage_cached(
    redis: &mut ConnectionManager,
    api_key: &ApiKey,
    ttl: Duration,
) -> Result<Decimal> {
    let key = db_cache_key(api_key.id);
    if let Some(cached) = redis.get::<_, Option<f64>>(&key).await? {
        return Ok(Decimal::from_f64_retain(cached).unwrap_or_default());
    }
    let usage = api_key.usage_current_month;
    let _: () = redis
        .set_ex(&key, usage.to_f64().unwrap_or(0.0), ttl.as_secs())
        .await?;
    Ok(usage)
}

/// Always invoked from the proxy's exit path, on every outcome.
pub async fn release(
    redis: &mut ConnectionManager,
    key_repo: &ApiKeyRepository,
    api_key_id: Uuid,
    estimated_cost: Decimal,
    actual_cost: Decimal,
) -> Result<()> {
    if estimated_cost != Decimal::ZERO {
        let delta = -estimated_cost.to_f64().unwrap_or(0.0);
        let _: () = redis.incr(pending_key(api_key_id), delta).await?;
    }
    key_repo
        .add_usage(api_key_id, actual_cost, chrono::Utc::now())
        .await?;
    let _: () = redis.del(db_cache_key(api_key_id)).await?;
    Ok(())
}

/// Mid-stream check, re-reading the key's current usage from the primary
/// store so it reflects any reconciliation that happened since the request
/// started.
pub async fn kill_switch_triggered(
    key_repo: &ApiKeyRepository,
    api_key_id: Uuid,
    cost_so_far: Decimal,
) -> Result<bool> {
    let Some(key) = key_repo.find_by_id(api_key_id).await? else {
        return Ok(false);
    };
    let Some(budget_monthly) = key.budget_monthly else {
        return Ok(false);
    };
    Ok(key.usage_current_month + cost_so_far >= budget_monthly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_model() -> Model {
        Model {
            id: "m1".into(),
            provider: "vllm".into(),
            input_cost: dec!(1000),
            output_cost: dec!(2000),
            internal_cost: dec!(0),
            max_retries: 2,
            fallback_models: sqlx::types::Json(vec![]),
            is_active: true,
            traffic_weight: 1.0,
            model_family: None,
            context_window: 8192,
            max_output_tokens: 512,
            supports_streaming: true,
            supports_functions: false,
            supports_vision: false,
            description: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn calculate_cost_matches_s1_scenario() {
        let model = sample_model();
        let cost = calculate_cost(3, 7, &model);
        assert_eq!(cost, dec!(0.017));
    }

    #[test]
    fn estimate_cost_uses_context_window_half_when_max_tokens_absent() {
        let model = sample_model();
        let effective_max = model.context_window as i64 / 2;
        let estimated = estimate_cost(effective_max, &model);
        assert!(estimated > Decimal::ZERO);
    }
}
