use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Model, ModelEndpoint};

#[derive(Clone)]
pub struct ModelRepository {
    pool: PgPool,
}

impl ModelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_active(&self, id: &str) -> Result<Option<Model>> {
        let model = sqlx::query_as::<_, Model>(
            r#"
            SELECT id, provider, input_cost, output_cost, internal_cost, max_retries,
                   fallback_models, is_active, traffic_weight, model_family,
                   context_window, max_output_tokens, supports_streaming,
                   supports_functions, supports_vision, description, created_at, updated_at
            FROM Models
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(model)
    }

    pub async fn list_active(&self) -> Result<Vec<Model>> {
        let models = sqlx::query_as::<_, Model>(
            r#"
            SELECT id, provider, input_cost, output_cost, internal_cost, max_retries,
                   fallback_models, is_active, traffic_weight, model_family,
                   context_window, max_output_tokens, supports_streaming,
                   supports_functions, supports_vision, description, created_at, updated_at
            FROM Models
            WHERE is_active = TRUE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(models)
    }

    /// Eligible endpoints for a model (spec.md §4.H selector input).
    pub async fn eligible_endpoints(&self, model_id: &str) -> Result<Vec<ModelEndpoint>> {
        let endpoints = sqlx::query_as::<_, ModelEndpoint>(
            r#"
            SELECT id, model_id, endpoint_type, base_url, api_key_ref, routing_priority,
                   routing_strategy, health_check_url, health_check_interval,
                   health_check_timeout, next_check_at, timeout_seconds,
                   max_concurrent_requests, is_active, last_health_check, health_status,
                   consecutive_failures, avg_latency_ms, total_requests, created_at, updated_at
            FROM ModelEndpoints
            WHERE model_id = $1 AND is_active = TRUE
              AND health_status IN ('healthy', 'degraded', 'unknown')
            ORDER BY routing_priority ASC
            "#,
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    /// Due-for-probe endpoints, ordered by due time (spec.md §4.H health loop
    /// step 1).
    pub async fn due_for_health_check(&self, batch_size: i64) -> Result<Vec<ModelEndpoint>> {
        let endpoints = sqlx::query_as::<_, ModelEndpoint>(
            r#"
            SELECT id, model_id, endpoint_type, base_url, api_key_ref, routing_priority,
                   routing_strategy, health_check_url, health_check_interval,
                   health_check_timeout, next_check_at, timeout_seconds,
                   max_concurrent_requests, is_active, last_health_check, health_status,
                   consecutive_failures, avg_latency_ms, total_requests, created_at, updated_at
            FROM ModelEndpoints
            WHERE is_active = TRUE AND (next_check_at IS NULL OR next_check_at <= NOW())
            ORDER BY next_check_at ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    pub async fn mark_healthy(
        &self,
        id: Uuid,
        avg_latency_ms: i32,
        next_check_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ModelEndpoints
            SET health_status = 'healthy', consecutive_failures = 0,
                avg_latency_ms = $1, next_check_at = $2, last_health_check = NOW()
            WHERE id = $3
            "#,
        )
        .bind(avg_latency_ms)
        .bind(next_check_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_degraded(&self, id: Uuid, next_check_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ModelEndpoints
            SET health_status = 'degraded', consecutive_failures = consecutive_failures + 1,
                next_check_at = $1, last_health_check = NOW()
            WHERE id = $2
            "#,
        )
        .bind(next_check_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        id: Uuid,
        new_status: &str,
        next_check_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ModelEndpoints
            SET health_status = $1, consecutive_failures = consecutive_failures + 1,
                next_check_at = $2, last_health_check = NOW()
            WHERE id = $3
            "#,
        )
        .bind(new_status)
        .bind(next_check_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
