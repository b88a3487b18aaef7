use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::Result;

#[derive(Clone)]
pub struct UsageLogRepository {
    pool: PgPool,
}

impl UsageLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the `pending` row. `actual_model` starts out equal to
    /// `requested_model` and is overwritten at `finalize` time if the
    /// backend substituted a different model (fallback chains, aliasing).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_pending(
        &self,
        created_at: DateTime<Utc>,
        user_oid: &str,
        api_key_id: Option<Uuid>,
        app_id: Option<&str>,
        request_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        requested_model: &str,
        request_metadata: &Value,
    ) -> Result<i64> {
        let id: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO UsageLogs (
                created_at, user_oid, api_key_id, app_id, request_id, ip_address,
                user_agent, requested_model, actual_model, status, request_metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 'pending', $9)
            RETURNING id
            "#,
        )
        .bind(created_at)
        .bind(user_oid)
        .bind(api_key_id)
        .bind(app_id)
        .bind(request_id)
        .bind(ip_address)
        .bind(user_agent)
        .bind(requested_model)
        .bind(request_metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id.0)
    }

    /// Terminal transition: `pending -> {completed, failed, cancelled}`.
    /// `created_at` must be supplied because the table is partitioned by it.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize(
        &self,
        id: i64,
        created_at: DateTime<Utc>,
        status: &str,
        actual_model: Option<&str>,
        endpoint_id: Option<Uuid>,
        input_tokens: i64,
        output_tokens: i64,
        cost: Decimal,
        internal_cost: Decimal,
        latency_ms: Option<i32>,
        ttft_ms: Option<i32>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE UsageLogs
            SET status = $1,
                actual_model = COALESCE($2, actual_model),
                endpoint_id = $3,
                input_tokens = $4,
                output_tokens = $5,
                cost = $6,
                internal_cost = $7,
                latency_ms = $8,
                ttft_ms = $9,
                error_code = $10,
                error_message = $11,
                completed_at = NOW()
            WHERE id = $12 AND created_at = $13
            "#,
        )
        .bind(status)
        .bind(actual_model)
        .bind(endpoint_id)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost)
        .bind(internal_cost)
        .bind(latency_ms)
        .bind(ttft_ms)
        .bind(error_code)
        .bind(error_message)
        .bind(id)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
