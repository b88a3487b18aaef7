use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::ApiKey;

#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = r#"
    id, user_oid, hashed_key, salt, display_prefix, allowed_models, scopes,
    allowed_ips, rate_limit_rpm, budget_monthly, usage_current_month,
    last_reset_month, label, is_active, created_by, expires_at, replaced_by,
    created_at, last_used_at
"#;

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ApiKey>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM ApiKeys WHERE id = $1");
        let key = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    /// The key-verifier's scan path (spec.md §4.C): every active key,
    /// acceptable because active-key counts are bounded by deployment size.
    pub async fn find_all_active(&self) -> Result<Vec<ApiKey>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM ApiKeys WHERE is_active = TRUE");
        let keys = sqlx::query_as::<_, ApiKey>(&sql).fetch_all(&self.pool).await?;
        Ok(keys)
    }

    pub async fn reset_monthly_usage(&self, id: Uuid, current_month: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ApiKeys SET usage_current_month = 0, last_reset_month = $1 WHERE id = $2",
        )
        .bind(current_month)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_usage(&self, id: Uuid, actual_cost: Decimal, used_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE ApiKeys SET usage_current_month = usage_current_month + $1, last_used_at = $2 WHERE id = $3",
        )
        .bind(actual_cost)
        .bind(used_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_generated(
        &self,
        user_oid: &str,
        hashed_key: &str,
        salt: &str,
        display_prefix: &str,
        label: Option<&str>,
        created_by: &str,
        rate_limit_rpm: i32,
        budget_monthly: Option<Decimal>,
    ) -> Result<ApiKey> {
        let sql = format!(
            r#"
            INSERT INTO ApiKeys (
                id, user_oid, hashed_key, salt, display_prefix, allowed_models, scopes,
                allowed_ips, rate_limit_rpm, budget_monthly, usage_current_month,
                last_reset_month, label, is_active, created_by, expires_at, replaced_by,
                created_at, last_used_at
            ) VALUES (
                $1, $2, $3, $4, $5, NULL, '["chat.completions"]'::jsonb,
                NULL, $6, $7, 0, NULL, $8, TRUE, $9, NULL, NULL, NOW(), NULL
            )
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let key = sqlx::query_as::<_, ApiKey>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_oid)
            .bind(hashed_key)
            .bind(salt)
            .bind(display_prefix)
            .bind(rate_limit_rpm)
            .bind(budget_monthly)
            .bind(label)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(key)
    }

    /// Mark `old_id` as replaced. Rotation's new-key insert happens via
    /// `insert_generated` using the old key's label + `" (Rotated)"` suffix,
    /// per the convention the original implementation used.
    pub async fn mark_replaced(&self, old_id: Uuid, new_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE ApiKeys SET replaced_by = $1, expires_at = $2 WHERE id = $3")
            .bind(new_id)
            .bind(expires_at)
            .bind(old_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
