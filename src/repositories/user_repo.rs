use chrono::Utc;
use sqlx::PgPool;

use crate::errors::{GatewayError, Result};
use crate::models::user::User;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_by_oid(&self, oid: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT oid, email, display_name, payment_status, payment_valid_until,
                   webhook_url, total_cost_cache, created_at, updated_at
            FROM Users
            WHERE oid = $1
            "#,
        )
        .bind(oid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Fetch the user and, if their payment window has lapsed, persist the
    /// auto-transition to `expired` before returning — spec.md §3's
    /// "auto-transitions to expired when `payment_valid_until < today`".
    pub async fn find_and_auto_expire(&self, oid: &str) -> Result<Option<User>> {
        let Some(mut user) = self.find_by_oid(oid).await? else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        if user.should_auto_expire(today) {
            self.set_payment_status(oid, User::STATUS_EXPIRED).await?;
            user.payment_status = User::STATUS_EXPIRED.to_string();
        }

        Ok(Some(user))
    }

    pub async fn set_payment_status(&self, oid: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE Users SET payment_status = $1, updated_at = NOW() WHERE oid = $2")
            .bind(status)
            .bind(oid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub fn map_missing_user(oid: &str) -> GatewayError {
    GatewayError::Unauthorized(format!("unknown user {oid}"))
}
