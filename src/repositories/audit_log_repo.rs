use serde_json::Value;
use sqlx::PgPool;

use crate::errors::Result;

#[derive(Clone)]
pub struct AuditLogRepository {
    pool: PgPool,
}

impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(
        &self,
        admin_oid: &str,
        action: &str,
        target_type: Option<&str>,
        target_id: Option<&str>,
        metadata: Option<&Value>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO AuditLogs (admin_oid, action, target_type, target_id, metadata, timestamp, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7)
            "#,
        )
        .bind(admin_oid)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(metadata)
        .bind(ip_address)
        .bind(user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
