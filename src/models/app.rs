use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Namespaces billed traffic coming from a third-party integration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct App {
    pub app_id: String,
    pub name: String,
    pub owner_id: String,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
