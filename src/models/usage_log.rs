use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Billing/audit record for one proxied request. Time-partitioned by
/// `created_at` in the primary store, hence the composite `(id, created_at)`
/// key — any UPDATE against this table must include `created_at` in its
/// WHERE clause to land on the right partition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageLog {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub user_oid: String,
    pub api_key_id: Option<Uuid>,
    pub app_id: Option<String>,
    pub request_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub requested_model: String,
    pub actual_model: String,
    pub endpoint_id: Option<Uuid>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub cost: Decimal,
    pub internal_cost: Decimal,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i32>,
    pub ttft_ms: Option<i32>,
    pub request_metadata: Option<Value>,
}

impl UsageLog {
    pub const STATUS_PENDING: &'static str = "pending";
    pub const STATUS_COMPLETED: &'static str = "completed";
    pub const STATUS_FAILED: &'static str = "failed";
    pub const STATUS_CANCELLED: &'static str = "cancelled";
}

/// Request metadata kept on a usage log — deliberately excludes message
/// content. See `sanitize_request_metadata`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetadata {
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stream: bool,
    pub model: String,
    pub message_count: usize,
    pub message_roles: Vec<String>,
}
