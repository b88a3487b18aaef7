use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A logical model offering. Pricing is immutable within a given usage log —
/// cost is captured at completion time from whatever row this was when the
/// request started.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Model {
    pub id: String,
    pub provider: String,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub internal_cost: Decimal,
    pub max_retries: i32,
    pub fallback_models: Json<Vec<String>>,
    pub is_active: bool,
    pub traffic_weight: f64,
    pub model_family: Option<String>,
    pub context_window: i32,
    pub max_output_tokens: i32,
    pub supports_streaming: bool,
    pub supports_functions: bool,
    pub supports_vision: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

impl HealthStatus {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded | Self::Unknown)
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "down" => Ok(Self::Down),
            _ => Ok(Self::Unknown),
        }
    }
}

/// One concrete backend serving a model. `routing_priority` is lower =
/// preferred; only endpoints that are active and have an eligible health
/// status participate in selection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelEndpoint {
    pub id: Uuid,
    pub model_id: String,
    pub endpoint_type: String,
    pub base_url: String,
    pub api_key_ref: Option<String>,
    pub routing_priority: i32,
    pub routing_strategy: String,
    pub health_check_url: Option<String>,
    pub health_check_interval: i32,
    pub health_check_timeout: i32,
    pub next_check_at: Option<DateTime<Utc>>,
    pub timeout_seconds: i32,
    pub max_concurrent_requests: i32,
    pub is_active: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_status: String,
    pub consecutive_failures: i32,
    pub avg_latency_ms: i32,
    pub total_requests: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelEndpoint {
    pub fn health(&self) -> HealthStatus {
        self.health_status.parse().unwrap_or(HealthStatus::Unknown)
    }

    pub fn is_eligible(&self) -> bool {
        self.is_active && self.health().is_eligible()
    }

    /// Resolve the endpoint's secret reference to an actual value from the
    /// process environment. `"EMPTY"` or a missing env var both resolve to
    /// `"EMPTY"` (the upstream's sentinel for "no credential needed").
    pub fn resolve_api_key(&self) -> String {
        match &self.api_key_ref {
            None => "EMPTY".to_string(),
            Some(name) => std::env::var(name).unwrap_or_else(|_| "EMPTY".to_string()),
        }
    }

    pub fn health_probe_url(&self) -> String {
        self.health_check_url
            .clone()
            .unwrap_or_else(|| format!("{}/health", self.base_url.trim_end_matches('/')))
    }
}
