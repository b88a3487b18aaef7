use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::repositories::{
    ApiKeyRepository, AppRepository, AuditLogRepository, ModelRepository, UsageLogRepository,
    UserRepository,
};
use crate::services::proxy::backend::{ChatBackend, HttpChatBackend};

/// Shared, cloneable application state injected into every handler.
///
/// `ConnectionManager` is itself cheaply cloneable (it multiplexes over one
/// logical connection with auto-reconnect), so no `Arc` wrapper is needed for
/// it the way the primary-store pool needs one for its config. Repositories
/// wrap a `PgPool` clone each and are cheap to carry by value.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,

    pub api_keys: ApiKeyRepository,
    pub apps: AppRepository,
    pub users: UserRepository,
    pub models: ModelRepository,
    pub usage_logs: UsageLogRepository,
    pub audit_logs: AuditLogRepository,

    pub chat_backend: Arc<dyn ChatBackend>,
}

impl AppState {
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let db = config.database.connect().await?;
        let redis = config.redis.connect().await?;
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client builds");

        let api_keys = ApiKeyRepository::new(db.clone());
        let apps = AppRepository::new(db.clone());
        let users = UserRepository::new(db.clone());
        let models = ModelRepository::new(db.clone());
        let usage_logs = UsageLogRepository::new(db.clone());
        let audit_logs = AuditLogRepository::new(db.clone());
        let chat_backend: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(http.clone()));

        Ok(Self {
            db,
            redis,
            config: Arc::new(config),
            http,
            api_keys,
            apps,
            users,
            models,
            usage_logs,
            audit_logs,
            chat_backend,
        })
    }
}
