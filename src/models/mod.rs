pub mod api_key;
pub mod app;
pub mod audit_log;
pub mod chat;
pub mod model;
pub mod usage_log;
pub mod user;

pub use api_key::ApiKey;
pub use app::App;
pub use audit_log::AuditLog;
pub use chat::RerankRequest;
pub use model::{HealthStatus, Model, ModelEndpoint};
pub use usage_log::UsageLog;
pub use user::User;
