use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_gateway::config::AppConfig;
use llm_gateway::handlers::{chat, embeddings, health, internal, models, rerank};
use llm_gateway::middleware::{metrics_middleware, request_id_middleware, security_headers_middleware};
use llm_gateway::services::health_check;
use llm_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "llm_gateway=info,tower_http=info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = config.server_address().parse()?;
    let state = AppState::from_config(config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(health_check::run(
        state.models.clone(),
        state.http.clone(),
        state.config.health_check_poll_interval,
        state.config.health_check_batch_size,
        shutdown_rx,
    ));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/:id", get(models::get_model))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/embeddings", post(embeddings::embeddings))
        .route("/v1/rerank", post(rerank::rerank_documents))
        .route("/internal/api-keys/:id/rotate", post(internal::rotate_api_key))
        .route("/internal/performance/metrics", get(internal::performance_metrics))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .with_state(state);

    tracing::info!(%addr, "starting llm-gateway");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
