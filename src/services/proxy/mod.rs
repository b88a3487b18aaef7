//! §4.I streaming proxy — the component that actually calls a backend,
//! forwards its response (buffered or as SSE), and guarantees the usage log
//! and budget reservation are finalized/released on every exit path
//! (success, backend error, mid-stream kill switch, client disconnect).

pub mod backend;
pub mod sse;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{GatewayError, Result};
use crate::models::chat::{ChatCompletionRequest, EmbeddingsRequest};
use crate::models::{Model, ModelEndpoint, UsageLog};
use crate::repositories::{ApiKeyRepository, UsageLogRepository};
use crate::services::{budget, endpoint_selector, error_classifier, response_sanitizer};

use backend::{ChatBackend, ChatCompletionResponseStream};
use sse::SseEventSplitter;

/// Every exit path (success, backend error, mid-stream cancellation, client
/// disconnect) must release the reservation and move the usage log out of
/// `pending` exactly once. `finish` takes that path explicitly; `Drop`
/// covers the path no one expected — a cancelled future, most commonly a
/// client disconnect mid-stream.
pub struct ReservationGuard {
    state: Option<GuardState>,
}

struct GuardState {
    usage_repo: UsageLogRepository,
    key_repo: ApiKeyRepository,
    redis: ConnectionManager,
    usage_log_id: i64,
    created_at: DateTime<Utc>,
    api_key_id: Option<Uuid>,
    estimated_cost: Decimal,
    model: Model,
    input_tokens: Arc<AtomicI64>,
    output_tokens: Arc<AtomicI64>,
    started_at: std::time::Instant,
    ttft_ms: Arc<AtomicI64>,
}

pub enum Outcome {
    Completed { actual_model: String, endpoint_id: Option<Uuid> },
    Failed { code: String, message: String },
    Cancelled { code: &'static str },
}

impl ReservationGuard {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        usage_repo: UsageLogRepository,
        key_repo: ApiKeyRepository,
        redis: ConnectionManager,
        usage_log_id: i64,
        created_at: DateTime<Utc>,
        api_key_id: Option<Uuid>,
        estimated_cost: Decimal,
        model: Model,
    ) -> Self {
        Self {
            state: Some(GuardState {
                usage_repo,
                key_repo,
                redis,
                usage_log_id,
                created_at,
                api_key_id,
                estimated_cost,
                model,
                input_tokens: Arc::new(AtomicI64::new(0)),
                output_tokens: Arc::new(AtomicI64::new(0)),
                started_at: std::time::Instant::now(),
                ttft_ms: Arc::new(AtomicI64::new(-1)),
            }),
        }
    }

    pub fn record_usage(&self, input_tokens: i64, output_tokens: i64) {
        if let Some(state) = &self.state {
            state.input_tokens.store(input_tokens, Ordering::Relaxed);
            state.output_tokens.store(output_tokens, Ordering::Relaxed);
        }
    }

    pub fn record_first_byte(&self) {
        if let Some(state) = &self.state {
            if state.ttft_ms.load(Ordering::Relaxed) < 0 {
                state
                    .ttft_ms
                    .store(state.started_at.elapsed().as_millis() as i64, Ordering::Relaxed);
            }
        }
    }

    /// Current `(input_tokens, output_tokens)` snapshot, used by the
    /// mid-stream kill switch.
    pub fn tokens_so_far(&self) -> (i64, i64) {
        match &self.state {
            Some(state) => (
                state.input_tokens.load(Ordering::Relaxed),
                state.output_tokens.load(Ordering::Relaxed),
            ),
            None => (0, 0),
        }
    }

    pub fn cost_so_far(&self) -> Decimal {
        match &self.state {
            Some(state) => {
                let (input, output) = self.tokens_so_far();
                budget::calculate_cost(input, output, &state.model)
            }
            None => Decimal::ZERO,
        }
    }

    /// Normal exit path. Consumes the guard so `Drop` becomes a no-op.
    pub async fn finish(mut self, outcome: Outcome) -> Result<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        finalize(state, outcome).await
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else { return };
        tracing::warn!(
            usage_log_id = state.usage_log_id,
            "usage log finalized via drop guard — client disconnected or task cancelled"
        );
        tokio::spawn(async move {
            let outcome = Outcome::Cancelled { code: "client_disconnected" };
            if let Err(err) = finalize(state, outcome).await {
                tracing::error!(error = ?err, "drop-guard finalize failed");
            }
        });
    }
}

async fn finalize(mut state: GuardState, outcome: Outcome) -> Result<()> {
    let (input_tokens, output_tokens) = (
        state.input_tokens.load(Ordering::Relaxed),
        state.output_tokens.load(Ordering::Relaxed),
    );
    let latency_ms = state.started_at.elapsed().as_millis() as i32;
    let ttft = state.ttft_ms.load(Ordering::Relaxed);
    let ttft_ms = if ttft >= 0 { Some(ttft) } else { None };

    let (status, actual_model, endpoint_id, cost, error_code, error_message) = match &outcome {
        Outcome::Completed { actual_model, endpoint_id } => (
            UsageLog::STATUS_COMPLETED,
            Some(actual_model.as_str()),
            *endpoint_id,
            budget::calculate_cost(input_tokens, output_tokens, &state.model),
            None,
            None,
        ),
        Outcome::Failed { code, message } => (
            UsageLog::STATUS_FAILED,
            None,
            None,
            budget::calculate_cost(input_tokens, output_tokens, &state.model),
            Some(code.as_str()),
            Some(message.as_str()),
        ),
        Outcome::Cancelled { code } => (
            UsageLog::STATUS_CANCELLED,
            None,
            None,
            budget::calculate_cost(input_tokens, output_tokens, &state.model),
            Some(*code),
            None,
        ),
    };

    state
        .usage_repo
        .finalize(
            state.usage_log_id,
            state.created_at,
            status,
            actual_model,
            endpoint_id,
            input_tokens,
            output_tokens,
            cost,
            Decimal::ZERO,
            Some(latency_ms),
            ttft_ms,
            error_code,
            error_message,
        )
        .await?;

    if let Some(api_key_id) = state.api_key_id {
        budget::release(&mut state.redis, &state.key_repo, api_key_id, state.estimated_cost, cost).await?;
    }

    Ok(())
}

/// Number of forwarded chunks between kill-switch checks (spec.md §4.G).
const KILL_SWITCH_EVERY_N_CHUNKS: u32 = 50;

/// Picks one eligible endpoint for `model_id`, per spec.md §4.H.
pub async fn select_endpoint(
    model_repo: &crate::repositories::ModelRepository,
    model_id: &str,
) -> Result<ModelEndpoint> {
    let candidates = model_repo.eligible_endpoints(model_id).await?;
    endpoint_selector::select(&candidates).map(|e| e.clone())
}

/// Runs a non-streaming or streaming chat completion against the selected
/// endpoint, returning a ready-to-send `axum` response. The guard is
/// finalized on every branch before returning.
pub async fn run_chat_completion(
    chat_backend: Arc<dyn ChatBackend>,
    endpoint: ModelEndpoint,
    request: ChatCompletionRequest,
    guard: ReservationGuard,
) -> Response {
    let wants_stream = request.stream;

    match chat_backend.complete(&endpoint, &request).await {
        Ok(ChatCompletionResponseStream::Buffered(body)) => {
            let usage = sse::extract_usage(&serde_json::to_vec(&body).unwrap_or_default());
            if let Some(usage) = usage {
                guard.record_usage(usage.prompt_tokens, usage.completion_tokens);
            }
            let actual_model = body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&request.model)
                .to_string();
            let cleaned = response_sanitizer::clean(body);
            let _ = guard
                .finish(Outcome::Completed { actual_model, endpoint_id: Some(endpoint.id) })
                .await;
            axum::Json(cleaned).into_response()
        }
        Ok(ChatCompletionResponseStream::Streaming(upstream)) => {
            stream_response(upstream, guard, endpoint.id, wants_stream)
        }
        Err(GatewayError::Backend { code, message }) => {
            let sanitized = error_classifier::sanitize(&message);
            let _ = guard
                .finish(Outcome::Failed { code: code.clone(), message: message.clone() })
                .await;
            bad_gateway_body(&code, &sanitized)
        }
        Err(other) => {
            let message = other.to_string();
            let _ = guard
                .finish(Outcome::Failed { code: "provider_error".to_string(), message: message.clone() })
                .await;
            bad_gateway_body("provider_error", &message)
        }
    }
}

fn bad_gateway_body(code: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "code": code, "message": message, "type": "provider_error" }
    });
    (StatusCode::BAD_GATEWAY, axum::Json(body)).into_response()
}

/// Consumes the backend's raw SSE byte stream, re-frames it, runs the
/// kill-switch every `KILL_SWITCH_EVERY_N_CHUNKS` chunks, and finalizes the
/// usage log on natural completion, kill-switch trip, or backend error.
fn stream_response(
    mut upstream: futures::stream::BoxStream<'static, Result<Bytes>>,
    guard: ReservationGuard,
    endpoint_id: Uuid,
    _wants_stream: bool,
) -> Response {
    let output = async_stream::stream! {
        let mut splitter = SseEventSplitter::default();
        let mut chunk_count: u32 = 0;
        let mut first_byte = true;
        let mut final_model: Option<String> = None;

        loop {
            let next = upstream.next().await;
            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => {
                    let message = err.to_string();
                    let sanitized = error_classifier::sanitize(&message);
                    let event = serde_json::json!({ "error": sanitized, "code": "provider_error" });
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(
                        format!("data: {event}\n\n{}", sse::DONE_EVENT),
                    ));
                    let _ = guard.finish(Outcome::Failed { code: "provider_error".to_string(), message }).await;
                    return;
                }
                None => break,
            };

            splitter.push(&bytes);
            while let Some(event) = splitter.next_event() {
                if first_byte {
                    guard.record_first_byte();
                    first_byte = false;
                }

                if let Some(usage) = sse::extract_usage(&event) {
                    guard.record_usage(usage.prompt_tokens, usage.completion_tokens);
                }
                if let Ok(value) = serde_json::from_slice::<Value>(&event) {
                    if let Some(model) = value.get("model").and_then(Value::as_str) {
                        final_model = Some(model.to_string());
                    }
                    let cleaned = response_sanitizer::clean(value);
                    yield Ok(Bytes::from(sse::frame_event(&cleaned)));
                }

                chunk_count += 1;
                if chunk_count % KILL_SWITCH_EVERY_N_CHUNKS == 0 {
                    let (_, output_tokens) = guard.tokens_so_far();
                    let cost_so_far = guard.cost_so_far();
                    let triggered = matches!(
                        kill_switch_check(&guard, cost_so_far).await,
                        Ok(true)
                    );
                    let _ = output_tokens;
                    if triggered {
                        yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(
                            "data: {\"error\":\"budget exceeded\",\"code\":\"budget_exceeded_during_stream\"}\n\n".to_string(),
                        ));
                        yield Ok(Bytes::from(sse::DONE_EVENT));
                        let _ = guard
                            .finish(Outcome::Cancelled { code: "budget_exceeded_during_stream" })
                            .await;
                        return;
                    }
                }
            }
        }

        yield Ok(Bytes::from(sse::DONE_EVENT));
        let actual_model = final_model.unwrap_or_default();
        let _ = guard
            .finish(Outcome::Completed { actual_model, endpoint_id: Some(endpoint_id) })
            .await;
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(output))
        .unwrap()
}

/// The kill-switch itself re-reads current usage from the primary store
/// (spec.md §4.G) rather than trusting the in-memory snapshot, so it picks
/// up any finalized spend from other concurrent requests against this key.
async fn kill_switch_check(guard: &ReservationGuard, cost_so_far: Decimal) -> Result<bool> {
    let Some(state) = &guard.state else { return Ok(false) };
    let Some(api_key_id) = state.api_key_id else { return Ok(false) };
    budget::kill_switch_triggered(&state.key_repo, api_key_id, cost_so_far).await
}

/// Embeddings bypass the `ChatBackend` router abstraction entirely and call
/// the endpoint's HTTP URL directly (spec.md §4.I) — vLLM/Ollama/TGI
/// compatibility, and the router has no uniform non-chat shape to offer.
pub async fn run_embeddings(
    http: &reqwest::Client,
    endpoint: &ModelEndpoint,
    request: &EmbeddingsRequest,
    guard: ReservationGuard,
) -> Response {
    let url = format!("{}/v1/embeddings", endpoint.base_url.trim_end_matches('/'));
    let api_key = endpoint.resolve_api_key();

    let sent = http
        .post(&url)
        .bearer_auth(&api_key)
        .timeout(std::time::Duration::from_secs(endpoint.timeout_seconds.max(1) as u64))
        .json(request)
        .send()
        .await;

    match sent {
        Ok(response) if response.status().is_success() => {
            let body = match response.json::<Value>().await {
                Ok(body) => body,
                Err(err) => {
                    let message = err.to_string();
                    let _ = guard
                        .finish(Outcome::Failed { code: "provider_error".to_string(), message: message.clone() })
                        .await;
                    return bad_gateway_body("provider_error", &message);
                }
            };
            if let Some(usage) = body.get("usage") {
                let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
                guard.record_usage(prompt_tokens, 0);
            }
            let actual_model = body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&request.model)
                .to_string();
            let cleaned = response_sanitizer::clean(body);
            let _ = guard
                .finish(Outcome::Completed { actual_model, endpoint_id: Some(endpoint.id) })
                .await;
            axum::Json(cleaned).into_response()
        }
        Ok(response) => {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            let code = error_classifier::classify(&body_text).to_string();
            let sanitized = error_classifier::sanitize(&body_text);
            let _ = guard
                .finish(Outcome::Failed { code: code.clone(), message: body_text })
                .await;
            tracing::warn!(status = %status, "embeddings backend returned non-success");
            bad_gateway_body(&code, &sanitized)
        }
        Err(err) => {
            let message = err.to_string();
            let code = if err.is_timeout() { "timeout" } else { "provider_error" };
            let _ = guard
                .finish(Outcome::Failed { code: code.to_string(), message: message.clone() })
                .await;
            bad_gateway_body(code, &message)
        }
    }
}
