//! Exercises `HttpChatBackend` against a mock OpenAI-compatible server
//! standing in for a real LLM endpoint, the same way this crate's structural
//! predecessor stood up a mock server for an external system it talked to.
//! No primary store or fast store is needed here: these tests stay below the
//! request-guard pipeline and drive the router abstraction directly.

use std::net::SocketAddr;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use llm_gateway::models::chat::{ChatCompletionRequest, ChatMessage, MessageContent};
use llm_gateway::models::ModelEndpoint;
use llm_gateway::services::proxy::backend::{ChatBackend, ChatCompletionResponseStream, HttpChatBackend};

#[derive(Clone)]
struct MockBehavior {
    fail_with: Option<(u16, &'static str)>,
}

async fn mock_chat_completions(
    State(behavior): State<MockBehavior>,
    Json(req): Json<Value>,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    if let Some((status, body)) = behavior.fail_with {
        return (StatusCode::from_u16(status).unwrap(), body).into_response();
    }

    let stream_requested = req.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if stream_requested {
        let chunk = json!({
            "id": "chatcmpl-mock",
            "model": "mock-model",
            "choices": [{"index": 0, "delta": {"content": "hi"}, "finish_reason": null}],
        });
        let done = json!({
            "id": "chatcmpl-mock",
            "model": "mock-model",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2},
        });
        let events = stream::iter(vec![
            Ok::<Event, std::convert::Infallible>(Event::default().data(chunk.to_string())),
            Ok(Event::default().data(done.to_string())),
        ]);
        return Sse::new(events).into_response();
    }

    Json(json!({
        "id": "chatcmpl-mock",
        "model": "mock-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2},
        "_internal_debug": null,
    }))
    .into_response()
}

async fn spawn_mock(behavior: MockBehavior) -> String {
    let app = Router::new().route("/v1/chat/completions", post(mock_chat_completions)).with_state(behavior);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn endpoint_for(base_url: &str) -> ModelEndpoint {
    let now = chrono::Utc::now();
    ModelEndpoint {
        id: Uuid::new_v4(),
        model_id: "mock-model".to_string(),
        endpoint_type: "openai".to_string(),
        base_url: base_url.to_string(),
        api_key_ref: None,
        routing_priority: 0,
        routing_strategy: "latency_weighted".to_string(),
        health_check_url: None,
        health_check_interval: 30,
        health_check_timeout: 5,
        next_check_at: None,
        timeout_seconds: 10,
        max_concurrent_requests: 10,
        is_active: true,
        last_health_check: None,
        health_status: "healthy".to_string(),
        consecutive_failures: 0,
        avg_latency_ms: 0,
        total_requests: 0,
        created_at: now,
        updated_at: now,
    }
}

fn basic_request(stream: bool) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: "mock-model".to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text("hello".to_string()),
            name: None,
        }],
        max_tokens: Some(64),
        temperature: None,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stream,
        stop: None,
        x_user_oid: None,
        x_app_id: None,
    }
}

#[tokio::test]
async fn non_streaming_completion_returns_buffered_usage() {
    let base_url = spawn_mock(MockBehavior { fail_with: None }).await;
    let endpoint = endpoint_for(&base_url);
    let backend = HttpChatBackend::new(reqwest::Client::new());

    let result = backend.complete(&endpoint, &basic_request(false)).await.unwrap();
    match result {
        ChatCompletionResponseStream::Buffered(body) => {
            assert_eq!(body["model"], "mock-model");
            assert_eq!(body["usage"]["prompt_tokens"], 5);
            assert_eq!(body["usage"]["completion_tokens"], 2);
        }
        ChatCompletionResponseStream::Streaming(_) => panic!("expected a buffered response"),
    }
}

#[tokio::test]
async fn streaming_completion_forwards_raw_chunks() {
    let base_url = spawn_mock(MockBehavior { fail_with: None }).await;
    let endpoint = endpoint_for(&base_url);
    let backend = HttpChatBackend::new(reqwest::Client::new());

    let result = backend.complete(&endpoint, &basic_request(true)).await.unwrap();
    match result {
        ChatCompletionResponseStream::Streaming(mut stream) => {
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            let text = String::from_utf8(collected).unwrap();
            assert!(text.contains("\"prompt_tokens\":5"));
            assert!(text.contains("chatcmpl-mock"));
        }
        ChatCompletionResponseStream::Buffered(_) => panic!("expected a streaming response"),
    }
}

#[tokio::test]
async fn backend_error_status_surfaces_as_backend_error() {
    let base_url = spawn_mock(MockBehavior { fail_with: Some((401, "invalid api key")) }).await;
    let endpoint = endpoint_for(&base_url);
    let backend = HttpChatBackend::new(reqwest::Client::new());

    let err = backend.complete(&endpoint, &basic_request(false)).await.unwrap_err();
    match err {
        llm_gateway::errors::GatewayError::Backend { message, .. } => {
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected a Backend error, got {other:?}"),
    }
}
