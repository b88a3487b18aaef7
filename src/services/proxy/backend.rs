//! §4.L router abstraction — the `ChatBackend` trait plus its one concrete,
//! reqwest-backed implementation. Embeddings and rerank bypass this trait
//! entirely and talk to their endpoints directly (spec.md §4.I).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;

use crate::errors::{GatewayError, Result};
use crate::models::chat::ChatCompletionRequest;
use crate::models::ModelEndpoint;
use crate::services::error_classifier;

pub enum ChatCompletionResponseStream {
    Buffered(Value),
    Streaming(BoxStream<'static, Result<Bytes>>),
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponseStream>;
}

pub struct HttpChatBackend {
    http: reqwest::Client,
}

impl HttpChatBackend {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        req: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponseStream> {
        let url = format!("{}/v1/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let api_key = endpoint.resolve_api_key();
        let timeout = std::time::Duration::from_secs(endpoint.timeout_seconds.max(1) as u64);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .timeout(timeout)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let code = error_classifier::classify(&body_text);
            return Err(GatewayError::Backend {
                code: code.to_string(),
                message: body_text,
            });
        }

        if req.stream {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(transport_error))
                .boxed();
            Ok(ChatCompletionResponseStream::Streaming(stream))
        } else {
            let body = response.json::<Value>().await.map_err(transport_error)?;
            Ok(ChatCompletionResponseStream::Buffered(body))
        }
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    let code = if err.is_timeout() { "timeout" } else { "provider_error" };
    GatewayError::Backend { code: code.to_string(), message: err.to_string() }
}
