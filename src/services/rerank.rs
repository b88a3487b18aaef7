//! §4.J rerank three-tier fallback: native `/rerank` → `/score` conversion →
//! chat-completions cross-encoder with logprobs scoring.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::{GatewayError, Result};
use crate::models::{ModelEndpoint, RerankRequest};

const JUDGE_SYSTEM_PROMPT: &str =
    "Judge whether the Document is relevant to the Query. Output only \"yes\" or \"no\".";

#[derive(Serialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

/// Total characters across query + documents, used for `ceil(total_chars / 4)`
/// billing attribution (spec.md §4.J) since rerank has no token usage field.
pub fn billed_tokens(req: &RerankRequest) -> i64 {
    let total_chars: usize =
        req.query.chars().count() + req.documents.iter().map(|d| d.chars().count()).sum::<usize>();
    ((total_chars as f64) / 4.0).ceil() as i64
}

pub async fn rerank(
    http: &reqwest::Client,
    endpoint: &ModelEndpoint,
    req: &RerankRequest,
) -> Result<Value> {
    let base = endpoint.base_url.trim_end_matches('/');
    let api_key = endpoint.resolve_api_key();

    match try_native(http, base, &api_key, req).await? {
        Tier1::Success(body) => return Ok(body),
        // Spec §4.J gates tier 2 on the native endpoint being unimplemented
        // (404/405/501). Any other non-200 (500, 429, 502, …) means the
        // backend exists but is failing, so `/score` is skipped entirely in
        // favor of the tier-3 chat-completions judge.
        Tier1::NotImplemented => {
            if let Some(body) = try_score(http, base, &api_key, req).await? {
                return Ok(body);
            }
        }
        Tier1::OtherFailure => {}
    }

    try_chat_judge(http, base, &api_key, req).await
}

enum Tier1 {
    Success(Value),
    NotImplemented,
    OtherFailure,
}

async fn try_native(
    http: &reqwest::Client,
    base: &str,
    api_key: &str,
    req: &RerankRequest,
) -> Result<Tier1> {
    let payload = json!({
        "model": req.model,
        "query": req.query,
        "documents": req.documents,
        "top_n": req.top_n,
        "return_documents": req.return_documents,
        "max_chunks_per_doc": req.max_chunks_per_doc,
        "rank_fields": req.rank_fields,
    });

    let response = http
        .post(format!("{base}/rerank"))
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;

    let status = response.status();
    if status.is_success() {
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;
        return Ok(Tier1::Success(body));
    }

    if matches!(status.as_u16(), 404 | 405 | 501) {
        Ok(Tier1::NotImplemented)
    } else {
        Ok(Tier1::OtherFailure)
    }
}

async fn try_score(
    http: &reqwest::Client,
    base: &str,
    api_key: &str,
    req: &RerankRequest,
) -> Result<Option<Value>> {
    let payload = json!({
        "model": req.model,
        "text_1": req.query,
        "text_2": req.documents,
    });

    let response = http
        .post(format!("{base}/score"))
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;

    let status = response.status();
    if matches!(status.as_u16(), 404 | 405 | 501) {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(GatewayError::Backend {
            code: "provider_error".to_string(),
            message: format!("score endpoint returned {status}"),
        });
    }

    let body = response
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;
    let scores = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut results: Vec<RerankResult> = scores
        .iter()
        .enumerate()
        .map(|(index, item)| RerankResult {
            index,
            relevance_score: item.get("score").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect();

    results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
    if let Some(top_n) = req.top_n {
        results.truncate(top_n);
    }

    Ok(Some(json!({ "results": results })))
}

async fn try_chat_judge(
    http: &reqwest::Client,
    base: &str,
    api_key: &str,
    req: &RerankRequest,
) -> Result<Value> {
    let judgments = join_all(
        req.documents
            .iter()
            .enumerate()
            .map(|(index, doc)| judge_one(http, base, api_key, &req.model, &req.query, doc, index)),
    )
    .await;

    let mut results: Vec<RerankResult> = judgments.into_iter().collect::<Result<Vec<_>>>()?;
    results.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
    if let Some(top_n) = req.top_n {
        results.truncate(top_n);
    }

    Ok(json!({ "results": results }))
}

async fn judge_one(
    http: &reqwest::Client,
    base: &str,
    api_key: &str,
    model: &str,
    query: &str,
    document: &str,
    index: usize,
) -> Result<RerankResult> {
    let payload = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": JUDGE_SYSTEM_PROMPT},
            {"role": "user", "content": format!("<Query>{query}</Query>\n<Document>{document}</Document>")},
        ],
        "max_tokens": 1,
        "temperature": 0,
        "logprobs": true,
        "top_logprobs": 20,
        "reasoning": false,
    });

    let response = http
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;

    if !response.status().is_success() {
        return Err(GatewayError::Backend {
            code: "provider_error".to_string(),
            message: format!("judge call returned {}", response.status()),
        });
    }

    let body = response
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::Backend { code: "provider_error".to_string(), message: e.to_string() })?;

    Ok(RerankResult { index, relevance_score: score_from_judge_response(&body) })
}

/// Extracts `p_yes / (p_yes + p_no)` from the first token's top-logprobs.
/// Falls back to a text-prefix check when logprobs are absent entirely.
fn score_from_judge_response(body: &Value) -> f64 {
    let top_logprobs = body
        .pointer("/choices/0/logprobs/content/0/top_logprobs")
        .and_then(Value::as_array);

    let Some(entries) = top_logprobs else {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("");
        return if text.trim().to_lowercase().starts_with("yes") { 1.0 } else { 0.0 };
    };

    let mut p_yes = None;
    let mut p_no = None;
    for entry in entries {
        let token = entry
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .trim_end_matches('.')
            .to_lowercase();
        let logprob = entry.get("logprob").and_then(Value::as_f64).unwrap_or(f64::NEG_INFINITY);
        if token == "yes" && p_yes.is_none() {
            p_yes = Some(logprob.exp());
        } else if token == "no" && p_no.is_none() {
            p_no = Some(logprob.exp());
        }
    }

    match (p_yes, p_no) {
        (Some(yes), Some(no)) if yes + no > 0.0 => yes / (yes + no),
        (Some(yes), None) => yes,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billed_tokens_rounds_up_character_count() {
        let req = RerankRequest {
            model: "m".into(),
            query: "abcd".into(),
            documents: vec!["abcde".into()],
            top_n: None,
            return_documents: None,
            max_chunks_per_doc: None,
            rank_fields: None,
            x_user_oid: None,
            x_app_id: None,
        };
        // 4 + 5 = 9 chars -> ceil(9/4) = 3
        assert_eq!(billed_tokens(&req), 3);
    }

    #[test]
    fn score_from_judge_response_uses_yes_no_logprobs() {
        let body = json!({
            "choices": [{
                "logprobs": {
                    "content": [{
                        "top_logprobs": [
                            {"token": "yes", "logprob": 0.0},
                            {"token": "no", "logprob": -10.0},
                        ]
                    }]
                }
            }]
        });
        let score = score_from_judge_response(&body);
        assert!(score > 0.99);
    }

    #[test]
    fn score_from_judge_response_falls_back_to_text_prefix() {
        let body = json!({
            "choices": [{ "message": { "content": "yes." } }]
        });
        assert_eq!(score_from_judge_response(&body), 1.0);
    }

    #[test]
    fn score_from_judge_response_defaults_to_zero_when_neither_token_present() {
        let body = json!({
            "choices": [{
                "logprobs": {
                    "content": [{
                        "top_logprobs": [
                            {"token": "maybe", "logprob": 0.0},
                        ]
                    }]
                }
            }]
        });
        assert_eq!(score_from_judge_response(&body), 0.0);
    }
}
