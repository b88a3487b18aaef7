//! §4.D Delegation resolver — multi-route authentication plus the five
//! ordered `(user, app)` attribution sources, and §4.D.1's embedded
//! delegation JSON extraction.

use std::time::Duration;

use axum::http::HeaderMap;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::errors::{GatewayError, Result};
use crate::models::chat::{ChatMessage, ContentPart, MessageContent};
use crate::models::ApiKey;
use crate::repositories::ApiKeyRepository;
use crate::services::key_verifier;

/// The two disjoint ways a caller can authenticate.
pub enum AuthRoute {
    SharedSecret { user_oid: String, app_id: String },
    ApiKey(ApiKey),
}

pub async fn authenticate(
    headers: &HeaderMap,
    gateway_shared_secret: &str,
    redis: &mut ConnectionManager,
    key_repo: &ApiKeyRepository,
    api_key_cache_ttl: Duration,
    client_ip: Option<&str>,
) -> Result<AuthRoute> {
    if let Some(secret) = header_str(headers, "x-gateway-secret") {
        if secret != gateway_shared_secret {
            return Err(GatewayError::Unauthorized("invalid gateway secret".into()));
        }
        let user_oid = header_str(headers, "x-user-oid")
            .ok_or_else(|| GatewayError::Unauthorized("X-User-Oid required".into()))?
            .to_string();
        let app_id = header_str(headers, "x-app-id")
            .ok_or_else(|| GatewayError::Unauthorized("X-App-Id required".into()))?
            .to_string();
        return Ok(AuthRoute::SharedSecret { user_oid, app_id });
    }

    if let Some(auth) = header_str(headers, "authorization") {
        let plaintext = auth
            .strip_prefix("Bearer ")
            .ok_or_else(|| GatewayError::Unauthorized("invalid authorization header".into()))?;

        let key = key_verifier::verify(redis, key_repo, plaintext, api_key_cache_ttl)
            .await?
            .ok_or_else(|| GatewayError::Unauthorized("invalid API key".into()))?;

        if key.is_expired(chrono::Utc::now()) {
            return Err(GatewayError::Unauthorized("API key expired".into()));
        }
        if let Some(ip) = client_ip {
            if !key.allows_ip(ip) {
                return Err(GatewayError::Forbidden("client IP not in allowlist".into()));
            }
        }
        return Ok(AuthRoute::ApiKey(key));
    }

    Err(GatewayError::Unauthorized("no authentication provided".into()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// One source's contribution to delegation. Fields resolve independently:
/// a source can supply `x_user_oid` without `x_app_id` and vice versa.
#[derive(Debug, Clone, Default)]
pub struct DelegationFields {
    pub x_user_oid: Option<String>,
    pub x_app_id: Option<String>,
}

impl DelegationFields {
    pub fn is_empty(&self) -> bool {
        self.x_user_oid.is_none() && self.x_app_id.is_none()
    }
}

/// First non-empty source wins, per field, independently. Source order is
/// the caller's responsibility — see `resolve` for the canonical order.
pub fn resolve_precedence(sources: &[DelegationFields]) -> DelegationFields {
    let mut resolved = DelegationFields::default();
    for source in sources {
        if resolved.x_user_oid.is_none() {
            resolved.x_user_oid = source.x_user_oid.clone();
        }
        if resolved.x_app_id.is_none() {
            resolved.x_app_id = source.x_app_id.clone();
        }
    }
    resolved
}

/// Canonical precedence order from spec.md §4.D: query, JSON body, embedded
/// message JSON, headers.
pub fn resolve(
    query: DelegationFields,
    body: DelegationFields,
    embedded: DelegationFields,
    headers: DelegationFields,
) -> DelegationFields {
    resolve_precedence(&[query, body, embedded, headers])
}

pub fn header_delegation(headers: &HeaderMap) -> DelegationFields {
    DelegationFields {
        x_user_oid: header_str(headers, "x-user-oid").map(str::to_string),
        x_app_id: header_str(headers, "x-app-id").map(str::to_string),
    }
}

/// Either nothing was supplied (bill the key's owner) or both resolved.
/// A single field present without the other is a 401.
pub fn resolve_billing(fields: &DelegationFields) -> Result<Option<(String, String)>> {
    match (&fields.x_user_oid, &fields.x_app_id) {
        (None, None) => Ok(None),
        (Some(user), Some(app)) => Ok(Some((user.clone(), app.clone()))),
        _ => Err(GatewayError::Unauthorized(
            "delegation requires both x_user_oid and x_app_id".into(),
        )),
    }
}

/// §4.D.1. Scans `messages` for the first user message whose content
/// parses as delegation JSON; on a match, rewrites that content to the
/// embedded `message` field (empty string if absent) and returns the
/// extracted fields. Non-matching user messages are left untouched and
/// scanning continues to the next one.
pub fn extract_embedded_delegation(messages: &mut [ChatMessage]) -> DelegationFields {
    for message in messages.iter_mut() {
        if !message.is_user() {
            continue;
        }
        match &mut message.content {
            MessageContent::Text(text) => {
                if let Some(fields) = try_parse_and_rewrite(text) {
                    return fields;
                }
            }
            MessageContent::Parts(parts) => {
                for part in parts.iter_mut() {
                    if let ContentPart::Text { text } = part {
                        if let Some(fields) = try_parse_and_rewrite(text) {
                            return fields;
                        }
                    }
                }
            }
        }
    }
    DelegationFields::default()
}

fn try_parse_and_rewrite(text: &mut String) -> Option<DelegationFields> {
    let trimmed = text.trim();
    let parsed: Value = serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(&format!("{{{trimmed}}}")))
        .ok()?;

    let obj = parsed.as_object()?;
    let x_user_oid = obj.get("x_user_oid").and_then(Value::as_str);
    let x_app_id = obj.get("x_app_id").and_then(Value::as_str);
    let (x_user_oid, x_app_id) = (x_user_oid?, x_app_id?);

    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    *text = message;

    Some(DelegationFields {
        x_user_oid: Some(x_user_oid.to_string()),
        x_app_id: Some(x_app_id.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_takes_first_non_empty_per_field() {
        let query = DelegationFields { x_user_oid: None, x_app_id: Some("A-query".into()) };
        let body = DelegationFields { x_user_oid: Some("U-body".into()), x_app_id: None };
        let headers = DelegationFields { x_user_oid: Some("U-header".into()), x_app_id: Some("A-header".into()) };

        let resolved = resolve_precedence(&[query, body, DelegationFields::default(), headers]);
        assert_eq!(resolved.x_user_oid.as_deref(), Some("U-body"));
        assert_eq!(resolved.x_app_id.as_deref(), Some("A-query"));
    }

    #[test]
    fn embedded_json_with_braces_rewrites_content() {
        let mut messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(
                r#"{"x_user_oid": "U3", "x_app_id": "A2", "message": "ping"}"#.to_string(),
            ),
            name: None,
        }];
        let fields = extract_embedded_delegation(&mut messages);
        assert_eq!(fields.x_user_oid.as_deref(), Some("U3"));
        assert_eq!(fields.x_app_id.as_deref(), Some("A2"));
        match &messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, "ping"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn embedded_json_without_braces_still_matches() {
        let mut messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(
                r#""x_user_oid": "U3", "x_app_id": "A2", "message": "ping""#.to_string(),
            ),
            name: None,
        }];
        let fields = extract_embedded_delegation(&mut messages);
        assert_eq!(fields.x_user_oid.as_deref(), Some("U3"));
        assert_eq!(fields.x_app_id.as_deref(), Some("A2"));
    }

    #[test]
    fn embedded_json_missing_message_field_becomes_empty_string() {
        let mut messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(r#"{"x_user_oid": "U1", "x_app_id": "A1"}"#.to_string()),
            name: None,
        }];
        extract_embedded_delegation(&mut messages);
        match &messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, ""),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn non_matching_content_left_untouched() {
        let mut messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text("just a normal question".to_string()),
            name: None,
        }];
        let fields = extract_embedded_delegation(&mut messages);
        assert!(fields.is_empty());
        match &messages[0].content {
            MessageContent::Text(t) => assert_eq!(t, "just a normal question"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn resolve_billing_requires_both_fields_or_neither() {
        let neither = DelegationFields::default();
        assert!(resolve_billing(&neither).unwrap().is_none());

        let both = DelegationFields { x_user_oid: Some("U".into()), x_app_id: Some("A".into()) };
        assert_eq!(resolve_billing(&both).unwrap(), Some(("U".to_string(), "A".to_string())));

        let only_user = DelegationFields { x_user_oid: Some("U".into()), x_app_id: None };
        assert!(resolve_billing(&only_user).is_err());
    }
}
