//! HTTP surface (spec.md §6). Each handler runs the §4.K guard pipeline
//! itself (via `middleware::request_guard`) rather than through a generic
//! `tower` layer, since the body shape it must parse differs per route.

pub mod chat;
pub mod embeddings;
pub mod health;
pub mod internal;
pub mod models;
pub mod rerank;

use axum::http::HeaderMap;
use serde::Deserialize;

/// Delegation source #1 (spec.md §4.D): query-string fields, present on
/// every proxied route.
#[derive(Debug, Deserialize, Default)]
pub struct DelegationQuery {
    pub x_user_oid: Option<String>,
    pub x_app_id: Option<String>,
}

pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
