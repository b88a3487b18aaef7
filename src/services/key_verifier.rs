//! §4.C Key verifier — SHA-256+salt verification with a fast-store-cached
//! lookup by plaintext key.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use subtle::ConstantTimeEq;

use crate::errors::Result;
use crate::models::api_key::hash_candidate;
use crate::models::ApiKey;
use crate::repositories::ApiKeyRepository;

fn cache_key(plaintext: &str) -> String {
    format!("apikey:{plaintext}")
}

/// `verify(plaintext) -> Some(key)` on a live, active key; `None` otherwise.
/// Never short-circuits on salt mismatch — every candidate is hashed and
/// compared in constant time regardless of whether earlier candidates
/// already matched.
pub async fn verify(
    redis: &mut ConnectionManager,
    repo: &ApiKeyRepository,
    plaintext: &str,
    cache_ttl: Duration,
) -> Result<Option<ApiKey>> {
    if let Some(id) = redis.get::<_, Option<String>>(cache_key(plaintext)).await? {
        if let Ok(id) = uuid::Uuid::parse_str(&id) {
            if let Some(key) = repo.find_by_id(id).await? {
                if key.is_active && !key.is_expired(chrono::Utc::now()) {
                    return Ok(Some(key));
                }
            }
        }
        // Cache pointed at a stale/invalid key; fall through to a full scan.
    }

    let candidates = repo.find_all_active().await?;
    let mut found: Option<ApiKey> = None;
    for candidate in &candidates {
        let computed = hash_candidate(plaintext, &candidate.salt);
        let matches: bool = computed.as_bytes().ct_eq(candidate.hashed_key.as_bytes()).into();
        if matches {
            found = Some(candidate.clone());
        }
    }

    if let Some(key) = &found {
        let _: () = redis
            .set_ex(cache_key(plaintext), key.id.to_string(), cache_ttl.as_secs())
            .await?;
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::api_key::generate_api_key;

    #[test]
    fn hash_candidate_is_order_sensitive_on_salt() {
        let generated = generate_api_key();
        let wrong_salt = hash_candidate(&generated.plaintext, "deadbeef");
        assert_ne!(wrong_salt, generated.hashed_key);
    }

    #[test]
    fn constant_time_compare_agrees_with_equality() {
        let a = "abc123";
        let b = "abc123";
        let c = "abc124";
        let eq: bool = a.as_bytes().ct_eq(b.as_bytes()).into();
        let neq: bool = a.as_bytes().ct_eq(c.as_bytes()).into();
        assert!(eq);
        assert!(!neq);
    }
}
