use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// A caller-presented credential. `(hashed_key, salt)` is immutable once
/// created; rotation always mints a new row and links back via
/// `replaced_by` rather than mutating this one in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_oid: String,
    pub hashed_key: String,
    pub salt: String,
    pub display_prefix: String,
    pub allowed_models: Option<Json<Vec<String>>>,
    pub scopes: Json<Vec<String>>,
    pub allowed_ips: Option<Json<Vec<String>>>,
    pub rate_limit_rpm: i32,
    pub budget_monthly: Option<Decimal>,
    pub usage_current_month: Decimal,
    pub last_reset_month: Option<String>,
    pub label: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    pub fn allows_model(&self, model_id: &str) -> bool {
        match &self.allowed_models {
            None => true,
            Some(Json(models)) => models.iter().any(|m| m == model_id),
        }
    }

    pub fn allows_ip(&self, ip: &str) -> bool {
        match &self.allowed_ips {
            None => true,
            Some(Json(ips)) => ips.iter().any(|allowed| allowed == ip),
        }
    }
}

/// What `verify_api_key` returns to callers that only need the plaintext's
/// prefix display convention, used at creation and rotation time.
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub hashed_key: String,
    pub salt: String,
    pub display_prefix: String,
}

/// Generate a fresh `sk-gate-<random>` key plus its storage-side hash/salt.
pub fn generate_api_key() -> GeneratedApiKey {
    use rand::RngCore;
    use sha2::{Digest, Sha256};

    let mut key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let plaintext = format!(
        "sk-gate-{}",
        base64::encode_config(key_bytes, base64::URL_SAFE_NO_PAD)
    );

    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);

    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(salt.as_bytes());
    let hashed_key = hex::encode(hasher.finalize());

    let display_prefix = format!("{}...", &plaintext[..15.min(plaintext.len())]);

    GeneratedApiKey {
        plaintext,
        hashed_key,
        salt,
        display_prefix,
    }
}

/// Recompute the key's hash for a candidate plaintext+salt pair. Callers
/// must compare the result with a constant-time primitive — this function
/// does not itself guard against timing side channels.
pub fn hash_candidate(plaintext: &str, salt: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_hash_candidate() {
        let generated = generate_api_key();
        let recomputed = hash_candidate(&generated.plaintext, &generated.salt);
        assert_eq!(recomputed, generated.hashed_key);
    }

    #[test]
    fn display_prefix_is_first_fifteen_chars_plus_ellipsis() {
        let generated = generate_api_key();
        assert!(generated.display_prefix.ends_with("..."));
        assert_eq!(generated.display_prefix.len(), 15 + 3);
    }
}
