//! §7 backend error classifier — substring match on the lowercased backend
//! message into a taxonomy code, plus the message sanitizer applied before
//! any backend-derived text is returned to a caller.

use once_cell::sync::Lazy;
use regex::Regex;

/// Order matters: more specific substrings are checked before generic ones.
const CLASSIFICATIONS: &[(&str, &str)] = &[
    ("out of memory", "oom_error"),
    ("cuda out of memory", "oom_error"),
    ("timed out", "timeout"),
    ("timeout", "timeout"),
    ("rate limit", "rate_limit"),
    ("too many requests", "rate_limit"),
    ("cuda error", "gpu_error"),
    ("gpu", "gpu_error"),
    ("model is not loaded", "model_not_loaded"),
    ("model not loaded", "model_not_loaded"),
];

pub fn classify(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    for (needle, code) in CLASSIFICATIONS {
        if lowered.contains(needle) {
            return code;
        }
    }
    "provider_error"
}

const MAX_MESSAGE_LEN: usize = 150;

static FILE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(/[\w.\-]+)+").unwrap());
static IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,3}(\.\d{1,3}){3}\b").unwrap());
static BEARER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").unwrap());
static SK_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_\-]+").unwrap());

/// Truncates to 150 chars and redacts file paths, IP literals, bearer
/// tokens, and `sk-…` tokens. The unredacted original is always logged
/// separately by the caller; this is the text that crosses the wire.
pub fn sanitize(message: &str) -> String {
    let redacted = BEARER_TOKEN.replace_all(message, "[redacted]");
    let redacted = SK_TOKEN.replace_all(&redacted, "[redacted]");
    let redacted = IPV4.replace_all(&redacted, "[redacted]");
    let redacted = FILE_PATH.replace_all(&redacted, "[redacted]");

    let truncated: String = redacted.chars().take(MAX_MESSAGE_LEN).collect();
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_oom() {
        assert_eq!(classify("CUDA out of memory on device 0"), "oom_error");
    }

    #[test]
    fn classifies_timeout() {
        assert_eq!(classify("upstream request timed out after 30s"), "timeout");
    }

    #[test]
    fn classifies_rate_limit() {
        assert_eq!(classify("Error: rate limit exceeded, retry later"), "rate_limit");
    }

    #[test]
    fn unrecognized_message_falls_back_to_provider_error() {
        assert_eq!(classify("something unexpected happened"), "provider_error");
    }

    #[test]
    fn sanitize_redacts_bearer_and_sk_tokens() {
        let message = "auth failed for Bearer abc123XYZ using sk-liveSecretKey1234";
        let cleaned = sanitize(message);
        assert!(!cleaned.contains("abc123XYZ"));
        assert!(!cleaned.contains("sk-liveSecretKey1234"));
    }

    #[test]
    fn sanitize_redacts_file_paths_and_ips() {
        let message = "connection to 10.0.0.5 failed, see /var/log/vllm/error.log";
        let cleaned = sanitize(message);
        assert!(!cleaned.contains("10.0.0.5"));
        assert!(!cleaned.contains("/var/log/vllm/error.log"));
    }

    #[test]
    fn sanitize_truncates_to_150_chars() {
        let message = "x".repeat(500);
        assert_eq!(sanitize(&message).chars().count(), 150);
    }
}
