//! §4.F Context validator — heuristic token estimation and context-window
//! enforcement. Skipped entirely for embeddings/rerank (spec.md §4.F).

use serde_json::json;

use crate::errors::{GatewayError, Result};
use crate::models::chat::ChatMessage;
use crate::models::Model;

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    (0x4E00..=0x9FFF).contains(&cp) || (0x3040..=0x30FF).contains(&cp)
}

/// `chars_per_token = 2.0` when the text looks predominantly CJK (ratio of
/// CJK codepoints over 0.3), else `4.0`. Non-negative, monotone in input
/// length for fixed `cjk_ratio` (property P6): more characters at the same
/// ratio can only raise or hold the floor-divided estimate.
pub fn estimate_tokens(text: &str) -> i64 {
    let len = text.chars().count();
    if len == 0 {
        return 0;
    }
    let cjk_count = text.chars().filter(|c| is_cjk(*c)).count();
    let cjk_ratio = cjk_count as f64 / len as f64;
    let chars_per_token = if cjk_ratio > 0.3 { 2.0 } else { 4.0 };
    (len as f64 / chars_per_token).floor() as i64
}

pub struct ContextCheck {
    pub estimated_input_tokens: i64,
    pub requested_output_tokens: i64,
}

/// Validates the combined input+output estimate against the model's context
/// window. Warns (log only) past 80% utilization; rejects with
/// `context_length_exceeded` past 100%.
pub fn validate(
    messages: &[ChatMessage],
    max_tokens: Option<i32>,
    model: &Model,
) -> Result<ContextCheck> {
    let joined = messages
        .iter()
        .map(ChatMessage::as_estimator_line)
        .collect::<Vec<_>>()
        .join("\n");
    let estimated_input_tokens = estimate_tokens(&joined);
    let requested_output_tokens = max_tokens.unwrap_or(model.max_output_tokens) as i64;
    let total = estimated_input_tokens + requested_output_tokens;
    let context_window = model.context_window as i64;

    if total > context_window {
        return Err(GatewayError::ContextLengthExceeded {
            details: json!({
                "estimated_input_tokens": estimated_input_tokens,
                "requested_output_tokens": requested_output_tokens,
                "total_tokens": total,
                "context_window": context_window,
                "model": model.id,
            }),
        });
    }

    if total as f64 > context_window as f64 * 0.8 {
        tracing::warn!(
            model = %model.id,
            estimated_input_tokens,
            requested_output_tokens,
            context_window,
            "request nearing context window limit"
        );
    }

    Ok(ContextCheck { estimated_input_tokens, requested_output_tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_input_estimates_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn ascii_uses_four_chars_per_token() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn cjk_heavy_text_uses_two_chars_per_token() {
        let text = "你好世界你好世界你好"; // 10 CJK chars, ratio 1.0
        assert_eq!(estimate_tokens(text), 5);
    }

    #[test]
    fn monotone_for_fixed_ratio() {
        let short = "abcd";
        let long = "abcdabcd";
        assert!(estimate_tokens(long) >= estimate_tokens(short));
    }
}
