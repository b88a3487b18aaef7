//! SSE byte-stream framing: split a raw backend byte stream into individual
//! `data: …` events and pull the OpenAI-shape usage object out of whichever
//! chunk carries it. Grounded on the same delimiter/extraction approach used
//! elsewhere in this codebase's reference corpus for SSE passthrough.

use bytes::BytesMut;
use serde_json::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct ObservedUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// Accumulates raw bytes across chunk boundaries and extracts complete SSE
/// events (`data: …\n\n` or `…\r\n\r\n`) one at a time.
#[derive(Default)]
pub struct SseEventSplitter {
    buffer: BytesMut,
}

impl SseEventSplitter {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops and returns the next complete event's `data:` payload, if any
    /// full event is currently buffered. Returns `None` once no complete
    /// event remains; call again after pushing more bytes.
    pub fn next_event(&mut self) -> Option<Vec<u8>> {
        loop {
            let (pos, delimiter_len) = find_delimiter(&self.buffer)?;
            let event_bytes = self.buffer.split_to(pos);
            let _ = self.buffer.split_to(delimiter_len);
            if let Some(data) = extract_data(&event_bytes) {
                return Some(data);
            }
            // Event carried no `data:` line (e.g. a bare comment); keep scanning.
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() >= 4 {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some((pos, 4));
        }
    }
    if buf.len() >= 2 {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\n\n") {
            return Some((pos, 2));
        }
    }
    None
}

fn extract_data(event: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for line in event.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(rest) = line.strip_prefix(b"data:") else { continue };
        let rest = trim_ascii(rest);
        if rest.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(b'\n');
        }
        out.extend_from_slice(rest);
    }
    (!out.is_empty()).then_some(out)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

/// Extracts `usage.{prompt_tokens,completion_tokens}` from an OpenAI-shape
/// chunk payload, if present. `[DONE]` and non-JSON payloads yield `None`.
pub fn extract_usage(data: &[u8]) -> Option<ObservedUsage> {
    if trim_ascii(data) == b"[DONE]" {
        return None;
    }
    let value: Value = serde_json::from_slice(data).ok()?;
    let usage = value.get("usage")?;
    Some(ObservedUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_i64).unwrap_or(0),
    })
}

pub fn frame_event(data: &Value) -> String {
    format!("data: {}\n\n", data)
}

pub const DONE_EVENT: &str = "data: [DONE]\n\n";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_events_across_pushes() {
        let mut splitter = SseEventSplitter::default();
        splitter.push(b"data: {\"a\":1}\n\ndata: {\"b");
        assert_eq!(splitter.next_event().unwrap(), b"{\"a\":1}".to_vec());
        assert!(splitter.next_event().is_none());

        splitter.push(b"\":2}\n\n");
        assert_eq!(splitter.next_event().unwrap(), b"{\"b\":2}".to_vec());
    }

    #[test]
    fn extract_usage_reads_prompt_and_completion_tokens() {
        let data = json!({"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 7}});
        let bytes = serde_json::to_vec(&data).unwrap();
        let usage = extract_usage(&bytes).unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn extract_usage_ignores_done_marker() {
        assert!(extract_usage(b"[DONE]").is_none());
    }

    #[test]
    fn extract_usage_none_when_usage_absent() {
        let data = json!({"choices": []});
        let bytes = serde_json::to_vec(&data).unwrap();
        assert!(extract_usage(&bytes).is_none());
    }
}
