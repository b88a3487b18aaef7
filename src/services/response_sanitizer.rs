//! Output sanitization (spec.md §4.I): strip null-valued keys and
//! underscore-prefixed keys, recursively, before a response or stream chunk
//! crosses the wire. Idempotent — running it twice yields the same result.

use serde_json::Value;

pub fn clean(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned = map
                .into_iter()
                .filter(|(key, val)| !val.is_null() && !key.starts_with('_'))
                .map(|(key, val)| (key, clean(val)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(clean).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_null_values_and_underscore_keys_recursively() {
        let input = json!({
            "id": "abc",
            "usage": null,
            "_internal": "secret",
            "choices": [
                {"text": "hi", "logprobs": null, "_debug": {"trace": 1}}
            ]
        });
        let cleaned = clean(input);
        assert_eq!(
            cleaned,
            json!({
                "id": "abc",
                "choices": [
                    {"text": "hi"}
                ]
            })
        );
    }

    #[test]
    fn is_idempotent() {
        let input = json!({"a": 1, "b": null, "_c": 2, "nested": {"d": null}});
        let once = clean(input);
        let twice = clean(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_non_object_values_untouched() {
        assert_eq!(clean(json!("text")), json!("text"));
        assert_eq!(clean(json!(42)), json!(42));
        assert_eq!(clean(Value::Null), Value::Null);
    }
}
