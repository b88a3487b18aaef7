//! Prometheus-backed metrics, reshaped to the JSON envelope spec.md defines
//! for `GET /internal/performance/metrics` (`{metrics, database, redis}`)
//! rather than a text-exposition scrape endpoint.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    proto::MetricType, register_counter_vec, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use serde_json::{json, Value};

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "llm_gateway_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "llm_gateway_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_CONNECTIONS_ACTIVE: GaugeVec = register_gauge_vec!(
        "llm_gateway_http_connections_active",
        "Number of active HTTP connections",
        &[]
    )
    .unwrap();

    pub static ref AUTH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "llm_gateway_auth_failures_total",
        "Total number of authentication failures",
        &["reason"]
    )
    .unwrap();

    pub static ref BACKEND_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "llm_gateway_backend_errors_total",
        "Total number of classified backend errors",
        &["code"]
    )
    .unwrap();
}

fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut normalized = Vec::new();

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        if (segment.len() == 36 && segment.contains('-')) || segment.parse::<i64>().is_ok() {
            normalized.push(":id");
        } else {
            normalized.push(segment);
        }
    }

    format!("/{}", normalized.join("/"))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    HTTP_CONNECTIONS_ACTIVE.with_label_values(&[]).inc();

    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status_str = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status_str])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status_str])
        .inc();
    HTTP_CONNECTIONS_ACTIVE.with_label_values(&[]).dec();

    response
}

pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_backend_error(code: &str) {
    BACKEND_ERRORS_TOTAL.with_label_values(&[code]).inc();
}

/// Flattens the process's Prometheus registry into `{name: {labels, value}}`
/// pairs for the JSON metrics envelope. Histograms report `{count, sum}`
/// rather than per-bucket detail — good enough for the dashboard this
/// endpoint feeds, and far simpler than reproducing bucket layout in JSON.
pub fn collect_metrics_json() -> Value {
    let mut out = serde_json::Map::new();
    for family in prometheus::gather() {
        let entries: Vec<Value> = family
            .get_metric()
            .iter()
            .map(|metric| {
                let labels: serde_json::Map<String, Value> = metric
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name().to_string(), json!(l.get_value())))
                    .collect();
                let value = match family.get_field_type() {
                    MetricType::COUNTER => json!(metric.get_counter().get_value()),
                    MetricType::GAUGE => json!(metric.get_gauge().get_value()),
                    MetricType::HISTOGRAM => json!({
                        "count": metric.get_histogram().get_sample_count(),
                        "sum": metric.get_histogram().get_sample_sum(),
                    }),
                    _ => Value::Null,
                };
                json!({ "labels": labels, "value": value })
            })
            .collect();
        out.insert(family.get_name().to_string(), Value::Array(entries));
    }
    Value::Object(out)
}

/// Text-exposition rendering, kept for operators who still want to point a
/// Prometheus scraper at the process directly rather than the JSON surface.
pub fn encode_text() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_masks_uuid_and_numeric_segments() {
        assert_eq!(normalize_path("/v1/models/550e8400-e29b-41d4-a716-446655440000"), "/v1/models/:id");
        assert_eq!(normalize_path("/internal/api-keys/123/rotate"), "/internal/api-keys/:id/rotate");
        assert_eq!(normalize_path("/v1/chat/completions"), "/v1/chat/completions");
    }

    #[test]
    fn collect_metrics_json_is_an_object() {
        record_auth_failure("invalid_api_key");
        let value = collect_metrics_json();
        assert!(value.is_object());
    }
}
