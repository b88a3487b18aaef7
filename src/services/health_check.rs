//! §4.H health loop — periodic due-time-scheduled probes with exponential
//! backoff and EMA latency smoothing.
//!
//! Resolves the spec's "seconds per minute multiplier" open question (see
//! DESIGN.md): `health_check_interval` is treated as seconds uniformly on
//! both the success and backoff paths.

use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use crate::models::ModelEndpoint;
use crate::repositories::ModelRepository;

const DEGRADED_RETRY_SECONDS: i64 = 30;
const BACKOFF_CAP_SECONDS: i64 = 300;
const FAILURE_THRESHOLD: i32 = 3;

pub async fn run(
    repo: ModelRepository,
    http: reqwest::Client,
    poll_interval: Duration,
    batch_size: i64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("health check loop shutting down");
                    return;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let due = match repo.due_for_health_check(batch_size).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = ?err, "failed to fetch due endpoints");
                continue;
            }
        };

        if due.is_empty() {
            continue;
        }

        let checks = due.iter().map(|endpoint| probe_and_apply(&repo, &http, endpoint));
        join_all(checks).await;
    }
}

/// One probe + outcome application; also used for admin-triggered manual
/// probes of a single endpoint.
pub async fn probe_and_apply(repo: &ModelRepository, http: &reqwest::Client, endpoint: &ModelEndpoint) {
    let outcome = probe(http, endpoint).await;
    if let Err(err) = apply_outcome(repo, endpoint, outcome).await {
        tracing::error!(endpoint_id = %endpoint.id, error = ?err, "failed to persist health check outcome");
    }
}

enum ProbeOutcome {
    Ok { latency_ms: i32 },
    NonSuccess,
    Failure,
}

async fn probe(http: &reqwest::Client, endpoint: &ModelEndpoint) -> ProbeOutcome {
    let started = std::time::Instant::now();
    let timeout = Duration::from_secs(endpoint.health_check_timeout.max(1) as u64);
    let url = endpoint.health_probe_url();

    match tokio::time::timeout(timeout, http.get(&url).send()).await {
        Ok(Ok(response)) if response.status().is_success() => ProbeOutcome::Ok {
            latency_ms: started.elapsed().as_millis() as i32,
        },
        Ok(Ok(_)) => ProbeOutcome::NonSuccess,
        Ok(Err(err)) => {
            tracing::warn!(endpoint_id = %endpoint.id, error = %err, "health probe request failed");
            ProbeOutcome::Failure
        }
        Err(_) => {
            tracing::warn!(endpoint_id = %endpoint.id, "health probe timed out");
            ProbeOutcome::Failure
        }
    }
}

async fn apply_outcome(
    repo: &ModelRepository,
    endpoint: &ModelEndpoint,
    outcome: ProbeOutcome,
) -> crate::errors::Result<()> {
    match outcome {
        ProbeOutcome::Ok { latency_ms } => {
            let smoothed = (0.8 * endpoint.avg_latency_ms as f64 + 0.2 * latency_ms as f64) as i32;
            let next_check_at = Utc::now() + chrono::Duration::seconds(endpoint.health_check_interval as i64);
            repo.mark_healthy(endpoint.id, smoothed, next_check_at).await
        }
        ProbeOutcome::NonSuccess => {
            let next_check_at = Utc::now() + chrono::Duration::seconds(DEGRADED_RETRY_SECONDS);
            repo.mark_degraded(endpoint.id, next_check_at).await
        }
        ProbeOutcome::Failure => {
            let new_failures = endpoint.consecutive_failures + 1;
            let new_status = if new_failures >= FAILURE_THRESHOLD { "down" } else { "degraded" };
            // Cap the exponent before shifting/multiplying so a persistently
            // down endpoint (consecutive_failures growing unbounded) can
            // never overflow — `saturating_mul` covers the rest, and
            // `.min(BACKOFF_CAP_SECONDS)` below always lands on the 300s cap
            // once the exponent alone would exceed it.
            let exponent = new_failures.clamp(0, 30) as u32;
            let backoff = (endpoint.health_check_interval as i64)
                .saturating_mul(1i64 << exponent)
                .min(BACKOFF_CAP_SECONDS);
            let next_check_at = Utc::now() + chrono::Duration::seconds(backoff);
            repo.mark_failed(endpoint.id, new_status, next_check_at).await
        }
    }
}
