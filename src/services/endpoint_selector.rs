//! §4.H endpoint selector — picks one eligible endpoint for a model at
//! request time. The health loop itself lives in `health_check`.

use rand::Rng;

use crate::errors::{GatewayError, Result};
use crate::models::ModelEndpoint;

/// Single candidate: use it. Multiple + `latency-based`: weight by
/// `1 / max(avg_latency_ms, 1)` and pick weighted at random. Otherwise:
/// equal weight (round-robin/random/usage-based all degrade to this).
pub fn select(candidates: &[ModelEndpoint]) -> Result<&ModelEndpoint> {
    if candidates.is_empty() {
        return Err(GatewayError::NoHealthyEndpoint);
    }
    if candidates.len() == 1 {
        return Ok(&candidates[0]);
    }

    let latency_based = candidates[0].routing_strategy == "latency-based";
    let weights: Vec<f64> = if latency_based {
        candidates
            .iter()
            .map(|e| 1.0 / (e.avg_latency_ms.max(1) as f64))
            .collect()
    } else {
        vec![1.0; candidates.len()]
    };

    let total: f64 = weights.iter().sum();
    let mut pick = rand::thread_rng().gen_range(0.0..total);
    for (endpoint, weight) in candidates.iter().zip(weights.iter()) {
        if pick < *weight {
            return Ok(endpoint);
        }
        pick -= *weight;
    }
    // Floating-point rounding can leave `pick` fractionally over the last
    // bound; fall back to the last candidate rather than panicking.
    Ok(candidates.last().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn endpoint(priority: i32, latency_ms: i32, strategy: &str) -> ModelEndpoint {
        ModelEndpoint {
            id: Uuid::new_v4(),
            model_id: "m1".into(),
            endpoint_type: "chat".into(),
            base_url: "http://localhost".into(),
            api_key_ref: None,
            routing_priority: priority,
            routing_strategy: strategy.into(),
            health_check_url: None,
            health_check_interval: 60,
            health_check_timeout: 10,
            next_check_at: None,
            timeout_seconds: 120,
            max_concurrent_requests: 10,
            is_active: true,
            last_health_check: None,
            health_status: "healthy".into(),
            consecutive_failures: 0,
            avg_latency_ms: latency_ms,
            total_requests: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn single_candidate_is_used_directly() {
        let candidates = vec![endpoint(100, 50, "round-robin")];
        let chosen = select(&candidates).unwrap();
        assert_eq!(chosen.routing_priority, 100);
    }

    #[test]
    fn empty_candidates_is_no_healthy_endpoint() {
        let candidates: Vec<ModelEndpoint> = vec![];
        assert!(matches!(select(&candidates), Err(GatewayError::NoHealthyEndpoint)));
    }

    #[test]
    fn latency_based_favors_lower_latency_over_many_trials() {
        let candidates = vec![endpoint(1, 10, "latency-based"), endpoint(2, 1000, "latency-based")];
        let mut fast_wins = 0;
        for _ in 0..200 {
            if select(&candidates).unwrap().avg_latency_ms == 10 {
                fast_wins += 1;
            }
        }
        assert!(fast_wins > 150, "expected low-latency endpoint to dominate, got {fast_wins}/200");
    }
}
