//! §4.E Rate limiter — per-key fixed-window RPM counter over the shared
//! fast store. Fixed window, not sliding; see spec.md §9 design notes.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::errors::{GatewayError, Result};

const WINDOW_SECONDS: u64 = 60;

/// Returns `Ok(())` under the limit, `Err(RateLimitExceeded)` over it.
/// TTL is set only on the window's first increment (`n == 1`) so the
/// window's lifetime is exactly 60s from the first request in it.
pub async fn check(
    redis: &mut ConnectionManager,
    api_key_id: Uuid,
    rate_limit_rpm: i32,
) -> Result<()> {
    let key = format!("ratelimit:{api_key_id}");
    let n: i64 = redis.incr(&key, 1).await?;
    if n == 1 {
        let _: () = redis.expire(&key, WINDOW_SECONDS as i64).await?;
    }
    if n > rate_limit_rpm as i64 {
        return Err(GatewayError::RateLimitExceeded);
    }
    Ok(())
}
