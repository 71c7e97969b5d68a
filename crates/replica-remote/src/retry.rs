use std::time::Duration;

use rand::Rng;
use replica_core::config::RetryPolicy;
use serde::Serialize;

use crate::error::RemoteError;

// ─── Retried ──────────────────────────────────────────────────────────────

/// A successful call together with its retry history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retried<T> {
    pub value: T,
    /// Calls made, including the successful one.
    pub attempts: u32,
    /// Waits slept between attempts, in order.
    pub delays: Vec<Duration>,
}

impl<T> Retried<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Retried<U> {
        Retried {
            value: f(self.value),
            attempts: self.attempts,
            delays: self.delays,
        }
    }
}

// ─── Delay calculation ────────────────────────────────────────────────────

/// Wait before retry number `retry` (1-based) after `error`.
///
/// A server-provided `Retry-After` wins over the computed back-off but is
/// clamped to the policy cap.
pub fn delay_for(policy: &RetryPolicy, retry: u32, error: &RemoteError) -> Duration {
    if let Some(after) = error.retry_after() {
        return after.min(policy.max_delay());
    }
    let base = policy.backoff(retry);
    if !policy.jitter {
        return base;
    }
    let ms = base.as_millis() as f64;
    let spread = ms * 0.25;
    let jittered = ms + rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
