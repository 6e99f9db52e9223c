//! Fixed-window request counting keyed by caller identity.
//!
//! Counters live in process memory: a restart silently resets them, and a
//! deployment running several instances effectively multiplies the limit
//! by the instance count. That is the accepted tradeoff of in-memory
//! limiting; swapping in a shared store means implementing [`RateLimiter`]
//! over something with atomic increment and expiry, without touching the
//! handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_ms: i64,
}

/// Counter store consulted once per proxied request.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str, max: u32) -> RateDecision;
}

#[derive(Debug, Clone, Copy)]
struct Record {
    count: u32,
    window_reset_at: i64,
}

/// Default in-process implementation backed by a keyed table of window
/// counters.
pub struct MemoryRateLimiter {
    window_ms: i64,
    sweep_threshold: usize,
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryRateLimiter {
    pub fn new(window_ms: i64, sweep_threshold: usize) -> Self {
        Self {
            window_ms,
            sweep_threshold,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Core check step with the clock passed in. The read-check-increment
    /// below is atomic with respect to other requests in this process; the
    /// lock is held for the whole step.
    pub async fn check_at(&self, key: &str, max: u32, now_ms: i64) -> RateDecision {
        let mut records = self.records.lock().await;

        // One-shot callers each leave one entry behind; sweep the expired
        // ones once the table grows past the threshold.
        if records.len() > self.sweep_threshold {
            records.retain(|_, record| now_ms < record.window_reset_at);
        }

        if let Some(record) = records.get_mut(key) {
            if now_ms < record.window_reset_at {
                if record.count >= max {
                    return RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_in_ms: record.window_reset_at - now_ms,
                    };
                }
                record.count += 1;
                return RateDecision {
                    allowed: true,
                    remaining: max.saturating_sub(record.count),
                    reset_in_ms: record.window_reset_at - now_ms,
                };
            }
        }

        // First request for this key, or its window already expired.
        records.insert(
            key.to_string(),
            Record {
                count: 1,
                window_reset_at: now_ms + self.window_ms,
            },
        );
        RateDecision {
            allowed: true,
            remaining: max.saturating_sub(1),
            reset_in_ms: self.window_ms,
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, key: &str, max: u32) -> RateDecision {
        self.check_at(key, max, Utc::now().timestamp_millis()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_MS: i64 = 60_000;

    fn limiter() -> MemoryRateLimiter {
        MemoryRateLimiter::new(WINDOW_MS, 10_000)
    }

    #[tokio::test]
    async fn counts_down_remaining_within_a_window() {
        let limiter = limiter();
        let now = 1_000;
        for expected in [4, 3, 2, 1, 0] {
            let decision = limiter.check_at("ip:1.2.3.4", 5, now).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let sixth = limiter.check_at("ip:1.2.3.4", 5, now).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert!(sixth.reset_in_ms > 0);
    }

    #[tokio::test]
    async fn window_expiry_starts_a_fresh_count() {
        let limiter = limiter();
        let now = 1_000;
        for _ in 0..5 {
            limiter.check_at("ip:1.2.3.4", 5, now).await;
        }
        assert!(!limiter.check_at("ip:1.2.3.4", 5, now).await.allowed);

        let later = now + WINDOW_MS;
        let fresh = limiter.check_at("ip:1.2.3.4", 5, later).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
        assert_eq!(fresh.reset_in_ms, WINDOW_MS);
    }

    #[tokio::test]
    async fn rejections_do_not_mutate_the_stored_count() {
        let limiter = limiter();
        let now = 1_000;
        for _ in 0..3 {
            limiter.check_at("ip:1.2.3.4", 3, now).await;
        }

        let first_denial = limiter.check_at("ip:1.2.3.4", 3, now + 10).await;
        let second_denial = limiter.check_at("ip:1.2.3.4", 3, now + 10).await;
        assert!(!first_denial.allowed);
        assert!(!second_denial.allowed);
        assert_eq!(first_denial.reset_in_ms, second_denial.reset_in_ms);

        // Had the denials incremented the count, the fresh window below
        // would still be tracking the stale value.
        let fresh = limiter.check_at("ip:1.2.3.4", 3, now + WINDOW_MS).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_counters() {
        let limiter = limiter();
        let now = 1_000;
        for _ in 0..2 {
            limiter.check_at("ip:1.2.3.4", 2, now).await;
        }
        assert!(!limiter.check_at("ip:1.2.3.4", 2, now).await.allowed);

        let other = limiter.check_at("user:abc", 100, now).await;
        assert!(other.allowed);
        assert_eq!(other.remaining, 99);
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries_once_past_the_threshold() {
        let limiter = MemoryRateLimiter::new(WINDOW_MS, 4);
        let now = 1_000;
        for i in 0..6 {
            limiter.check_at(&format!("ip:10.0.0.{i}"), 5, now).await;
        }
        assert_eq!(limiter.len().await, 6);

        // All six windows have expired by now; the next check sweeps them.
        let later = now + WINDOW_MS + 1;
        limiter.check_at("ip:fresh", 5, later).await;
        assert_eq!(limiter.len().await, 1);
    }
}
