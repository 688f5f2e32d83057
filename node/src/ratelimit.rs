// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-client token bucket rate limiting.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Buckets idle this long are forgotten once the table grows large.
const IDLE_EVICTION: Duration = Duration::from_secs(600);
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    /// Bucket empty.
    Limited,
    /// Address is blacklisted.
    Blocked,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        let refill_per_sec = f64::from(config.requests_per_minute) / 60.0;
        Self {
            config,
            capacity,
            refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Whether requests to `path` are subject to limiting at all.
    pub fn applies_to(&self, path: &str) -> bool {
        self.config.enabled && (!self.config.ingest_only || path == "/v1/ingest")
    }

    /// Charge one request to `ip`. Unknown clients share one bucket.
    pub fn check(&self, ip: Option<IpAddr>, now: Instant) -> RateDecision {
        let ip = ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        if self.config.blacklist_ips.contains(&ip) {
            return RateDecision::Blocked;
        }
        if self.config.whitelist_ips.contains(&ip) {
            return RateDecision::Allow;
        }

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.len() >= MAX_TRACKED_CLIENTS {
            buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < IDLE_EVICTION);
        }

        let capacity = self.capacity;
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allow
        } else {
            RateDecision::Limited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: rpm,
            burst,
            ..RateLimitConfig::default()
        })
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_burst_then_limited() {
        let rl = limiter(60, 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(rl.check(ip("10.0.0.1"), now), RateDecision::Allow);
        }
        assert_eq!(rl.check(ip("10.0.0.1"), now), RateDecision::Limited);
        // Separate bucket per client.
        assert_eq!(rl.check(ip("10.0.0.2"), now), RateDecision::Allow);
    }

    #[test]
    fn test_refill_over_time() {
        let rl = limiter(60, 1);
        let now = Instant::now();
        assert_eq!(rl.check(ip("10.0.0.1"), now), RateDecision::Allow);
        assert_eq!(rl.check(ip("10.0.0.1"), now + Duration::from_millis(500)), RateDecision::Limited);
        assert_eq!(rl.check(ip("10.0.0.1"), now + Duration::from_millis(1500)), RateDecision::Allow);
    }

    #[test]
    fn test_lists() {
        let rl = RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 1,
            burst: 1,
            whitelist_ips: vec!["127.0.0.1".parse().unwrap()],
            blacklist_ips: vec!["192.168.1.9".parse().unwrap()],
            ..RateLimitConfig::default()
        });
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(rl.check(ip("127.0.0.1"), now), RateDecision::Allow);
        }
        assert_eq!(rl.check(ip("192.168.1.9"), now), RateDecision::Blocked);
    }

    #[test]
    fn test_ingest_only_scope() {
        let mut cfg = RateLimitConfig {
            enabled: true,
            ingest_only: true,
            ..RateLimitConfig::default()
        };
        let rl = RateLimiter::new(cfg.clone());
        assert!(rl.applies_to("/v1/ingest"));
        assert!(!rl.applies_to("/health"));

        cfg.ingest_only = false;
        assert!(RateLimiter::new(cfg.clone()).applies_to("/metrics"));

        cfg.enabled = false;
        assert!(!RateLimiter::new(cfg).applies_to("/v1/ingest"));
    }
}
