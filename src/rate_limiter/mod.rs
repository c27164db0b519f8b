//! Rate limiting with pluggable strategies, key generation and storage

pub mod key;
pub mod store;
pub mod strategy;

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::events::{RiskLevel, SecurityEvent, SecurityEventType, SecurityRequest};

pub use key::{DefaultKeyGenerator, IpKeyGenerator, KeyGenerator, UserOrIpKeyGenerator};
pub use store::{MemoryStore, RateLimitEntry, RateLimitStore};
pub use strategy::RateLimitStrategy;

use strategy::Verdict;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Request class this limiter guards, part of every key
    pub scope: String,
    /// Maximum requests per window
    pub max_requests: u32,
    /// Time window duration
    pub window_duration: Duration,
    pub strategy: RateLimitStrategy,
    /// Whether to enable rate limiting
    pub enabled: bool,
    /// IPs or user ids that are never limited
    pub whitelist: HashSet<String>,
    /// IPs or user ids that are always denied
    pub blacklist: HashSet<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            scope: "general".to_string(),
            max_requests: 100,
            window_duration: Duration::from_secs(60),
            strategy: RateLimitStrategy::FixedWindow,
            enabled: true,
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
        }
    }
}

impl RateLimitConfig {
    fn window_ms(&self) -> i64 {
        (self.window_duration.as_millis() as i64).max(1)
    }
}

/// Decision for a single request
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_time: DateTime<Utc>,
    /// Event raised by a denial, for the monitor to ingest
    pub event: Option<SecurityEvent>,
}

impl RateLimitDecision {
    /// Whole seconds from `now` until the quota frees up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub tracked_keys: usize,
    /// Requests counted by the live entries
    pub total_requests: u64,
    pub allowed_total: u64,
    pub denied_total: u64,
    pub config: RateLimitConfig,
}

/// Rate limiter keyed per request identity
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    key_generator: Arc<dyn KeyGenerator>,
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter backed by the in-memory store
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            key_generator: Arc::new(DefaultKeyGenerator),
            allowed_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
        }
    }

    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Composite storage key: `strategy-scope:identity`
    pub fn key_for(&self, request: &SecurityRequest) -> String {
        format!(
            "{}-{}:{}",
            self.config.strategy.as_str(),
            self.config.scope,
            self.key_generator.identity(request)
        )
    }

    /// Check whether `request` fits the quota, using the request timestamp as the clock
    pub async fn check_limit(&self, request: &SecurityRequest) -> RateLimitDecision {
        let now_ms = request.timestamp_ms();
        let limit = self.config.max_requests;

        if self.is_listed(&self.config.blacklist, request) {
            self.denied_total.fetch_add(1, Ordering::Relaxed);
            warn!(
                scope = %self.config.scope,
                ip = %request.ip,
                "Blacklisted identity denied"
            );
            let event = SecurityEvent::new(SecurityEventType::BlacklistedAccess, RiskLevel::High)
                .with_request(request)
                .with_detail("scope", self.config.scope.clone())
                .with_detail("path", request.path.clone())
                .with_detail("method", request.method.clone());
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit,
                reset_time: request.timestamp + self.config.window_duration,
                event: Some(event),
            };
        }

        if !self.config.enabled || self.is_listed(&self.config.whitelist, request) {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
            return RateLimitDecision {
                allowed: true,
                remaining: limit,
                limit,
                reset_time: request.timestamp + self.config.window_duration,
                event: None,
            };
        }

        let key = self.key_for(request);
        let window_ms = self.config.window_ms();
        let strategy = self.config.strategy;

        let mut verdict: Option<Verdict> = None;
        self.store.update(&key, &mut |entry| {
            let (next, outcome) = strategy::apply(strategy, entry, now_ms, limit, window_ms);
            verdict = Some(outcome);
            next
        });

        let verdict = verdict.unwrap_or_else(|| {
            error!(key = %key, "Rate limit store skipped the update; denying request");
            Verdict {
                allowed: false,
                remaining: 0,
                reset_ms: now_ms + window_ms,
                usage: limit,
            }
        });

        let reset_time = millis_to_datetime(verdict.reset_ms);

        if verdict.allowed {
            self.allowed_total.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Request allowed for key: {} ({} remaining of {})",
                key, verdict.remaining, limit
            );
            return RateLimitDecision {
                allowed: true,
                remaining: verdict.remaining,
                limit,
                reset_time,
                event: None,
            };
        }

        self.denied_total.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Rate limit exceeded for key: {} ({} used, limit {}, strategy {})",
            key, verdict.usage, limit, strategy
        );

        let event = SecurityEvent::new(SecurityEventType::RateLimitExceeded, RiskLevel::Medium)
            .with_request(request)
            .with_detail("strategy", strategy.as_str())
            .with_detail("scope", self.config.scope.clone())
            .with_detail("count", verdict.usage)
            .with_detail("limit", limit)
            .with_detail("key", key)
            .with_detail("path", request.path.clone())
            .with_detail("method", request.method.clone());

        RateLimitDecision {
            allowed: false,
            remaining: 0,
            limit,
            reset_time,
            event: Some(event),
        }
    }

    /// Current entry for the request's key
    pub async fn get_usage(&self, request: &SecurityRequest) -> Option<RateLimitEntry> {
        self.store.get(&self.key_for(request))
    }

    /// Reset rate limit for the request's key
    pub async fn reset(&self, request: &SecurityRequest) {
        let key = self.key_for(request);
        self.store.remove(&key);
        debug!("Rate limit reset for key: {}", key);
    }

    /// Remove entries idle for more than two windows as of `now`
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let window_ms = self.config.window_ms();
        let removed = self
            .store
            .retain(&mut |_, entry| !entry.is_stale(now_ms, window_ms));

        debug!(
            "Cleaned up {} expired rate limit records for scope {}",
            removed, self.config.scope
        );
        removed
    }

    /// Remove entries idle for more than two windows
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now()).await
    }

    /// Get statistics
    pub async fn get_stats(&self) -> RateLimitStats {
        let snapshot = self.store.snapshot();
        let total_requests = snapshot.iter().map(|(_, entry)| entry.count as u64).sum();

        RateLimitStats {
            tracked_keys: snapshot.len(),
            total_requests,
            allowed_total: self.allowed_total.load(Ordering::Relaxed),
            denied_total: self.denied_total.load(Ordering::Relaxed),
            config: self.config.clone(),
        }
    }

    fn is_listed(&self, list: &HashSet<String>, request: &SecurityRequest) -> bool {
        list.contains(&request.ip)
            || request
                .user_id
                .as_ref()
                .is_some_and(|user| list.contains(user))
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        millis_to_datetime(ms)
    }

    fn request(ms: i64) -> SecurityRequest {
        SecurityRequest::new("POST", "/auth/login", "10.0.0.1").at(at(ms))
    }

    fn limiter(max_requests: u32, strategy: RateLimitStrategy) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            scope: "auth".to_string(),
            max_requests,
            window_duration: Duration::from_secs(60),
            strategy,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_rate_limit_allows_requests() {
        let limiter = limiter(5, RateLimitStrategy::FixedWindow);

        for i in 0..5 {
            let decision = limiter.check_limit(&request(60_000 + i)).await;
            assert!(decision.allowed, "Request {} should be allowed", i);
            assert_eq!(decision.remaining, 4 - i as u32);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_excess_with_event() {
        let limiter = limiter(3, RateLimitStrategy::FixedWindow);

        for _ in 0..3 {
            assert!(limiter.check_limit(&request(60_000)).await.allowed);
        }

        let denied = limiter.check_limit(&request(60_001)).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_time, at(120_000));
        assert_eq!(denied.retry_after_secs(at(60_001)), 60);

        let event = denied.event.expect("denial raises an event");
        assert_eq!(event.event_type, SecurityEventType::RateLimitExceeded);
        assert_eq!(event.risk_level, RiskLevel::Medium);
        assert_eq!(event.detail_str("strategy"), Some("fixed_window"));
        assert_eq!(event.detail_str("scope"), Some("auth"));
        assert_eq!(event.details["limit"], 3);
        assert_eq!(event.ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let limiter = limiter(2, RateLimitStrategy::TokenBucket);

        limiter.check_limit(&request(0)).await;
        limiter.check_limit(&request(0)).await;
        assert!(!limiter.check_limit(&request(0)).await.allowed);

        let other = SecurityRequest::new("POST", "/auth/login", "10.0.0.2").at(at(0));
        assert!(limiter.check_limit(&other).await.allowed);
    }

    #[tokio::test]
    async fn test_rate_limit_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            enabled: false,
            ..Default::default()
        });

        for _ in 0..10 {
            let decision = limiter.check_limit(&request(0)).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
    }

    #[tokio::test]
    async fn test_whitelist_and_blacklist() {
        let mut config = RateLimitConfig {
            max_requests: 1,
            ..Default::default()
        };
        config.whitelist.insert("10.0.0.1".to_string());
        config.blacklist.insert("mallory".to_string());
        let limiter = RateLimiter::new(config);

        for _ in 0..5 {
            let decision = limiter.check_limit(&request(0)).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }

        let blocked = SecurityRequest::new("GET", "/", "10.9.9.9")
            .with_user_id("mallory")
            .at(at(0));
        let decision = limiter.check_limit(&blocked).await;
        assert!(!decision.allowed);
        let event = decision.event.unwrap();
        assert_eq!(event.event_type, SecurityEventType::BlacklistedAccess);
        assert_eq!(event.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_reset_clears_quota() {
        let limiter = limiter(1, RateLimitStrategy::LeakyBucket);
        assert!(limiter.check_limit(&request(0)).await.allowed);
        assert!(!limiter.check_limit(&request(0)).await.allowed);

        limiter.reset(&request(0)).await;
        assert!(limiter.get_usage(&request(0)).await.is_none());
        assert!(limiter.check_limit(&request(0)).await.allowed);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale_entries() {
        let limiter = limiter(10, RateLimitStrategy::FixedWindow);
        let old = SecurityRequest::new("GET", "/old", "10.0.0.1").at(at(0));
        let recent = SecurityRequest::new("GET", "/recent", "10.0.0.1").at(at(100_000));

        limiter.check_limit(&old).await;
        limiter.check_limit(&recent).await;

        // window is 60s, so `old` is stale after 120s of inactivity
        let removed = limiter.cleanup_expired_at(at(130_000)).await;
        assert_eq!(removed, 1);
        assert!(limiter.get_usage(&old).await.is_none());
        assert_eq!(limiter.get_usage(&recent).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_custom_key_generator_shares_quota_across_paths() {
        let limiter = limiter(2, RateLimitStrategy::FixedWindow)
            .with_key_generator(Arc::new(IpKeyGenerator));

        let a = SecurityRequest::new("GET", "/a", "10.0.0.1").at(at(0));
        let b = SecurityRequest::new("GET", "/b", "10.0.0.1").at(at(0));
        assert!(limiter.check_limit(&a).await.allowed);
        assert!(limiter.check_limit(&b).await.allowed);
        assert!(!limiter.check_limit(&a).await.allowed);
        assert_eq!(limiter.key_for(&a), "fixed_window-auth:10.0.0.1");
    }

    #[tokio::test]
    async fn test_stats() {
        let limiter = limiter(1, RateLimitStrategy::FixedWindow);
        limiter.check_limit(&request(0)).await;
        limiter.check_limit(&request(0)).await;

        let stats = limiter.get_stats().await;
        assert_eq!(stats.tracked_keys, 1);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.allowed_total, 1);
        assert_eq!(stats.denied_total, 1);
    }
}
