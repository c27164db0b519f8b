//! Metrics collection and reporting

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::SecurityError;

/// Point-in-time metric values
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySnapshot {
    /// Requests run through the pipeline
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rate_limited: u64,
    pub csrf_rejected: u64,
    pub validation_rejected: u64,
    pub blocked: u64,
    pub internal_errors: u64,
    pub events_logged: u64,
    pub alerts_raised: u64,
    pub cleanup_runs: u64,
    pub cleanup_removed: u64,
    /// Average decision time in microseconds
    pub avg_decision_time_us: f64,
    pub uptime_secs: u64,
}

/// Decision latency buckets (in microseconds)
const LATENCY_BUCKETS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 50000.0,
];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        let bucket_counters = buckets
            .iter()
            .map(|&b| (b, Arc::new(AtomicU64::new(0))))
            .collect();

        Self {
            buckets: bucket_counters,
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative: every bucket at or above the value counts it
        for (bucket, counter) in &self.buckets {
            if value <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            let count = counter.load(Ordering::Relaxed);
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bucket, count));
        }

        let total_count = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total_count));

        let sum = self.sum.load(Ordering::Relaxed) as f64;
        output.push_str(&format!("{}_sum {:.3}\n", name, sum));
        output.push_str(&format!("{}_count {}\n", name, total_count));

        output
    }
}

/// Counters for the security pipeline
pub struct SecurityMetrics {
    start_time: Instant,
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    rate_limited: AtomicU64,
    csrf_rejected: AtomicU64,
    validation_rejected: AtomicU64,
    blocked: AtomicU64,
    internal_errors: AtomicU64,
    events_logged: AtomicU64,
    alerts_raised: AtomicU64,
    cleanup_runs: AtomicU64,
    cleanup_removed: AtomicU64,
    total_decision_time_us: AtomicU64,
    decision_latency: Histogram,
}

impl SecurityMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            allowed_requests: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            csrf_rejected: AtomicU64::new(0),
            validation_rejected: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            events_logged: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            cleanup_runs: AtomicU64::new(0),
            cleanup_removed: AtomicU64::new(0),
            total_decision_time_us: AtomicU64::new(0),
            decision_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a pipeline decision and how long it took
    pub fn record_decision(&self, error: Option<&SecurityError>, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let micros = elapsed.as_micros() as u64;
        self.total_decision_time_us.fetch_add(micros, Ordering::Relaxed);
        self.decision_latency.observe(micros as f64);

        let counter = match error {
            None => &self.allowed_requests,
            Some(SecurityError::RateLimit { .. }) => &self.rate_limited,
            Some(SecurityError::Csrf(_)) => &self.csrf_rejected,
            Some(SecurityError::Validation { .. }) => &self.validation_rejected,
            Some(SecurityError::Blocked { .. }) => &self.blocked,
            Some(SecurityError::Internal(_)) => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self, raised_alert: bool) {
        self.events_logged.fetch_add(1, Ordering::Relaxed);
        if raised_alert {
            self.alerts_raised.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one cleanup pass
    pub fn record_cleanup(&self, removed: usize) {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        self.cleanup_removed.fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SecuritySnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_time = self.total_decision_time_us.load(Ordering::Relaxed);

        let avg_decision_time_us = if total_requests > 0 {
            total_time as f64 / total_requests as f64
        } else {
            0.0
        };

        SecuritySnapshot {
            total_requests,
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            csrf_rejected: self.csrf_rejected.load(Ordering::Relaxed),
            validation_rejected: self.validation_rejected.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            events_logged: self.events_logged.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            cleanup_removed: self.cleanup_removed.load(Ordering::Relaxed),
            avg_decision_time_us,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let s = self.snapshot();

        let mut output = format!(
            "# HELP security_core_requests_total Requests evaluated by the pipeline\n\
             # TYPE security_core_requests_total counter\n\
             security_core_requests_total {}\n\
             \n\
             # HELP security_core_requests_allowed_total Requests allowed\n\
             # TYPE security_core_requests_allowed_total counter\n\
             security_core_requests_allowed_total {}\n\
             \n\
             # HELP security_core_requests_denied_total Requests denied, by reason\n\
             # TYPE security_core_requests_denied_total counter\n\
             security_core_requests_denied_total{{reason=\"rate_limit\"}} {}\n\
             security_core_requests_denied_total{{reason=\"csrf\"}} {}\n\
             security_core_requests_denied_total{{reason=\"validation\"}} {}\n\
             security_core_requests_denied_total{{reason=\"blocked\"}} {}\n\
             security_core_requests_denied_total{{reason=\"internal\"}} {}\n\
             \n\
             # HELP security_core_events_total Security events logged\n\
             # TYPE security_core_events_total counter\n\
             security_core_events_total {}\n\
             \n\
             # HELP security_core_alerts_total Security alerts raised\n\
             # TYPE security_core_alerts_total counter\n\
             security_core_alerts_total {}\n\
             \n\
             # HELP security_core_cleanup_runs_total Cleanup passes\n\
             # TYPE security_core_cleanup_runs_total counter\n\
             security_core_cleanup_runs_total {}\n\
             \n\
             # HELP security_core_cleanup_removed_total Entries removed by cleanup\n\
             # TYPE security_core_cleanup_removed_total counter\n\
             security_core_cleanup_removed_total {}\n\
             \n\
             # HELP security_core_avg_decision_time_us Average decision time in microseconds\n\
             # TYPE security_core_avg_decision_time_us gauge\n\
             security_core_avg_decision_time_us {:.2}\n\
             \n\
             # HELP security_core_uptime_seconds Uptime in seconds\n\
             # TYPE security_core_uptime_seconds counter\n\
             security_core_uptime_seconds {}\n\
             \n",
            s.total_requests,
            s.allowed_requests,
            s.rate_limited,
            s.csrf_rejected,
            s.validation_rejected,
            s.blocked,
            s.internal_errors,
            s.events_logged,
            s.alerts_raised,
            s.cleanup_runs,
            s.cleanup_removed,
            s.avg_decision_time_us,
            s.uptime_secs,
        );

        output.push_str(&self.decision_latency.export_prometheus(
            "security_core_decision_duration_us",
            "Pipeline decision duration in microseconds",
        ));

        output
    }
}

impl Default for SecurityMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_decisions_counted_by_reason() {
        let metrics = SecurityMetrics::new();
        let rate_limited = SecurityError::RateLimit {
            limit: 5,
            retry_after_secs: 10,
            reset_time: Utc::now(),
        };

        metrics.record_decision(None, Duration::from_micros(100));
        metrics.record_decision(Some(&rate_limited), Duration::from_micros(300));
        metrics.record_event(true);
        metrics.record_event(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.allowed_requests, 1);
        assert_eq!(snapshot.rate_limited, 1);
        assert_eq!(snapshot.events_logged, 2);
        assert_eq!(snapshot.alerts_raised, 1);
        assert_eq!(snapshot.avg_decision_time_us, 200.0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = SecurityMetrics::new();
        metrics.record_decision(None, Duration::from_micros(40));
        metrics.record_cleanup(3);

        let prometheus = metrics.export_prometheus();

        assert!(prometheus.contains("security_core_requests_total 1"));
        assert!(prometheus.contains("security_core_requests_denied_total{reason=\"csrf\"} 0"));
        assert!(prometheus.contains("security_core_cleanup_removed_total 3"));
        assert!(prometheus.contains("security_core_decision_duration_us_bucket{le=\"50\"} 1"));
        assert!(prometheus.contains("security_core_decision_duration_us_count 1"));
    }
}
