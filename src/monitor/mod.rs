//! Security event monitoring, alerting and audit logging
//!
//! The monitor keeps a bounded in-memory log of [`SecurityEvent`]s, counts
//! events per `(event type, identity)` inside each type's time window, and
//! raises a [`SecurityAlert`] once a count reaches its threshold or a
//! critical event arrives. Audit entries are kept in a separate bounded log.

pub mod rules;
pub mod stats;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::events::{
    AuditLogEntry, AuditOutcome, Details, RiskLevel, SecurityAlert, SecurityEvent,
    SecurityEventType,
};

pub use rules::{alert_text, default_threshold, ThresholdTable};
pub use stats::{AuditFilter, CleanupReport, EventFilter, MonitorStats};

/// Monitor errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Alert not found: {alert_id}")]
    AlertNotFound { alert_id: Uuid },
}

/// Events counted for one `(budget type, identity)` pair
///
/// `event_ids` keeps at most the threshold's worth of the latest ids, and
/// `alerted` is set once the window has produced its threshold alert.
#[derive(Debug, Clone)]
struct RollingCount {
    count: u32,
    window_start: DateTime<Utc>,
    event_ids: VecDeque<Uuid>,
    alerted: bool,
}

type CountKey = (SecurityEventType, String);

/// Security event monitor
pub struct SecurityMonitor {
    config: MonitorConfig,
    thresholds: ThresholdTable,
    events: RwLock<VecDeque<SecurityEvent>>,
    alerts: RwLock<Vec<SecurityAlert>>,
    audit_log: RwLock<VecDeque<AuditLogEntry>>,
    counts: RwLock<HashMap<CountKey, RollingCount>>,
}

impl SecurityMonitor {
    /// Create a new monitor
    pub fn new(config: MonitorConfig) -> Self {
        let thresholds = ThresholdTable::new(&config.thresholds);
        Self {
            config,
            thresholds,
            events: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(Vec::new()),
            audit_log: RwLock::new(VecDeque::new()),
            counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Record an event, returning the alert it triggered, if any
    pub async fn log_event(&self, event: SecurityEvent) -> Option<SecurityAlert> {
        trace_event(&event);

        let budget = self.thresholds.budget_for(&event);
        let rule = self.thresholds.get(budget);
        let window = ChronoDuration::seconds(rule.window_secs as i64);
        let key = (budget, event.identity().to_string());

        let (count, alert) = {
            let mut counts = self.counts.write().await;
            let entry = counts.entry(key).or_insert_with(|| RollingCount {
                count: 0,
                window_start: event.timestamp,
                event_ids: VecDeque::new(),
                alerted: false,
            });

            if entry.count > 0 && event.timestamp - entry.window_start < window {
                entry.count = entry.count.saturating_add(1);
            } else {
                entry.count = 1;
                entry.window_start = event.timestamp;
                entry.event_ids.clear();
                entry.alerted = false;
            }
            entry.event_ids.push_back(event.id);
            while entry.event_ids.len() > rule.threshold.max(1) as usize {
                entry.event_ids.pop_front();
            }

            // One threshold alert per window; critical events always alert
            let crossed = entry.count >= rule.threshold && !entry.alerted;
            if crossed {
                entry.alerted = true;
            }
            let alert = (crossed || event.risk_level == RiskLevel::Critical).then(|| {
                build_alert(&event, entry.event_ids.iter().copied().collect(), entry.count)
            });

            (entry.count, alert)
        };

        {
            let mut events = self.events.write().await;
            events.push_back(event);
            while events.len() > self.config.max_events {
                events.pop_front();
            }
        }

        if let Some(alert) = &alert {
            warn!(
                alert_id = %alert.id,
                event_type = %alert.event_type,
                severity = %alert.severity,
                count,
                threshold = rule.threshold,
                "Security alert raised: {}",
                alert.message
            );
            let mut alerts = self.alerts.write().await;
            alerts.push(alert.clone());
            while alerts.len() > self.config.max_alerts {
                let oldest = alerts.iter().position(|a| a.resolved).unwrap_or(0);
                alerts.remove(oldest);
            }
        }

        alert
    }

    /// Record an audit entry built from its parts
    pub async fn log_audit(
        &self,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        details: Details,
    ) -> AuditLogEntry {
        let entry = AuditLogEntry::new(action, resource, outcome).with_details(details);
        self.log_audit_entry(entry.clone()).await;
        entry
    }

    /// Record a fully built audit entry
    pub async fn log_audit_entry(&self, entry: AuditLogEntry) {
        debug!(
            action = %entry.action,
            resource = %entry.resource,
            outcome = ?entry.outcome,
            "Audit"
        );

        let mut audit_log = self.audit_log.write().await;
        audit_log.push_back(entry);
        while audit_log.len() > self.config.max_audit_entries {
            audit_log.pop_front();
        }
    }

    /// Events matching `filter`, oldest first
    pub async fn get_events(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        let matched = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        stats::take_latest(matched, filter.limit)
    }

    /// Alerts, oldest first
    pub async fn get_alerts(&self, unresolved_only: bool) -> Vec<SecurityAlert> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|alert| !unresolved_only || !alert.resolved)
            .cloned()
            .collect()
    }

    /// Audit entries matching `filter`, oldest first
    pub async fn get_audit_logs(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        let audit_log = self.audit_log.read().await;
        let matched = audit_log.iter().filter(|e| filter.matches(e)).cloned().collect();
        stats::take_latest(matched, filter.limit)
    }

    /// Mark an alert as resolved
    pub async fn resolve_alert(&self, alert_id: Uuid) -> Result<SecurityAlert, MonitorError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|alert| alert.id == alert_id)
            .ok_or(MonitorError::AlertNotFound { alert_id })?;

        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
            info!("Alert {} resolved", alert_id);
        }

        Ok(alert.clone())
    }

    /// Aggregate statistics
    pub async fn get_stats(&self) -> MonitorStats {
        let mut stats = MonitorStats::default();

        {
            let events = self.events.read().await;
            stats.total_events = events.len();
            for event in events.iter() {
                *stats.events_by_type.entry(event.event_type).or_default() += 1;
                *stats.events_by_risk.entry(event.risk_level).or_default() += 1;
            }
        }

        {
            let alerts = self.alerts.read().await;
            stats.total_alerts = alerts.len();
            for alert in alerts.iter() {
                if !alert.resolved {
                    stats.unresolved_alerts += 1;
                }
                *stats.alerts_by_type.entry(alert.event_type).or_default() += 1;
                *stats.alerts_by_severity.entry(alert.severity).or_default() += 1;
            }
        }

        stats.total_audit_entries = self.audit_log.read().await.len();
        stats
    }

    /// Drop data older than the retention period as of `now`.
    ///
    /// Resolved alerts past retention go too; open alerts are kept.
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = now - ChronoDuration::seconds(self.config.retention_secs as i64);
        let mut report = CleanupReport::default();

        {
            let mut events = self.events.write().await;
            let before = events.len();
            events.retain(|event| event.timestamp >= cutoff);
            report.events = before - events.len();
        }

        {
            let mut audit_log = self.audit_log.write().await;
            let before = audit_log.len();
            audit_log.retain(|entry| entry.timestamp >= cutoff);
            report.audit_entries = before - audit_log.len();
        }

        {
            let mut alerts = self.alerts.write().await;
            let before = alerts.len();
            alerts.retain(|alert| !alert.resolved || alert.timestamp >= cutoff);
            report.alerts = before - alerts.len();
        }

        {
            let mut counts = self.counts.write().await;
            let before = counts.len();
            counts.retain(|(budget, _), count| {
                let window = ChronoDuration::seconds(self.thresholds.get(*budget).window_secs as i64);
                now - count.window_start < window
            });
            report.counters = before - counts.len();
        }

        if report.total() > 0 {
            info!(
                events = report.events,
                audit_entries = report.audit_entries,
                alerts = report.alerts,
                counters = report.counters,
                "Monitor retention cleanup"
            );
        }

        report
    }

    /// Drop data older than the retention period
    pub async fn cleanup_expired(&self) -> CleanupReport {
        self.cleanup_expired_at(Utc::now()).await
    }
}

fn trace_event(event: &SecurityEvent) {
    let identity = event.identity();
    match event.risk_level {
        RiskLevel::Critical => error!(
            event_id = %event.id,
            event_type = %event.event_type,
            identity,
            "Critical security event"
        ),
        RiskLevel::High => warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            identity,
            "High risk security event"
        ),
        RiskLevel::Medium => info!(
            event_id = %event.id,
            event_type = %event.event_type,
            identity,
            "Security event"
        ),
        RiskLevel::Low => debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            identity,
            "Security event"
        ),
    }
}

fn build_alert(event: &SecurityEvent, event_ids: Vec<Uuid>, count: u32) -> SecurityAlert {
    let (message, actions) = alert_text(event.event_type);

    let mut affected_resources = Vec::new();
    if let Some(path) = event.detail_str("path") {
        affected_resources.push(format!("path:{}", path));
    }
    if let Some(user) = &event.user_id {
        affected_resources.push(format!("user:{}", user));
    }
    if let Some(ip) = &event.ip {
        affected_resources.push(format!("ip:{}", ip));
    }

    let message = if count > 1 {
        format!("{} ({} events for {})", message, count, event.identity())
    } else {
        format!("{} ({})", message, event.identity())
    };

    SecurityAlert {
        id: Uuid::new_v4(),
        event_type: event.event_type,
        severity: event.risk_level,
        message,
        timestamp: event.timestamp,
        event_ids,
        affected_resources,
        recommended_actions: actions.iter().map(|a| a.to_string()).collect(),
        resolved: false,
        resolved_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdSettings;

    fn monitor() -> SecurityMonitor {
        SecurityMonitor::new(MonitorConfig::default())
    }

    fn event(event_type: SecurityEventType, risk: RiskLevel, at: DateTime<Utc>) -> SecurityEvent {
        SecurityEvent::new(event_type, risk).with_ip("10.0.0.7").at(at)
    }

    #[tokio::test]
    async fn test_threshold_reached_produces_one_alert() {
        let monitor = monitor();
        let start = Utc::now();

        for i in 0..4 {
            let alert = monitor
                .log_event(event(
                    SecurityEventType::AuthenticationFailure,
                    RiskLevel::Medium,
                    start + ChronoDuration::seconds(i),
                ))
                .await;
            assert!(alert.is_none(), "no alert below threshold");
        }

        let alert = monitor
            .log_event(event(
                SecurityEventType::AuthenticationFailure,
                RiskLevel::Medium,
                start + ChronoDuration::seconds(5),
            ))
            .await
            .expect("fifth failure reaches the threshold");

        assert_eq!(alert.event_type, SecurityEventType::AuthenticationFailure);
        assert_eq!(alert.event_ids.len(), 5);
        assert!(alert.affected_resources.contains(&"ip:10.0.0.7".to_string()));
        assert!(!alert.recommended_actions.is_empty());
        assert_eq!(monitor.get_alerts(false).await.len(), 1);
    }

    #[tokio::test]
    async fn test_sustained_flood_alerts_once_per_window() {
        let monitor = monitor();
        let start = Utc::now();

        let mut raised = 0;
        for i in 0..2000 {
            let at = start + ChronoDuration::milliseconds(i);
            if monitor
                .log_event(event(SecurityEventType::AuthenticationFailure, RiskLevel::Medium, at))
                .await
                .is_some()
            {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);

        let alerts = monitor.get_alerts(false).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event_ids.len(), 5);

        // A new window may alert again
        let later = start + ChronoDuration::minutes(20);
        for i in 0..5 {
            monitor
                .log_event(event(
                    SecurityEventType::AuthenticationFailure,
                    RiskLevel::Medium,
                    later + ChronoDuration::seconds(i),
                ))
                .await;
        }
        assert_eq!(monitor.get_alerts(false).await.len(), 2);
    }

    #[tokio::test]
    async fn test_alert_store_is_bounded() {
        let monitor = SecurityMonitor::new(MonitorConfig {
            max_alerts: 3,
            ..Default::default()
        });
        let now = Utc::now();

        let first = monitor
            .log_event(event(SecurityEventType::SuspiciousActivity, RiskLevel::Critical, now))
            .await
            .unwrap();
        let second = monitor
            .log_event(event(SecurityEventType::SuspiciousActivity, RiskLevel::Critical, now))
            .await
            .unwrap();
        monitor.resolve_alert(second.id).await.unwrap();

        for _ in 0..2 {
            monitor
                .log_event(event(SecurityEventType::SuspiciousActivity, RiskLevel::Critical, now))
                .await;
        }

        // The resolved alert goes first, then the oldest open one
        let ids: Vec<Uuid> = monitor.get_alerts(false).await.iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&first.id));
        assert!(!ids.contains(&second.id));

        monitor
            .log_event(event(SecurityEventType::SuspiciousActivity, RiskLevel::Critical, now))
            .await;
        let ids: Vec<Uuid> = monitor.get_alerts(false).await.iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&first.id));
    }

    #[tokio::test]
    async fn test_count_resets_outside_window() {
        let monitor = monitor();
        let start = Utc::now();

        for i in 0..4 {
            monitor
                .log_event(event(
                    SecurityEventType::AuthenticationFailure,
                    RiskLevel::Medium,
                    start + ChronoDuration::seconds(i),
                ))
                .await;
        }

        // 16 minutes later the 15 minute window has lapsed
        let late = start + ChronoDuration::minutes(16);
        let alert = monitor
            .log_event(event(SecurityEventType::AuthenticationFailure, RiskLevel::Medium, late))
            .await;
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn test_critical_event_always_alerts() {
        let monitor = monitor();
        let alert = monitor
            .log_event(event(SecurityEventType::SuspiciousActivity, RiskLevel::Critical, Utc::now()))
            .await;

        let alert = alert.expect("critical events alert immediately");
        assert_eq!(alert.severity, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_identities_counted_separately() {
        let monitor = monitor();
        let now = Utc::now();

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let e = SecurityEvent::new(SecurityEventType::CsrfTokenMismatch, RiskLevel::Medium)
                .with_ip(ip)
                .at(now);
            assert!(monitor.log_event(e).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_configured_threshold_override() {
        let mut config = MonitorConfig::default();
        config.thresholds.insert(
            SecurityEventType::ValidationFailure,
            ThresholdSettings { threshold: 2, window_secs: 60 },
        );
        let monitor = SecurityMonitor::new(config);
        let now = Utc::now();

        assert!(monitor
            .log_event(event(SecurityEventType::ValidationFailure, RiskLevel::Low, now))
            .await
            .is_none());
        assert!(monitor
            .log_event(event(SecurityEventType::ValidationFailure, RiskLevel::Low, now))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_resolve_alert() {
        let monitor = monitor();
        let alert = monitor
            .log_event(event(SecurityEventType::XssAttempt, RiskLevel::High, Utc::now()))
            .await
            .unwrap();

        let resolved = monitor.resolve_alert(alert.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(monitor.get_alerts(true).await.is_empty());
        assert_eq!(monitor.get_alerts(false).await.len(), 1);

        let missing = Uuid::new_v4();
        assert_eq!(
            monitor.resolve_alert(missing).await,
            Err(MonitorError::AlertNotFound { alert_id: missing })
        );
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let monitor = SecurityMonitor::new(MonitorConfig {
            max_events: 3,
            ..Default::default()
        });
        let now = Utc::now();

        for i in 0..5 {
            let e = event(SecurityEventType::TokenExpired, RiskLevel::Low, now)
                .with_detail("n", i);
            monitor.log_event(e).await;
        }

        let events = monitor.get_events(&EventFilter::default()).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].details["n"], 2);
    }

    #[tokio::test]
    async fn test_audit_log_and_filter() {
        let monitor = monitor();
        monitor
            .log_audit("request", "/api/docs", AuditOutcome::Success, Details::new())
            .await;
        monitor
            .log_audit("request", "/api/docs", AuditOutcome::Blocked, Details::new())
            .await;

        let blocked = monitor
            .get_audit_logs(&AuditFilter {
                outcome: Some(AuditOutcome::Blocked),
                ..Default::default()
            })
            .await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(monitor.get_stats().await.total_audit_entries, 2);
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let monitor = SecurityMonitor::new(MonitorConfig {
            retention_secs: 3600,
            ..Default::default()
        });
        let now = Utc::now();

        monitor
            .log_event(event(
                SecurityEventType::TokenExpired,
                RiskLevel::Low,
                now - ChronoDuration::hours(2),
            ))
            .await;
        monitor
            .log_event(event(SecurityEventType::InvalidToken, RiskLevel::Low, now))
            .await;
        monitor
            .log_audit_entry(
                AuditLogEntry::new("request", "/old", AuditOutcome::Success)
                    .with_detail("age", "old"),
            )
            .await;

        let report = monitor.cleanup_expired_at(now + ChronoDuration::minutes(30)).await;
        assert_eq!(report.events, 1);
        assert_eq!(report.audit_entries, 0);

        let remaining = monitor.get_events(&EventFilter::default()).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_type, SecurityEventType::InvalidToken);
    }

    #[tokio::test]
    async fn test_stats_breakdown() {
        let monitor = monitor();
        let now = Utc::now();
        monitor
            .log_event(event(SecurityEventType::XssAttempt, RiskLevel::High, now))
            .await;
        monitor
            .log_event(event(SecurityEventType::TokenExpired, RiskLevel::Low, now))
            .await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.unresolved_alerts, 1);
        assert_eq!(stats.events_by_type[&SecurityEventType::XssAttempt], 1);
        assert_eq!(stats.events_by_risk[&RiskLevel::Low], 1);
        assert_eq!(stats.alerts_by_severity[&RiskLevel::High], 1);
    }
}
