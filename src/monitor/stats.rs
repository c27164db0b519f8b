//! Query filters and aggregate statistics for the monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::{AuditLogEntry, AuditOutcome, RiskLevel, SecurityEvent, SecurityEventType};

/// Filter for event queries; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<SecurityEventType>,
    /// Minimum risk level
    pub min_risk: Option<RiskLevel>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self.min_risk.map_or(true, |r| event.risk_level >= r)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| event.user_id.as_deref() == Some(u))
            && self.ip.as_deref().map_or(true, |ip| event.ip.as_deref() == Some(ip))
            && self.since.map_or(true, |since| event.timestamp >= since)
            && self.until.map_or(true, |until| event.timestamp <= until)
    }
}

/// Filter for audit queries; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub resource: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.action.as_deref().map_or(true, |a| entry.action == a)
            && self.resource.as_deref().map_or(true, |r| entry.resource == r)
            && self.outcome.map_or(true, |o| entry.outcome == o)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| entry.user_id.as_deref() == Some(u))
            && self.since.map_or(true, |since| entry.timestamp >= since)
            && self.until.map_or(true, |until| entry.timestamp <= until)
    }
}

/// Keep the last `limit` items of an oldest-first list
pub(crate) fn take_latest<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        if items.len() > limit {
            items.drain(..items.len() - limit);
        }
    }
    items
}

/// Monitor statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub total_events: usize,
    pub total_alerts: usize,
    pub unresolved_alerts: usize,
    pub total_audit_entries: usize,
    pub events_by_type: BTreeMap<SecurityEventType, usize>,
    pub events_by_risk: BTreeMap<RiskLevel, usize>,
    pub alerts_by_type: BTreeMap<SecurityEventType, usize>,
    pub alerts_by_severity: BTreeMap<RiskLevel, usize>,
}

/// Items removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub events: usize,
    pub audit_entries: usize,
    pub alerts: usize,
    pub counters: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.events + self.audit_entries + self.alerts + self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_event_filter() {
        let now = Utc::now();
        let event = SecurityEvent::new(SecurityEventType::XssAttempt, RiskLevel::High)
            .with_ip("10.0.0.1")
            .at(now);

        assert!(EventFilter::default().matches(&event));
        assert!(EventFilter {
            min_risk: Some(RiskLevel::Medium),
            ip: Some("10.0.0.1".into()),
            ..Default::default()
        }
        .matches(&event));
        assert!(!EventFilter {
            min_risk: Some(RiskLevel::Critical),
            ..Default::default()
        }
        .matches(&event));
        assert!(!EventFilter {
            since: Some(now + Duration::seconds(1)),
            ..Default::default()
        }
        .matches(&event));
    }

    #[test]
    fn test_take_latest_keeps_tail() {
        assert_eq!(take_latest(vec![1, 2, 3, 4], Some(2)), vec![3, 4]);
        assert_eq!(take_latest(vec![1, 2], Some(5)), vec![1, 2]);
        assert_eq!(take_latest(vec![1, 2], None), vec![1, 2]);
    }
}
