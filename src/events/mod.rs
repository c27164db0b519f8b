//! Security event, alert, audit, and request models shared by every component

pub mod models;

pub use models::{
    AuditLogEntry, AuditOutcome, Details, RiskLevel, SecurityAlert, SecurityEvent,
    SecurityEventType, SecurityRequest,
};
