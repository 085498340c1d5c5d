// ==============================================================================
// audit.rs - Audit Logging for Identity Changes
// ==============================================================================
// Description: Audit trail of reconciliation runs and of every sample and
//              pedigree change they make, stored in the sample database
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-06
// Version: 2.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Run lifecycle
    RunStarted,
    RunCompleted,
    RunFailed,

    // Identity changes
    SampleCreated,
    PedigreeUpdated,

    // Data quality
    RowSkipped,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::RunStarted => "run_started",
            AuditEventType::RunCompleted => "run_completed",
            AuditEventType::RunFailed => "run_failed",
            AuditEventType::SampleCreated => "sample_created",
            AuditEventType::PedigreeUpdated => "pedigree_updated",
            AuditEventType::RowSkipped => "row_skipped",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// Run the event belongs to
    pub run_id: Uuid,
    pub resource: Option<String>,
    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        run_id: Uuid,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        let severity = match event_type {
            AuditEventType::RowSkipped => LogSeverity::Warning,
            AuditEventType::RunFailed => LogSeverity::Error,
            _ => LogSeverity::Info,
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            run_id,
            resource,
            details,
            severity,
        }
    }

    pub fn log(&self, conn: &Connection) -> rusqlite::Result<()> {
        let mut details = self.details.clone();
        if let serde_json::Value::Object(map) = &mut details {
            map.insert("run_id".to_string(), serde_json::json!(self.run_id));
        }

        conn.execute(
            "INSERT INTO audit_log (id, timestamp, event_type, resource, details, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.id.to_string(),
                self.timestamp.to_rfc3339(),
                self.event_type.as_str(),
                self.resource,
                details.to_string(),
                self.severity.as_str(),
            ],
        )?;

        Ok(())
    }
}

/// Convenience function to log an audit event
pub fn log_event(
    conn: &Connection,
    event_type: AuditEventType,
    run_id: Uuid,
    resource: Option<String>,
    details: serde_json::Value,
) -> rusqlite::Result<()> {
    AuditEvent::new(event_type, run_id, resource, details).log(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::SampleStore;

    #[test]
    fn test_audit_event_creation() {
        let run_id = Uuid::new_v4();
        let event = AuditEvent::new(
            AuditEventType::SampleCreated,
            run_id,
            Some("UYOA-TEX-000000001".to_string()),
            serde_json::json!({ "original_id": "1" }),
        );

        assert_eq!(event.run_id, run_id);
        assert_eq!(event.resource, Some("UYOA-TEX-000000001".to_string()));
        assert!(matches!(event.severity, LogSeverity::Info));
    }

    #[test]
    fn test_skipped_row_severity() {
        let event = AuditEvent::new(
            AuditEventType::RowSkipped,
            Uuid::new_v4(),
            None,
            serde_json::json!({}),
        );

        assert!(matches!(event.severity, LogSeverity::Warning));
    }

    #[test]
    fn test_log_event_persists() {
        let store = SampleStore::open_in_memory().unwrap();
        let run_id = Uuid::new_v4();

        log_event(
            store.connection(),
            AuditEventType::RunStarted,
            run_id,
            Some("TEXEL_UY.zip".to_string()),
            serde_json::json!({ "source": "PLINK text" }),
        )
        .unwrap();

        let (event_type, details): (String, String) = store
            .connection()
            .query_row("SELECT event_type, details FROM audit_log", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();

        assert_eq!(event_type, "run_started");
        let details: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(details["run_id"], serde_json::json!(run_id));
        assert_eq!(details["source"], "PLINK text");
    }
}
