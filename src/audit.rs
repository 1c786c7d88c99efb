//! Append-only audit trail for job lifecycle milestones.
//!
//! Emission goes through the `AuditSink` trait so pipeline code can be
//! exercised without a store. Writes are best-effort: a failed write is
//! logged and never propagated to the caller.

use rusqlite::params;

use crate::db::{now_timestamp, DatabaseError, SqliteStore};

pub const ANALYSIS_STARTED: &str = "ANALYSIS_STARTED";
pub const ANALYSIS_COMPLETED: &str = "ANALYSIS_COMPLETED";

pub const RESULT_SUCCESS: &str = "success";
/// Completed, but some chunks failed or lost judge calls.
pub const RESULT_DEGRADED: &str = "degraded";

/// Actor recorded for every event emitted by the worker.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub event_type: String,
    pub actor: String,
    pub occurred_at: String,
    pub target_type: String,
    pub target_id: String,
    pub target_label: Option<String>,
    pub result_status: String,
}

impl AuditEvent {
    pub fn system(
        event_type: &str,
        target_type: &str,
        target_id: &str,
        target_label: Option<&str>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            occurred_at: now_timestamp(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            target_label: target_label.map(str::to_string),
            result_status: RESULT_SUCCESS.to_string(),
        }
    }

    pub fn with_status(mut self, result_status: &str) -> Self {
        self.result_status = result_status.to_string();
        self
    }
}

pub trait AuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), DatabaseError>;
}

/// Emit one event, logging (not returning) any failure.
pub fn log(
    sink: &dyn AuditSink,
    event_type: &str,
    target_type: &str,
    target_id: &str,
    target_label: Option<&str>,
    result_status: &str,
) {
    let event = AuditEvent::system(event_type, target_type, target_id, target_label)
        .with_status(result_status);
    if let Err(e) = sink.emit(&event) {
        tracing::warn!(
            event_type,
            target_id,
            error = %e,
            "Audit write failed"
        );
    }
}

impl AuditSink for SqliteStore {
    fn emit(&self, event: &AuditEvent) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO audit_events
             (event_type, actor, occurred_at, target_type, target_id, target_label, result_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_type,
                event.actor,
                event.occurred_at,
                event.target_type,
                event.target_id,
                event.target_label,
                event.result_status,
            ],
        )?;
        Ok(())
    }
}

/// In-memory sink that records events (for testing).
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub events: std::cell::RefCell<Vec<AuditEvent>>,
    pub fail: bool,
}

#[cfg(test)]
impl AuditSink for RecordingSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), DatabaseError> {
        if self.fail {
            return Err(DatabaseError::NotFound {
                entity_type: "audit_events".into(),
                id: event.target_id.clone(),
            });
        }
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_sink_appends_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        log(&store, ANALYSIS_STARTED, "analysis_job", "job-1", Some("v1"), RESULT_SUCCESS);

        let (actor, status, label): (String, String, Option<String>) = store
            .conn()
            .query_row(
                "SELECT actor, result_status, target_label FROM audit_events WHERE target_id = 'job-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(actor, SYSTEM_ACTOR);
        assert_eq!(status, "success");
        assert_eq!(label.as_deref(), Some("v1"));
    }

    #[test]
    fn failing_sink_does_not_propagate() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        log(&sink, ANALYSIS_COMPLETED, "analysis_job", "job-2", None, RESULT_SUCCESS);
        assert!(sink.events.borrow().is_empty());
    }

    #[test]
    fn log_records_result_status() {
        let sink = RecordingSink::default();
        log(&sink, ANALYSIS_COMPLETED, "analysis_job", "j", None, RESULT_DEGRADED);
        let events = sink.events.borrow();
        assert_eq!(events[0].result_status, RESULT_DEGRADED);
        assert_eq!(events[0].actor, SYSTEM_ACTOR);
    }
}
