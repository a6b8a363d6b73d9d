//! AuditRecord: one entry in the append-only audit log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of an audited message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Written before processing begins.
    Pending,
    /// Processing completed; `response` carries the reply, if any.
    Success,
    /// Processing failed; `error` carries the detail.
    Error,
}

/// A single audit record.
///
/// The same `audit_id` appears on the pending record and on the terminal
/// record that supersedes it, so the two can be correlated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub chat_id: String,
    pub raw_message: String,
    /// Summary of the parsed command(s), when parsing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Create a pending record for a freshly received message.
    pub fn pending(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        raw_message: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            raw_message: raw_message.into(),
            parsed: None,
            status: AuditStatus::Pending,
            response: None,
            error: None,
        }
    }

    /// Attach the parsed-command summary.
    pub fn with_parsed(mut self, parsed: serde_json::Value) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// Terminal success record (same audit id, fresh timestamp).
    pub fn succeeded(mut self, response: Option<String>) -> Self {
        self.timestamp = Utc::now();
        self.status = AuditStatus::Success;
        self.response = response;
        self
    }

    /// Terminal error record (same audit id, fresh timestamp).
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.timestamp = Utc::now();
        self.status = AuditStatus::Error;
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_record_has_no_outcome() {
        let record = AuditRecord::pending("u1", "g1@g.us", ".ping");
        assert_eq!(record.status, AuditStatus::Pending);
        assert!(record.response.is_none());
        assert!(record.error.is_none());
        assert!(record.parsed.is_none());
    }

    #[test]
    fn terminal_records_keep_the_audit_id() {
        let pending = AuditRecord::pending("u1", "g1@g.us", ".ping");
        let id = pending.audit_id;

        let success = pending.clone().succeeded(Some("Pong".into()));
        assert_eq!(success.audit_id, id);
        assert_eq!(success.status, AuditStatus::Success);
        assert_eq!(success.response.as_deref(), Some("Pong"));

        let failure = pending.failed("boom");
        assert_eq!(failure.audit_id, id);
        assert_eq!(failure.status, AuditStatus::Error);
        assert_eq!(failure.error.as_deref(), Some("boom"));
    }

    #[test]
    fn serialization_skips_absent_fields() {
        let record = AuditRecord::pending("u1", "g1@g.us", ".ping");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("response"));
        assert!(!json.contains("error"));
        assert!(!json.contains("parsed"));
    }

    #[test]
    fn parsed_summary_roundtrips() {
        let record = AuditRecord::pending("u1", "g1@g.us", ".exp add 1")
            .with_parsed(serde_json::json!([{"scope": "exp", "command": "add"}]))
            .succeeded(None);
        let json = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.parsed, record.parsed);
        assert_eq!(back.status, AuditStatus::Success);
    }
}
