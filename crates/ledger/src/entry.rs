use std::fmt;

use kyc_core::{EventType, Severity};
use kyc_storage::AuditEntryRecord;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// The subject an audit chain is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChainSubject {
    /// One KYC workflow instance.
    Workflow(String),
    /// A minted BFR credential, spanning later signature events.
    Credential(String),
}

impl ChainSubject {
    pub fn parse(s: &str) -> Option<ChainSubject> {
        let (kind, id) = s.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match kind {
            "workflow" => Some(ChainSubject::Workflow(id.to_string())),
            "credential" => Some(ChainSubject::Credential(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for ChainSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainSubject::Workflow(id) => write!(f, "workflow:{}", id),
            ChainSubject::Credential(id) => write!(f, "credential:{}", id),
        }
    }
}

/// An immutable, hashed ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub chain_id: String,
    pub subject: ChainSubject,
    pub sequence: u64,
    pub event_type: EventType,
    pub severity: Severity,
    pub user_id: String,
    /// RFC 3339 timestamp string.
    pub timestamp: String,
    pub event_data: serde_json::Value,
    pub hash: String,
    pub previous_hash: String,
}

impl AuditEntry {
    pub fn to_record(&self) -> AuditEntryRecord {
        AuditEntryRecord {
            id: self.id.clone(),
            chain_id: self.chain_id.clone(),
            subject: self.subject.to_string(),
            sequence: self.sequence,
            event_type: self.event_type.as_str().to_string(),
            severity: self.severity.as_str().to_string(),
            user_id: self.user_id.clone(),
            timestamp: self.timestamp.clone(),
            event_data: self.event_data.clone(),
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
        }
    }

    pub fn from_record(record: AuditEntryRecord) -> Result<AuditEntry, LedgerError> {
        let malformed = |reason: String| LedgerError::Malformed {
            entry_id: record.id.clone(),
            reason,
        };
        let subject = ChainSubject::parse(&record.subject)
            .ok_or_else(|| malformed(format!("unknown subject '{}'", record.subject)))?;
        let event_type = EventType::parse(&record.event_type)
            .ok_or_else(|| malformed(format!("unknown event type '{}'", record.event_type)))?;
        let severity = Severity::parse(&record.severity)
            .ok_or_else(|| malformed(format!("unknown severity '{}'", record.severity)))?;

        Ok(AuditEntry {
            id: record.id,
            chain_id: record.chain_id,
            subject,
            sequence: record.sequence,
            event_type,
            severity,
            user_id: record.user_id,
            timestamp: record.timestamp,
            event_data: record.event_data,
            hash: record.hash,
            previous_hash: record.previous_hash,
        })
    }
}

/// What a caller supplies to append; the ledger fills in id, sequence,
/// timestamp and hashes.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub chain_id: String,
    pub subject: ChainSubject,
    pub user_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub event_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips() {
        for s in [
            ChainSubject::Workflow("w-1".into()),
            ChainSubject::Credential("BFR-NA-2026-0a1b2c3d4e5f".into()),
        ] {
            assert_eq!(ChainSubject::parse(&s.to_string()), Some(s));
        }
        assert_eq!(ChainSubject::parse("workflow:"), None);
        assert_eq!(ChainSubject::parse("session:x"), None);
    }

    #[test]
    fn record_conversion_rejects_unknown_event_type() {
        let record = AuditEntryRecord {
            id: "e1".into(),
            chain_id: "c1".into(),
            subject: "workflow:w1".into(),
            sequence: 0,
            event_type: "Teleported".into(),
            severity: "Info".into(),
            user_id: "u1".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            event_data: serde_json::json!({}),
            hash: String::new(),
            previous_hash: String::new(),
        };
        let err = AuditEntry::from_record(record).unwrap_err();
        assert!(err.to_string().contains("Teleported"));
    }
}
