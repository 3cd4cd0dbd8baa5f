use serde::{Deserialize, Serialize};

/// One audit ledger entry as persisted by the backend.
///
/// Every field that feeds the entry hash is stored verbatim so that a
/// verifier can recompute it without the typed ledger model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryRecord {
    pub id: String,
    pub chain_id: String,
    /// Owning subject, e.g. `workflow:<id>` or `credential:<id>`.
    pub subject: String,
    /// Zero-based position in the chain.
    pub sequence: u64,
    pub event_type: String,
    pub severity: String,
    pub user_id: String,
    /// RFC 3339 timestamp string.
    pub timestamp: String,
    pub event_data: serde_json::Value,
    pub hash: String,
    pub previous_hash: String,
}

/// A serialized workflow aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub user_id: String,
    pub document_id: String,
    /// Current state name, e.g. `"fields_extracted"`.
    pub state: String,
    /// RFC 3339 timestamp string.
    pub updated_at: String,
    /// The full aggregate; its shape belongs to the engine.
    pub data: serde_json::Value,
}
