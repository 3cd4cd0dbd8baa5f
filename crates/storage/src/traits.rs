use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditEntryRecord, WorkflowRecord};

/// Append-only storage for audit chains.
///
/// ## Append Semantics
///
/// Entries are never updated in place. `append_entry` carries the hash the
/// caller believes is the chain's current head (the genesis value for an
/// empty chain). If the stored head differs, the append is refused with
/// `StorageError::ChainConflict` and nothing is written.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one store can be
/// shared by every in-flight workflow.
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    /// Append one entry to the end of its chain.
    ///
    /// `genesis` is the head value of an empty chain.
    async fn append_entry(
        &self,
        record: AuditEntryRecord,
        expected_previous_hash: &str,
        genesis: &str,
    ) -> Result<(), StorageError>;

    /// All entries of a chain in append order. Empty when the chain is unknown.
    async fn list_entries(&self, chain_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError>;

    /// The last entry of a chain, if any.
    async fn head(&self, chain_id: &str) -> Result<Option<AuditEntryRecord>, StorageError>;

    /// Ids of every chain in the store.
    async fn list_chains(&self) -> Result<Vec<String>, StorageError>;

    /// Remove a whole chain. Used by retention only.
    ///
    /// Returns `Err(StorageError::ChainNotFound)` if the chain does not exist.
    async fn delete_chain(&self, chain_id: &str) -> Result<(), StorageError>;
}

/// Storage for serialized workflow aggregates, keyed by workflow id.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Insert or replace a workflow record.
    async fn save_workflow(&self, record: WorkflowRecord) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::WorkflowNotFound)` if not found.
    async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, StorageError>;

    /// List workflows, optionally filtered by state name.
    async fn list_workflows(
        &self,
        state_filter: Option<&str>,
    ) -> Result<Vec<WorkflowRecord>, StorageError>;
}
