/// All errors that can be returned by an `AuditStore` or `WorkflowStore`
/// implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic head check failed: another writer appended to the chain
    /// since the caller read its head. The expected previous hash was not the
    /// chain's current head.
    #[error(
        "concurrent append on chain {chain_id}: expected head {expected_previous_hash}, found {actual_head}"
    )]
    ChainConflict {
        chain_id: String,
        expected_previous_hash: String,
        actual_head: String,
    },

    /// No entries exist for the given chain.
    #[error("audit chain not found: {chain_id}")]
    ChainNotFound { chain_id: String },

    /// No record with the given workflow id.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
