use kyc_core::{InvalidTransition, WorkflowState};
use kyc_ledger::LedgerError;
use kyc_storage::StorageError;

/// A single provider or agent call failed. Recovered by the owning chain,
/// which moves on to its next entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Network, auth or upstream API failure.
    #[error("provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// The provider answered but the answer could not be used.
    #[error("provider '{provider}' returned malformed output: {message}")]
    Malformed { provider: String, message: String },

    #[error("provider '{provider}' timed out after {after_ms} ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("provider '{provider}' rate limited; retry after {retry_after_ms} ms")]
    RateLimited { provider: String, retry_after_ms: u64 },

    #[error("provider '{provider}' call cancelled")]
    Cancelled { provider: String },
}

/// Errors returned by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Every provider in a chain failed outright.
    #[error("extraction chain '{chain}' exhausted after {attempts} failed attempt(s)")]
    ExhaustedChain { chain: String, attempts: usize },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("workflow {workflow_id} cancelled")]
    Cancelled { workflow_id: String },

    #[error("workflow {workflow_id} exceeded its deadline")]
    DeadlineExceeded { workflow_id: String },

    #[error("workflow not found: {workflow_id}")]
    NotFound { workflow_id: String },

    #[error("document {document_id} unavailable: {message}")]
    Document { document_id: String, message: String },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Stable class name recorded on failed workflows.
    pub fn class(&self) -> &'static str {
        match self {
            EngineError::ExhaustedChain { .. } => "ExhaustedChain",
            EngineError::InvalidTransition(_) => "InvalidTransition",
            EngineError::Cancelled { .. } => "Cancelled",
            EngineError::DeadlineExceeded { .. } => "DeadlineExceeded",
            EngineError::NotFound { .. } => "NotFound",
            EngineError::Document { .. } => "DocumentUnavailable",
            EngineError::Credential(_) => "Credential",
            EngineError::Storage(_) => "Storage",
            EngineError::Ledger(e) if e.is_integrity_violation() => "IntegrityViolation",
            EngineError::Ledger(_) => "Ledger",
        }
    }
}

/// Why a credential could not be minted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CredentialError {
    #[error("workflow {workflow_id} is in state '{state}', not completed")]
    NotCompleted {
        workflow_id: String,
        state: WorkflowState,
    },

    #[error("workflow {workflow_id} was not approved")]
    NotApproved { workflow_id: String },

    #[error("workflow {workflow_id} has no {field}")]
    MissingField {
        workflow_id: String,
        field: &'static str,
    },
}

/// Failure loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
