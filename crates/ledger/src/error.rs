use std::fmt;

use kyc_storage::StorageError;

/// How a chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The recomputed hash differs from the stored hash.
    HashMismatch,
    /// `previous_hash` is not the preceding entry's stored hash (or genesis).
    BrokenLink,
    /// Sequence numbers are not `0, 1, 2, ...` in stored order.
    SequenceGap,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::HashMismatch => write!(f, "hash mismatch"),
            ViolationKind::BrokenLink => write!(f, "broken previous-hash link"),
            ViolationKind::SequenceGap => write!(f, "sequence out of order"),
        }
    }
}

/// Errors returned by the audit ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The chain does not verify. Every entry from `index` on has lost its
    /// evidentiary value.
    #[error("integrity violation in chain {chain_id} at entry {index} ({entry_id}): {kind}")]
    IntegrityViolation {
        chain_id: String,
        index: usize,
        entry_id: String,
        kind: ViolationKind,
    },

    /// A stored record could not be read back into a typed entry.
    #[error("malformed audit entry {entry_id}: {reason}")]
    Malformed { entry_id: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, LedgerError::IntegrityViolation { .. })
    }
}
