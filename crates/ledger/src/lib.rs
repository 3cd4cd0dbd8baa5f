//! kyc-ledger: tamper-evident audit chains.
//!
//! Each chain is a singly linked list of SHA-256 hashes over canonical
//! entry bytes. [`AuditLedger`] appends and verifies chains held in any
//! [`kyc_storage::AuditStore`]; [`verify_records`] checks an exported chain
//! without a store.

mod entry;
mod error;
mod hash;
mod ledger;
mod verify;

pub use entry::{AuditEntry, ChainSubject, NewEntry};
pub use error::{LedgerError, ViolationKind};
pub use hash::{batch_roots, canonical_json, entry_hash, merkle_root, GENESIS_HASH};
pub use ledger::{AuditLedger, RetentionPolicy, DEFAULT_MERKLE_BATCH_SIZE};
pub use verify::verify_records;
