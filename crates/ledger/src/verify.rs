//! Chain verification over stored records.

use kyc_storage::AuditEntryRecord;

use crate::error::{LedgerError, ViolationKind};
use crate::hash::{entry_hash, GENESIS_HASH};

/// Verify a chain given in stored order.
///
/// For each entry, in order: its sequence must equal its position, its
/// `previous_hash` must equal the preceding entry's stored hash (genesis for
/// the first), and its hash recomputed from its fields and recorded
/// `previous_hash` must equal its stored hash. The first failing entry is
/// reported. An empty chain verifies.
pub fn verify_records(chain_id: &str, records: &[AuditEntryRecord]) -> Result<(), LedgerError> {
    let mut expected_previous = GENESIS_HASH;
    for (index, record) in records.iter().enumerate() {
        let violation = |kind| LedgerError::IntegrityViolation {
            chain_id: chain_id.to_string(),
            index,
            entry_id: record.id.clone(),
            kind,
        };

        if record.sequence != index as u64 {
            return Err(violation(ViolationKind::SequenceGap));
        }
        if record.previous_hash != expected_previous {
            return Err(violation(ViolationKind::BrokenLink));
        }
        if entry_hash(record) != record.hash {
            return Err(violation(ViolationKind::HashMismatch));
        }
        expected_previous = &record.hash;
    }
    Ok(())
}
