use std::collections::HashMap;
use std::sync::Arc;

use kyc_storage::AuditStore;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::entry::{AuditEntry, NewEntry};
use crate::error::LedgerError;
use crate::hash::{batch_roots, entry_hash, GENESIS_HASH};
use crate::verify::verify_records;

/// Entries per Merkle batch when not configured.
pub const DEFAULT_MERKLE_BATCH_SIZE: usize = 16;

/// How long chains are kept. `None` keeps them forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub days: Option<u32>,
}

/// Append-only, hash-chained audit ledger over an [`AuditStore`].
///
/// Appends to the same chain are serialized by a per-chain lock; appends to
/// different chains proceed concurrently. Entries are never edited. The only
/// removal is whole-chain deletion by [`AuditLedger::prune_expired`].
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    chain_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    merkle_batch_size: usize,
    retention: RetentionPolicy,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        AuditLedger {
            store,
            chain_locks: Mutex::new(HashMap::new()),
            merkle_batch_size: DEFAULT_MERKLE_BATCH_SIZE,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_merkle_batch_size(mut self, size: usize) -> Self {
        self.merkle_batch_size = size;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    async fn chain_lock(&self, chain_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.chain_locks.lock().await;
        locks
            .entry(chain_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Give back a lock taken with `chain_lock`. The map entry is dropped
    /// once no other caller holds or waits on it.
    async fn release_chain_lock(&self, chain_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.chain_locks.lock().await;
        if locks.get(chain_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(chain_id);
        }
    }

    #[cfg(test)]
    async fn locked_chains(&self) -> usize {
        self.chain_locks.lock().await.len()
    }

    /// Append one entry to the end of its chain and return it.
    pub async fn append(&self, new: NewEntry) -> Result<AuditEntry, LedgerError> {
        let chain_id = new.chain_id.clone();
        let lock = self.chain_lock(&chain_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(new).await
        };
        self.release_chain_lock(&chain_id, lock).await;
        result
    }

    async fn append_locked(&self, new: NewEntry) -> Result<AuditEntry, LedgerError> {
        let head = self.store.head(&new.chain_id).await?;
        let (sequence, previous_hash) = match head {
            Some(h) => (h.sequence + 1, h.hash),
            None => (0, GENESIS_HASH.to_string()),
        };

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| LedgerError::Malformed {
                entry_id: String::new(),
                reason: format!("timestamp formatting failed: {}", e),
            })?;

        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: new.chain_id,
            subject: new.subject,
            sequence,
            event_type: new.event_type,
            severity: new.severity,
            user_id: new.user_id,
            timestamp,
            event_data: new.event_data,
            hash: String::new(),
            previous_hash,
        };
        let mut record = entry.to_record();
        record.hash = entry_hash(&record);
        entry.hash = record.hash.clone();

        self.store
            .append_entry(record, &entry.previous_hash, GENESIS_HASH)
            .await?;

        tracing::debug!(
            chain_id = %entry.chain_id,
            sequence = entry.sequence,
            event_type = %entry.event_type,
            "audit entry appended"
        );
        Ok(entry)
    }

    /// All entries of a chain in append order.
    pub async fn entries(&self, chain_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        self.store
            .list_entries(chain_id)
            .await?
            .into_iter()
            .map(AuditEntry::from_record)
            .collect()
    }

    /// Verify a stored chain, reporting the first failing entry.
    pub async fn verify_chain(&self, chain_id: &str) -> Result<(), LedgerError> {
        let records = self.store.list_entries(chain_id).await?;
        let result = verify_records(chain_id, &records);
        if let Err(e) = &result {
            tracing::error!(chain_id, error = %e, "audit chain failed verification");
        }
        result
    }

    /// `true` when the chain verifies, `false` on an integrity violation.
    /// Storage failures are still errors: an unreadable chain is not a
    /// verified one.
    pub async fn verify_integrity(&self, chain_id: &str) -> Result<bool, LedgerError> {
        match self.verify_chain(chain_id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_integrity_violation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Merkle roots of the chain's consecutive batches, recomputed from the
    /// stored hashes on every call.
    pub async fn merkle_roots(&self, chain_id: &str) -> Result<Vec<String>, LedgerError> {
        let records = self.store.list_entries(chain_id).await?;
        let hashes: Vec<&str> = records.iter().map(|r| r.hash.as_str()).collect();
        Ok(batch_roots(&hashes, self.merkle_batch_size))
    }

    /// Root of batch `batch` (zero-based), if the chain has that many entries.
    pub async fn merkle_root(
        &self,
        chain_id: &str,
        batch: usize,
    ) -> Result<Option<String>, LedgerError> {
        Ok(self.merkle_roots(chain_id).await?.into_iter().nth(batch))
    }

    /// Delete whole chains whose first entry is older than the retention
    /// window at `now`. Returns the deleted chain ids.
    pub async fn prune_expired(&self, now: OffsetDateTime) -> Result<Vec<String>, LedgerError> {
        let Some(days) = self.retention.days else {
            return Ok(Vec::new());
        };
        let cutoff = now - Duration::days(i64::from(days));

        let mut pruned = Vec::new();
        for chain_id in self.store.list_chains().await? {
            let first = self.store.list_entries(&chain_id).await?.into_iter().next();
            let Some(first) = first else { continue };
            let started = match OffsetDateTime::parse(&first.timestamp, &Rfc3339) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(chain_id = %chain_id, error = %e, "unparsable timestamp; chain kept");
                    continue;
                }
            };
            if started < cutoff {
                let lock = self.chain_lock(&chain_id).await;
                let deleted = {
                    let _guard = lock.lock().await;
                    self.store.delete_chain(&chain_id).await
                };
                self.release_chain_lock(&chain_id, lock).await;
                deleted?;
                pruned.push(chain_id);
            }
        }

        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "expired audit chains pruned");
        }
        Ok(pruned)
    }
}
