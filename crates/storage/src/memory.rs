//! In-memory backend for tests, the CLI, and single-process deployments.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{AuditEntryRecord, WorkflowRecord};
use crate::traits::{AuditStore, WorkflowStore};

/// Audit chains keyed by chain id; `BTreeMap` keeps `list_chains` ordered.
type Chains = BTreeMap<String, Vec<AuditEntryRecord>>;

/// Implements both [`AuditStore`] and [`WorkflowStore`] behind async locks.
#[derive(Default)]
pub struct MemoryStore {
    chains: RwLock<Chains>,
    workflows: RwLock<HashMap<String, WorkflowRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_entry(
        &self,
        record: AuditEntryRecord,
        expected_previous_hash: &str,
        genesis: &str,
    ) -> Result<(), StorageError> {
        let mut chains = self.chains.write().await;
        let chain = chains.entry(record.chain_id.clone()).or_default();

        let actual_head = chain
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(genesis);
        if actual_head != expected_previous_hash {
            return Err(StorageError::ChainConflict {
                chain_id: record.chain_id.clone(),
                expected_previous_hash: expected_previous_hash.to_string(),
                actual_head: actual_head.to_string(),
            });
        }

        chain.push(record);
        Ok(())
    }

    async fn list_entries(&self, chain_id: &str) -> Result<Vec<AuditEntryRecord>, StorageError> {
        let chains = self.chains.read().await;
        Ok(chains.get(chain_id).cloned().unwrap_or_default())
    }

    async fn head(&self, chain_id: &str) -> Result<Option<AuditEntryRecord>, StorageError> {
        let chains = self.chains.read().await;
        Ok(chains.get(chain_id).and_then(|c| c.last().cloned()))
    }

    async fn list_chains(&self) -> Result<Vec<String>, StorageError> {
        let chains = self.chains.read().await;
        Ok(chains.keys().cloned().collect())
    }

    async fn delete_chain(&self, chain_id: &str) -> Result<(), StorageError> {
        let mut chains = self.chains.write().await;
        chains
            .remove(chain_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::ChainNotFound {
                chain_id: chain_id.to_string(),
            })
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, record: WorkflowRecord) -> Result<(), StorageError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(record.workflow_id.clone(), record);
        Ok(())
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, StorageError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StorageError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    async fn list_workflows(
        &self,
        state_filter: Option<&str>,
    ) -> Result<Vec<WorkflowRecord>, StorageError> {
        let workflows = self.workflows.read().await;
        let mut out: Vec<WorkflowRecord> = workflows
            .values()
            .filter(|w| state_filter.map_or(true, |s| w.state == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        Ok(out)
    }
}
