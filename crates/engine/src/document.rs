//! Access to uploaded document bytes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::EngineError;

/// Supplies document bytes by id. Implemented by the upload/storage layer.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, document_id: &str) -> Result<Vec<u8>, EngineError>;
}

/// In-memory document source for tests and the CLI.
#[derive(Default)]
pub struct MemoryDocuments {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, document_id: impl Into<String>, bytes: Vec<u8>) {
        self.documents.write().await.insert(document_id.into(), bytes);
    }
}

#[async_trait]
impl DocumentSource for MemoryDocuments {
    async fn fetch(&self, document_id: &str) -> Result<Vec<u8>, EngineError> {
        self.documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| EngineError::Document {
                document_id: document_id.to_string(),
                message: "no such document".to_string(),
            })
    }
}
