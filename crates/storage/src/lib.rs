mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{AuditEntryRecord, WorkflowRecord};
pub use traits::{AuditStore, WorkflowStore};
