//! # Flock Store
//!
//! The backing-store port every Flock operation runs against.
//!
//! ```text
//!               ┌──────────────────────────┐
//!               │   DocumentStore (trait)  │
//!               │  get / query_ordered /   │
//!               │  query_by / insert /     │
//!               │  delete / commit         │
//!               └────────────┬─────────────┘
//!                ┌───────────┴───────────┐
//!         ┌──────┴──────┐         ┌──────┴──────┐
//!         │ MemoryStore │         │ MongoStore  │
//!         └─────────────┘         └─────────────┘
//! ```
//!
//! Concurrency control is optimistic: every document carries a version,
//! a [`Transaction`] records the versions it read and buffers its writes,
//! and [`DocumentStore::commit`] applies the writes only if none of those
//! versions moved. [`run_transaction`] re-runs the body on conflict.

pub mod document;
pub mod memory;
pub mod mongo;
pub mod query;
pub mod transaction;

pub use document::{CollectionName, Document};
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use query::{FieldFilter, OrderedQuery, QueryPage, SortKey, ORDER_FIELD};
pub use transaction::{run_transaction, FieldWrite, RetryPolicy, Transaction, TransactionRecord};

use async_trait::async_trait;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a backing store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Transaction gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for flock_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => flock_core::Error::NotFound(path),
            StoreError::Conflict(_) => flock_core::Error::TransactionConflict { attempts: 1 },
            StoreError::Exhausted { attempts } => {
                flock_core::Error::TransactionConflict { attempts }
            }
            StoreError::Backend(msg) => flock_core::Error::Store(msg),
            StoreError::Serialization(e) => flock_core::Error::Serialization(e),
        }
    }
}

/// Async document store with ordered range queries and versioned commits
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document, `NotFound` when missing
    async fn get(&self, collection: CollectionName, id: &str) -> Result<Document>;

    /// Up to `query.limit` documents matching the filter, ordered by
    /// `(date, id)` descending, strictly after `after` when given
    async fn query_ordered(&self, query: &OrderedQuery, after: Option<&SortKey>) -> Result<QueryPage>;

    /// All matching documents ordered ascending by `order_by`
    async fn query_by(
        &self,
        collection: CollectionName,
        filter: &FieldFilter,
        order_by: &str,
    ) -> Result<Vec<Document>>;

    /// Create a document, or overwrite the given fields of an existing one
    async fn insert(&self, collection: CollectionName, document: Document) -> Result<()>;

    /// Remove a document; removing a missing document is not an error
    async fn delete(&self, collection: CollectionName, id: &str) -> Result<()>;

    /// Apply a transaction's writes atomically, or fail with `Conflict`
    /// if any document it read has changed since
    async fn commit(&self, record: TransactionRecord) -> Result<()>;
}
