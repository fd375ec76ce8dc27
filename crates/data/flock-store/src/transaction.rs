//! Optimistic transactions
//!
//! A [`Transaction`] reads through the store, remembering the version of
//! every document it saw, and buffers its writes. Nothing is visible to
//! other callers until [`DocumentStore::commit`] accepts the whole record.

use crate::document::{CollectionName, Document};
use crate::{DocumentStore, Result, StoreError};
use rand::Rng;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A buffered single-field write
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub collection: CollectionName,
    pub id: String,
    pub field: String,
    pub value: Value,
}

/// Everything a store needs to validate and apply a transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionRecord {
    /// `(collection, id, version)` of every document read
    pub reads: Vec<(CollectionName, String, u64)>,
    pub writes: Vec<FieldWrite>,
}

impl TransactionRecord {
    /// Version observed for a document, if the transaction read it
    pub fn read_version(&self, collection: CollectionName, id: &str) -> Option<u64> {
        self.reads
            .iter()
            .find(|(c, i, _)| *c == collection && i == id)
            .map(|(_, _, v)| *v)
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Handle passed to a transaction body
pub struct Transaction {
    store: Arc<dyn DocumentStore>,
    record: TransactionRecord,
}

impl Transaction {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            record: TransactionRecord::default(),
        }
    }

    /// Read a document inside the transaction.
    ///
    /// All reads must happen before the first write.
    pub async fn get(&mut self, collection: CollectionName, id: &str) -> Result<Document> {
        if !self.record.writes.is_empty() {
            return Err(StoreError::Backend(
                "transaction reads must happen before writes".into(),
            ));
        }
        let doc = self.store.get(collection, id).await?;
        if self.record.read_version(collection, id).is_none() {
            self.record
                .reads
                .push((collection, id.to_string(), doc.version));
        }
        Ok(doc)
    }

    /// Buffer a field write, applied on commit
    pub fn update(
        &mut self,
        collection: CollectionName,
        id: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) {
        self.record.writes.push(FieldWrite {
            collection,
            id: id.into(),
            field: field.into(),
            value,
        });
    }

    pub fn into_record(self) -> TransactionRecord {
        self.record
    }
}

/// How often and how patiently to re-run a conflicting transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Linear backoff plus up to one `backoff` of random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(base * attempt as u64 + jitter)
    }
}

/// Run `body` inside a transaction, re-running it on commit conflicts.
///
/// The body receives a fresh [`Transaction`] on every attempt and hands it
/// back together with its result. Errors from the body abort immediately;
/// only `Conflict` is retried. Once `policy.max_attempts` is spent the
/// failure surfaces as [`StoreError::Exhausted`].
pub async fn run_transaction<T, F, Fut>(
    store: &Arc<dyn DocumentStore>,
    policy: &RetryPolicy,
    mut body: F,
) -> Result<T>
where
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = Result<(Transaction, T)>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (txn, value) = body(Transaction::new(Arc::clone(store))).await?;

        match store.commit(txn.into_record()).await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::debug!("Transaction committed on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(StoreError::Conflict(reason)) if attempt < policy.max_attempts => {
                tracing::debug!(
                    "Transaction conflict on attempt {}/{}: {}",
                    attempt,
                    policy.max_attempts,
                    reason
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(
                    "Transaction abandoned after {} attempts: {}",
                    attempt,
                    reason
                );
                return Err(StoreError::Exhausted { attempts: attempt });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    async fn seeded_store() -> Arc<dyn DocumentStore> {
        let store = MemoryStore::new();
        let doc = Document::encode("c1", &json!({ "count": 0 })).unwrap();
        store.insert(CollectionName::Posts, doc).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let store = seeded_store().await;
        let policy = RetryPolicy::default();

        let seen = run_transaction(&store, &policy, |mut txn| async move {
            let doc = txn.get(CollectionName::Posts, "c1").await?;
            let count = doc.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
            txn.update(CollectionName::Posts, "c1", "count", json!(count + 1));
            Ok::<_, StoreError>((txn, count))
        })
        .await
        .unwrap();

        assert_eq!(seen, 0);
        let doc = store.get(CollectionName::Posts, "c1").await.unwrap();
        assert_eq!(doc.field("count"), Some(&json!(1)));
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let store = seeded_store().await;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut attempts = 0;

        let result = run_transaction(&store, &policy, |mut txn| {
            attempts += 1;
            let interferer = Arc::clone(&store);
            let first = attempts == 1;
            async move {
                let doc = txn.get(CollectionName::Posts, "c1").await?;
                if first {
                    // Someone else writes between our read and our commit
                    let mut other = Transaction::new(Arc::clone(&interferer));
                    other.get(CollectionName::Posts, "c1").await?;
                    other.update(CollectionName::Posts, "c1", "count", json!(100));
                    interferer.commit(other.into_record()).await?;
                }
                let count = doc.field("count").and_then(|v| v.as_i64()).unwrap_or(0);
                txn.update(CollectionName::Posts, "c1", "count", json!(count + 1));
                Ok::<_, StoreError>((txn, ()))
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
        let doc = store.get(CollectionName::Posts, "c1").await.unwrap();
        assert_eq!(doc.field("count"), Some(&json!(101)));
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let store = seeded_store().await;
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<()> = run_transaction(&store, &policy, |mut txn| {
            let interferer = Arc::clone(&store);
            async move {
                txn.get(CollectionName::Posts, "c1").await?;
                let mut other = Transaction::new(Arc::clone(&interferer));
                other.get(CollectionName::Posts, "c1").await?;
                other.update(CollectionName::Posts, "c1", "count", json!(7));
                interferer.commit(other.into_record()).await?;
                txn.update(CollectionName::Posts, "c1", "count", json!(1));
                Ok::<_, StoreError>((txn, ()))
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Exhausted { attempts: 2 })));
        let doc = store.get(CollectionName::Posts, "c1").await.unwrap();
        assert_eq!(doc.field("count"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_read_after_write_rejected() {
        let store = seeded_store().await;
        let mut txn = Transaction::new(Arc::clone(&store));
        txn.update(CollectionName::Posts, "c1", "count", json!(3));
        assert!(txn.get(CollectionName::Posts, "c1").await.is_err());
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(20));
        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(30) && third <= Duration::from_millis(40));
        assert_eq!(RetryPolicy::new(5, Duration::ZERO).delay_for(4), Duration::ZERO);
    }
}
