//! In-process document store
//!
//! Same semantics as the remote stores: versioned documents, ordered range
//! queries and validated commits. An optional artificial latency makes
//! every read a real suspension point, which is what the concurrency tests
//! rely on to interleave callers.

use crate::document::{CollectionName, Document};
use crate::query::{compare_values, FieldFilter, OrderedQuery, QueryPage, SortKey};
use crate::transaction::TransactionRecord;
use crate::{DocumentStore, Result, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

type Collections = HashMap<CollectionName, BTreeMap<String, Document>>;

/// Document store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every read by `latency` to simulate a network round trip
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            latency: Some(latency),
        }
    }

    /// Number of documents in a collection
    pub async fn len(&self, collection: CollectionName) -> usize {
        self.collections
            .read()
            .await
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

fn path(collection: CollectionName, id: &str) -> String {
    format!("{}/{}", collection, id)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: CollectionName, id: &str) -> Result<Document> {
        self.simulate_latency().await;
        self.collections
            .read()
            .await
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path(collection, id)))
    }

    async fn query_ordered(&self, query: &OrderedQuery, after: Option<&SortKey>) -> Result<QueryPage> {
        self.simulate_latency().await;
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&query.collection) else {
            return Ok(QueryPage::default());
        };

        let mut matching: Vec<(SortKey, &Document)> = docs
            .values()
            .filter(|doc| query.filter.matches(doc))
            .map(|doc| (doc.sort_key(), doc))
            .filter(|(key, _)| after.map_or(true, |after| key.is_after(after)))
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        let items = matching
            .into_iter()
            .take(query.limit)
            .map(|(_, doc)| doc.clone())
            .collect();
        Ok(QueryPage::from_items(items))
    }

    async fn query_by(
        &self,
        collection: CollectionName,
        filter: &FieldFilter,
        order_by: &str,
    ) -> Result<Vec<Document>> {
        self.simulate_latency().await;
        let collections = self.collections.read().await;
        let mut found: Vec<Document> = collections
            .get(&collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| compare_values(a.field(order_by), b.field(order_by)));
        Ok(found)
    }

    async fn insert(&self, collection: CollectionName, mut document: Document) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        match docs.get_mut(&document.id) {
            Some(existing) => {
                existing.fields.extend(document.fields);
                existing.version += 1;
            }
            None => {
                document.version = 1;
                docs.insert(document.id.clone(), document);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: CollectionName, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(&collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn commit(&self, record: TransactionRecord) -> Result<()> {
        let mut collections = self.collections.write().await;

        // Validate everything before touching anything
        for (collection, id, version) in &record.reads {
            let current = collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|doc| doc.version);
            if current != Some(*version) {
                return Err(StoreError::Conflict(format!(
                    "{} changed since read (read v{}, now {:?})",
                    path(*collection, id),
                    version,
                    current
                )));
            }
        }
        for write in &record.writes {
            let exists = collections
                .get(&write.collection)
                .map_or(false, |docs| docs.contains_key(&write.id));
            if !exists {
                return Err(StoreError::NotFound(path(write.collection, &write.id)));
            }
        }

        let mut touched: Vec<(CollectionName, &str)> = Vec::new();
        for write in &record.writes {
            if let Some(doc) = collections
                .get_mut(&write.collection)
                .and_then(|docs| docs.get_mut(&write.id))
            {
                doc.set_field(write.field.clone(), write.value.clone());
                if !touched.contains(&(write.collection, write.id.as_str())) {
                    doc.version += 1;
                    touched.push((write.collection, write.id.as_str()));
                }
            }
        }
        Ok(())
    }
}
