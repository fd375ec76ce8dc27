//! MongoDB-backed document store
//!
//! Documents are stored with the record fields at top level plus two
//! bookkeeping fields: `_id` (the document id) and `_v` (the version used
//! for optimistic concurrency). Commits run in a client session
//! transaction and guard every update with the version the caller read.

use crate::document::{CollectionName, Document};
use crate::query::{FieldFilter, OrderedQuery, QueryPage, SortKey, ORDER_FIELD};
use crate::transaction::TransactionRecord;
use crate::{DocumentStore, Result, StoreError};
use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use flock_config::MongoConfig;
use futures::TryStreamExt;
use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::{Client, ClientSession, Collection, Database};
use serde_json::{Map, Value};

const ID_FIELD: &str = "_id";
const VERSION_FIELD: &str = "_v";

/// Commit attempts on one session before an unknown outcome is given up on
const COMMIT_ATTEMPTS: u32 = 3;

/// Document store on a MongoDB replica set
pub struct MongoStore {
    client: Client,
    database: Database,
    config: MongoConfig,
}

impl MongoStore {
    /// Connect using the configured URI and database
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri).await.map_err(classify)?;
        let database = client.database(&config.database);
        tracing::info!("Connected to MongoDB database {}", config.database);
        Ok(Self {
            client,
            database,
            config: config.clone(),
        })
    }

    fn collection(&self, name: CollectionName) -> Collection<BsonDocument> {
        let name = match name {
            CollectionName::Users => &self.config.users_collection,
            CollectionName::Posts => &self.config.posts_collection,
            CollectionName::Comments => &self.config.comments_collection,
        };
        self.database.collection::<BsonDocument>(name)
    }

    /// Apply the record's writes inside an open session transaction
    async fn apply(&self, record: &TransactionRecord, session: &mut ClientSession) -> Result<()> {
        let mut grouped: Vec<((CollectionName, String), BsonDocument)> = Vec::new();
        for write in &record.writes {
            let key = (write.collection, write.id.clone());
            let value = json_to_bson(&write.value)?;
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, set)) => {
                    set.insert(write.field.clone(), value);
                }
                None => {
                    let mut set = BsonDocument::new();
                    set.insert(write.field.clone(), value);
                    grouped.push((key, set));
                }
            }
        }
        let written: Vec<(CollectionName, String)> = grouped.iter().map(|(k, _)| k.clone()).collect();

        for ((collection, id), set) in grouped {
            let read_version = record.read_version(collection, &id);
            let mut filter = doc! { ID_FIELD: id.as_str() };
            if let Some(version) = read_version {
                filter.insert(VERSION_FIELD, version as i64);
            }
            let update = doc! { "$set": set, "$inc": { VERSION_FIELD: 1_i64 } };

            let result = self
                .collection(collection)
                .update_one(filter, update)
                .session(&mut *session)
                .await
                .map_err(classify)?;

            if result.matched_count == 0 {
                let path = format!("{}/{}", collection, id);
                return Err(match read_version {
                    Some(version) => StoreError::Conflict(format!("{} changed since v{}", path, version)),
                    None => StoreError::NotFound(path),
                });
            }
        }

        // Documents only read must still be at the version we saw
        for (collection, id, version) in &record.reads {
            if written.iter().any(|(c, i)| c == collection && i == id) {
                continue;
            }
            let current = self
                .collection(*collection)
                .find_one(doc! { ID_FIELD: id.as_str(), VERSION_FIELD: *version as i64 })
                .session(&mut *session)
                .await
                .map_err(classify)?;
            if current.is_none() {
                return Err(StoreError::Conflict(format!(
                    "{}/{} changed since v{}",
                    collection, id, version
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, collection: CollectionName, id: &str) -> Result<Document> {
        let raw = self
            .collection(collection)
            .find_one(doc! { ID_FIELD: id })
            .await
            .map_err(classify)?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
        from_bson_document(raw)
    }

    async fn query_ordered(&self, query: &OrderedQuery, after: Option<&SortKey>) -> Result<QueryPage> {
        // limit(0) means "no limit" to MongoDB
        if query.limit == 0 {
            return Ok(QueryPage::default());
        }
        let mut filter = filter_document(&query.filter)?;
        if let Some(after) = after {
            filter = doc! {
                "$and": [Bson::Document(filter), Bson::Document(after_document(after))]
            };
        }

        let cursor = self
            .collection(query.collection)
            .find(filter)
            .sort(doc! { ORDER_FIELD: -1, ID_FIELD: -1 })
            .limit(query.limit as i64)
            .await
            .map_err(classify)?;
        let raw: Vec<BsonDocument> = cursor.try_collect().await.map_err(classify)?;

        let items = raw
            .into_iter()
            .map(from_bson_document)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            "MongoDB {} query returned {} documents",
            query.collection,
            items.len()
        );
        Ok(QueryPage::from_items(items))
    }

    async fn query_by(
        &self,
        collection: CollectionName,
        filter: &FieldFilter,
        order_by: &str,
    ) -> Result<Vec<Document>> {
        let mut sort = BsonDocument::new();
        sort.insert(order_by, 1_i32);

        let cursor = self
            .collection(collection)
            .find(filter_document(filter)?)
            .sort(sort)
            .await
            .map_err(classify)?;
        let raw: Vec<BsonDocument> = cursor.try_collect().await.map_err(classify)?;
        raw.into_iter().map(from_bson_document).collect()
    }

    async fn insert(&self, collection: CollectionName, document: Document) -> Result<()> {
        let mut update = doc! { "$inc": { VERSION_FIELD: 1_i64 } };
        if !document.fields.is_empty() {
            update.insert("$set", fields_to_bson(&document.fields)?);
        }
        self.collection(collection)
            .update_one(doc! { ID_FIELD: document.id.as_str() }, update)
            .upsert(true)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, collection: CollectionName, id: &str) -> Result<()> {
        self.collection(collection)
            .delete_one(doc! { ID_FIELD: id })
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn commit(&self, record: TransactionRecord) -> Result<()> {
        if record.reads.is_empty() && record.writes.is_empty() {
            return Ok(());
        }
        let mut session = self.client.start_session().await.map_err(classify)?;
        session.start_transaction().await.map_err(classify)?;

        match self.apply(&record, &mut session).await {
            Ok(()) => {
                let mut attempt = 1;
                loop {
                    let err = match session.commit_transaction().await {
                        Ok(()) => return Ok(()),
                        Err(err) => err,
                    };
                    let failure = CommitFailure::of(&err);
                    if failure == CommitFailure::UnknownResult && attempt < COMMIT_ATTEMPTS {
                        tracing::warn!("Commit result unknown, retrying commit ({})", err);
                        attempt += 1;
                        continue;
                    }
                    return Err(failure.into_store_error(err.to_string()));
                }
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::warn!("Failed to abort MongoDB transaction: {}", abort);
                }
                Err(e)
            }
        }
    }
}

/// Transient transaction failures are write conflicts; the rest are backend errors
fn classify(err: mongodb::error::Error) -> StoreError {
    match CommitFailure::of(&err) {
        CommitFailure::Transient => StoreError::Conflict(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

/// How a failed transaction call is handled, by its driver error labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitFailure {
    /// The commit may or may not have applied; only the commit is retried
    UnknownResult,
    /// Nothing was applied; the whole transaction can be re-run
    Transient,
    Fatal,
}

impl CommitFailure {
    fn of(err: &mongodb::error::Error) -> Self {
        Self::from_labels(|label| err.contains_label(label))
    }

    fn from_labels(has_label: impl Fn(&str) -> bool) -> Self {
        if has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
            CommitFailure::UnknownResult
        } else if has_label(TRANSIENT_TRANSACTION_ERROR) {
            CommitFailure::Transient
        } else {
            CommitFailure::Fatal
        }
    }

    /// Only a transient failure may re-run the transaction body. An
    /// unknown result that outlived its commit retries is a backend error,
    /// since the writes may already be visible.
    fn into_store_error(self, message: String) -> StoreError {
        match self {
            CommitFailure::Transient => StoreError::Conflict(message),
            CommitFailure::UnknownResult | CommitFailure::Fatal => StoreError::Backend(message),
        }
    }
}

fn json_to_bson(value: &Value) -> Result<Bson> {
    bson::to_bson(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn fields_to_bson(fields: &Map<String, Value>) -> Result<BsonDocument> {
    bson::to_document(fields).map_err(|e| StoreError::Backend(e.to_string()))
}

#[cfg(test)]
fn to_bson_document(doc: &Document) -> Result<BsonDocument> {
    let mut out = fields_to_bson(&doc.fields)?;
    out.insert(ID_FIELD, doc.id.as_str());
    out.insert(VERSION_FIELD, doc.version as i64);
    Ok(out)
}

pub(crate) fn from_bson_document(mut raw: BsonDocument) -> Result<Document> {
    let id = match raw.remove(ID_FIELD) {
        Some(Bson::String(id)) => id,
        Some(other) => other.to_string(),
        None => return Err(StoreError::Backend("document without _id".into())),
    };
    let version = match raw.remove(VERSION_FIELD) {
        Some(Bson::Int64(v)) => v.max(0) as u64,
        Some(Bson::Int32(v)) => v.max(0) as u64,
        _ => 0,
    };
    let fields: Map<String, Value> =
        bson::from_document(raw).map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(Document {
        id,
        version,
        fields,
    })
}

pub(crate) fn filter_document(filter: &FieldFilter) -> Result<BsonDocument> {
    let mut out = BsonDocument::new();
    match filter {
        FieldFilter::Eq { field, value } => {
            out.insert(field.as_str(), json_to_bson(value)?);
        }
        FieldFilter::In { field, values } => {
            let values = values.iter().map(json_to_bson).collect::<Result<Vec<_>>>()?;
            out.insert(field.as_str(), doc! { "$in": values });
        }
        FieldFilter::Prefix { field, prefix } => {
            out.insert(
                field.as_str(),
                doc! { "$regex": format!("^{}", escape_regex(prefix)), "$options": "i" },
            );
        }
    }
    Ok(out)
}

/// Strictly after `after` in `(date, _id)` descending order
pub(crate) fn after_document(after: &SortKey) -> BsonDocument {
    doc! {
        "$or": [
            { ORDER_FIELD: { "$lt": after.date } },
            { ORDER_FIELD: after.date, ID_FIELD: { "$lt": after.id.as_str() } },
        ]
    }
}

fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
