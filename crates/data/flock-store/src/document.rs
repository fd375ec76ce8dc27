//! Stored documents and the collections that hold them

use crate::query::{SortKey, ORDER_FIELD};
use crate::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Collections known to Flock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollectionName {
    Users,
    Posts,
    Comments,
}

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Users => "users",
            CollectionName::Posts => "posts",
            CollectionName::Comments => "comments",
        }
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schemaless record plus the version used for optimistic concurrency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    /// Bumped on every committed write; 0 for documents never stored
    pub version: u64,

    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            fields,
        }
    }

    /// Serialize a record into document fields
    pub fn encode<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self> {
        let id = id.into();
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self::new(id, fields)),
            other => Err(StoreError::Backend(format!(
                "document {} must serialize to an object, got {}",
                id, other
            ))),
        }
    }

    /// Deserialize the fields into a record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// String members of an array field; missing or non-array reads as empty
    pub fn string_set(&self, name: &str) -> Vec<String> {
        self.field(name)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Position of this document in the feed order
    pub fn sort_key(&self) -> SortKey {
        let date = self
            .field(ORDER_FIELD)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        SortKey::new(date, self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_core::Post;

    #[test]
    fn test_encode_decode_record() {
        let mut post = Post::new("a1", "hi");
        post.liked_by = vec!["u1".into(), "u2".into()];

        let doc = Document::encode(post.id.clone(), &post).unwrap();
        assert_eq!(doc.string_set("likedBy"), vec!["u1", "u2"]);
        assert_eq!(doc.sort_key(), SortKey::new(post.date, post.id.clone()));

        let decoded: Post = doc.decode().unwrap();
        assert_eq!(decoded, post);
    }

    #[test]
    fn test_encode_rejects_scalars() {
        assert!(Document::encode("x", &42).is_err());
    }

    #[test]
    fn test_string_set_missing_field() {
        let doc = Document::new("d", Map::new());
        assert!(doc.string_set("follows").is_empty());
    }
}
