//! In-memory document store for tests and local mode

use crate::criteria::Criteria;
use crate::document::{DocumentStore, Mutator};
use async_trait::async_trait;
use mend_common::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Document store backed by nested maps
///
/// Document order within a collection is insertion-stable (BTreeMap keyed
/// by id) so queries are deterministic. The write lock is held across the
/// whole `update` closure, which gives single-document updates the same
/// atomicity a real backend provides with transactions.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        MemoryDocumentStore::default()
    }

    /// Number of documents in a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn query(
        &self,
        collection: &str,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let docs = collections
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|doc| criteria.matches(doc))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        if let Some(c) = collections.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, mutator: Mutator) -> Result<Value> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        // Mutate a copy so a rejected update leaves the document untouched
        let mut draft = doc.clone();
        mutator(&mut draft)?;
        *doc = draft;
        Ok(doc.clone())
    }
}
