//! Object store contract for staged data artifacts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mend_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Metadata attached to a stored object
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub labels: HashMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A downloaded object with its metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub metadata: ObjectMetadata,
}

/// Abstract object store; all operations are idempotent on the path key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    async fn download(&self, bucket: &str, path: &str) -> Result<StoredObject>;

    async fn delete(&self, bucket: &str, path: &str) -> Result<()>;

    /// List object paths under a prefix. With a delimiter, common prefixes
    /// collapse to a single entry ending in the delimiter.
    async fn list(&self, bucket: &str, prefix: &str, delimiter: Option<char>)
        -> Result<Vec<String>>;

    async fn exists(&self, bucket: &str, path: &str) -> Result<bool>;

    async fn get_metadata(&self, bucket: &str, path: &str) -> Result<ObjectMetadata>;

    async fn update_metadata(
        &self,
        bucket: &str,
        path: &str,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<()>;

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> Result<()>;
}

/// In-memory object store for tests and local staging
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        mut metadata: ObjectMetadata,
    ) -> Result<()> {
        metadata.updated_at = Some(Utc::now());
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(path.to_string(), StoredObject { bytes, metadata });
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<StoredObject> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|b| b.get(path))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{path}")))
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        if let Some(b) = buckets.get_mut(bucket) {
            b.remove(path);
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Vec<String>> {
        let buckets = self.buckets.read().await;
        let Some(b) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<String> = Vec::new();
        for path in b.keys().filter(|p| p.starts_with(prefix)) {
            let entry = match delimiter {
                Some(d) => match path[prefix.len()..].find(d) {
                    Some(idx) => format!("{}{}", &path[..prefix.len() + idx], d),
                    None => path.clone(),
                },
                None => path.clone(),
            };
            if results.last() != Some(&entry) {
                results.push(entry);
            }
        }
        Ok(results)
    }

    async fn exists(&self, bucket: &str, path: &str) -> Result<bool> {
        let buckets = self.buckets.read().await;
        Ok(buckets.get(bucket).is_some_and(|b| b.contains_key(path)))
    }

    async fn get_metadata(&self, bucket: &str, path: &str) -> Result<ObjectMetadata> {
        Ok(self.download(bucket, path).await?.metadata)
    }

    async fn update_metadata(
        &self,
        bucket: &str,
        path: &str,
        mut metadata: ObjectMetadata,
    ) -> Result<()> {
        metadata.updated_at = Some(Utc::now());
        let mut buckets = self.buckets.write().await;
        let object = buckets
            .get_mut(bucket)
            .and_then(|b| b.get_mut(path))
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{path}")))?;
        object.metadata = metadata;
        Ok(())
    }

    async fn copy(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        let object = self.download(bucket, from).await?;
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(to.to_string(), object);
        Ok(())
    }

    async fn move_object(&self, bucket: &str, from: &str, to: &str) -> Result<()> {
        self.copy(bucket, from, to).await?;
        self.delete(bucket, from).await
    }
}
