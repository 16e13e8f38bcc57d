//! Document store contract

use crate::criteria::Criteria;
use async_trait::async_trait;
use mend_common::Result;
use serde_json::Value;

/// Boxed single-document mutator applied under the store's atomicity
/// guarantee. Returning an error aborts the update and leaves the stored
/// document unchanged.
pub type Mutator = Box<dyn FnOnce(&mut Value) -> Result<()> + Send>;

/// Abstract document store
///
/// The document store is the single source of truth for all metadata.
/// `update` is an atomic read-modify-write on one document; every counter
/// update in the system must go through it rather than a separate
/// get-then-set.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace a document
    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    /// Fetch a document, `None` when absent
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Query a collection; `limit` of `None` returns all matches
    async fn query(
        &self,
        collection: &str,
        criteria: &Criteria,
        limit: Option<usize>,
    ) -> Result<Vec<Value>>;

    /// Delete a document; deleting an absent document is not an error
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Atomically mutate one document and return its new value.
    /// Fails with `Error::NotFound` when the document does not exist; a
    /// mutator error aborts without committing.
    async fn update(&self, collection: &str, id: &str, mutator: Mutator) -> Result<Value>;
}
