//! Append-with-supersede knowledge base

use crate::feedback::decay;
use chrono::{DateTime, Utc};
use mend_common::{Error, Result};
use mend_store::{Criteria, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const COLLECTION: &str = "knowledge_entries";

/// The four flavours of accumulated knowledge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeFlavor {
    Issue,
    Pattern,
    Correction,
    Effectiveness,
}

/// One knowledge entry. Entries are never edited in place: a revision is
/// appended and the old entry marked superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub entry_id: String,
    pub flavor: KnowledgeFlavor,
    pub title: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub usage_count: u64,
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(flavor: KnowledgeFlavor, title: impl Into<String>, content: Value) -> Self {
        let now = Utc::now();
        KnowledgeEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            flavor,
            title: title.into(),
            content,
            created_at: now,
            superseded_by: None,
            usage_count: 0,
            success_rate: 1.0,
            last_used: now,
        }
    }

    /// `relevance = recency · ln(1 + uses) · success_rate`
    pub fn relevance(&self, now: DateTime<Utc>) -> f64 {
        let age_days = (now - self.last_used).num_seconds().max(0) as f64 / 86_400.0;
        decay(age_days) * (1.0 + self.usage_count as f64).ln() * self.success_rate
    }
}

/// Store-backed knowledge base
pub struct KnowledgeBase {
    store: Arc<dyn DocumentStore>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        KnowledgeBase { store }
    }

    pub async fn add_entry(&self, entry: &KnowledgeEntry) -> Result<()> {
        self.store
            .set(COLLECTION, &entry.entry_id, serde_json::to_value(entry)?)
            .await
    }

    /// Append a revision and mark the prior entry superseded by it
    pub async fn supersede(&self, old_entry_id: &str, revision: &KnowledgeEntry) -> Result<()> {
        if self.store.get(COLLECTION, old_entry_id).await?.is_none() {
            return Err(Error::NotFound(format!("knowledge entry {old_entry_id}")));
        }
        self.add_entry(revision).await?;
        let new_id = revision.entry_id.clone();
        self.store
            .update(
                COLLECTION,
                old_entry_id,
                Box::new(move |doc| {
                    doc["superseded_by"] = Value::String(new_id);
                    Ok(())
                }),
            )
            .await?;
        debug!(old = old_entry_id, new = %revision.entry_id, "knowledge entry superseded");
        Ok(())
    }

    /// Record a use of an entry and its outcome
    pub async fn record_usage(&self, entry_id: &str, successful: bool) -> Result<()> {
        self.store
            .update(
                COLLECTION,
                entry_id,
                Box::new(move |doc| {
                    let mut entry: KnowledgeEntry = serde_json::from_value(doc.clone())?;
                    let successes =
                        (entry.success_rate * entry.usage_count as f64).round() as u64;
                    entry.usage_count += 1;
                    entry.success_rate = (successes + u64::from(successful)) as f64
                        / entry.usage_count as f64;
                    entry.last_used = Utc::now();
                    *doc = serde_json::to_value(&entry)?;
                    Ok(())
                }),
            )
            .await?;
        Ok(())
    }

    /// Live (non-superseded) entries of a flavour, sorted by relevance
    /// descending
    pub async fn search(
        &self,
        flavor: KnowledgeFlavor,
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        let docs = self
            .store
            .query(
                COLLECTION,
                &Criteria::new().eq("flavor", serde_json::to_value(flavor)?),
                None,
            )
            .await?;
        let now = Utc::now();
        let mut entries: Vec<KnowledgeEntry> = Vec::with_capacity(docs.len());
        for doc in docs {
            let entry: KnowledgeEntry = serde_json::from_value(doc)?;
            if entry.superseded_by.is_none() {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| {
            b.relevance(now)
                .partial_cmp(&a.relevance(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn get_entry(&self, entry_id: &str) -> Result<Option<KnowledgeEntry>> {
        match self.store.get(COLLECTION, entry_id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_store::MemoryDocumentStore;
    use serde_json::json;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn superseded_entries_drop_out_of_search() {
        let kb = kb();
        let original = KnowledgeEntry::new(
            KnowledgeFlavor::Correction,
            "impute with mean",
            json!({"strategy": "impute_mean"}),
        );
        kb.add_entry(&original).await.unwrap();

        let revision = KnowledgeEntry::new(
            KnowledgeFlavor::Correction,
            "impute with interpolation",
            json!({"strategy": "impute_interpolated"}),
        );
        kb.supersede(&original.entry_id, &revision).await.unwrap();

        let found = kb.search(KnowledgeFlavor::Correction, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry_id, revision.entry_id);

        let old = kb.get_entry(&original.entry_id).await.unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some(revision.entry_id.as_str()));
    }

    #[tokio::test]
    async fn usage_reshapes_relevance_ordering() {
        let kb = kb();
        let quiet = KnowledgeEntry::new(KnowledgeFlavor::Pattern, "quiet", json!({}));
        let busy = KnowledgeEntry::new(KnowledgeFlavor::Pattern, "busy", json!({}));
        kb.add_entry(&quiet).await.unwrap();
        kb.add_entry(&busy).await.unwrap();
        for _ in 0..5 {
            kb.record_usage(&busy.entry_id, true).await.unwrap();
        }
        kb.record_usage(&quiet.entry_id, true).await.unwrap();

        let found = kb.search(KnowledgeFlavor::Pattern, 10).await.unwrap();
        assert_eq!(found[0].title, "busy");
    }

    #[tokio::test]
    async fn failed_usages_pull_success_rate_down() {
        let kb = kb();
        let entry = KnowledgeEntry::new(KnowledgeFlavor::Issue, "e", json!({}));
        kb.add_entry(&entry).await.unwrap();
        kb.record_usage(&entry.entry_id, true).await.unwrap();
        kb.record_usage(&entry.entry_id, false).await.unwrap();
        let loaded = kb.get_entry(&entry.entry_id).await.unwrap().unwrap();
        assert_eq!(loaded.usage_count, 2);
        assert!((loaded.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unused_entries_have_zero_relevance() {
        let entry = KnowledgeEntry::new(KnowledgeFlavor::Issue, "new", json!({}));
        assert_eq!(entry.relevance(Utc::now()), 0.0);
    }
}
