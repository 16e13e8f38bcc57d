//! Analytical (warehouse) store contract
//!
//! Tables here are derived from the document store by batch export; the
//! analytical store is never co-authoritative.

use crate::criteria::Criteria;
use async_trait::async_trait;
use mend_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One column of an analytical table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
}

/// Typed table definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

/// Abstract analytical store
#[async_trait]
pub trait AnalyticalStore: Send + Sync {
    /// Create a table; creating an existing table with the same spec is a
    /// no-op, with a different spec an error
    async fn create_table(&self, spec: &TableSpec) -> Result<()>;

    /// Append rows to a table
    async fn insert_rows(&self, table: &str, rows: Vec<Value>) -> Result<()>;

    /// Query rows matching the criteria
    async fn query_rows(&self, table: &str, criteria: &Criteria) -> Result<Vec<Value>>;

    /// Add columns to an existing table
    async fn evolve_table(&self, table: &str, added: Vec<ColumnSpec>) -> Result<()>;
}

/// In-memory analytical store for tests
#[derive(Default)]
pub struct MemoryAnalyticalStore {
    tables: RwLock<HashMap<String, (TableSpec, Vec<Value>)>>,
}

impl MemoryAnalyticalStore {
    pub fn new() -> Self {
        MemoryAnalyticalStore::default()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(|(_, rows)| rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl AnalyticalStore for MemoryAnalyticalStore {
    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.get(&spec.name) {
            Some((existing, _)) if existing == spec => Ok(()),
            Some(_) => Err(Error::Store(format!(
                "table {} already exists with a different schema",
                spec.name
            ))),
            None => {
                tables.insert(spec.name.clone(), (spec.clone(), Vec::new()));
                Ok(())
            }
        }
    }

    async fn insert_rows(&self, table: &str, mut rows: Vec<Value>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let (_, stored) = tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        stored.append(&mut rows);
        Ok(())
    }

    async fn query_rows(&self, table: &str, criteria: &Criteria) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let (_, rows) = tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        Ok(rows.iter().filter(|r| criteria.matches(r)).cloned().collect())
    }

    async fn evolve_table(&self, table: &str, added: Vec<ColumnSpec>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let (spec, _) = tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        for column in added {
            if spec.columns.iter().any(|c| c.name == column.name) {
                return Err(Error::Store(format!(
                    "column {} already exists on table {table}",
                    column.name
                )));
            }
            spec.columns.push(column);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> TableSpec {
        TableSpec {
            name: "healing_executions".into(),
            columns: vec![
                ColumnSpec {
                    name: "healing_id".into(),
                    column_type: "STRING".into(),
                    nullable: false,
                },
                ColumnSpec {
                    name: "status".into(),
                    column_type: "STRING".into(),
                    nullable: false,
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_for_same_spec() {
        let store = MemoryAnalyticalStore::new();
        store.create_table(&spec()).await.unwrap();
        store.create_table(&spec()).await.unwrap();

        let mut different = spec();
        different.columns.pop();
        assert!(store.create_table(&different).await.is_err());
    }

    #[tokio::test]
    async fn insert_and_query() {
        let store = MemoryAnalyticalStore::new();
        store.create_table(&spec()).await.unwrap();
        store
            .insert_rows(
                "healing_executions",
                vec![
                    json!({"healing_id": "h1", "status": "SUCCESS"}),
                    json!({"healing_id": "h2", "status": "FAILED"}),
                ],
            )
            .await
            .unwrap();
        let failed = store
            .query_rows("healing_executions", &Criteria::new().eq("status", "FAILED"))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["healing_id"], "h2");
    }

    #[tokio::test]
    async fn evolve_rejects_duplicate_column() {
        let store = MemoryAnalyticalStore::new();
        store.create_table(&spec()).await.unwrap();
        let added = vec![ColumnSpec {
            name: "status".into(),
            column_type: "STRING".into(),
            nullable: true,
        }];
        assert!(store.evolve_table("healing_executions", added).await.is_err());
    }
}
