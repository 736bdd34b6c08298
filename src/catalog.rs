//! Catalog boundary (table metadata) and the thin manager used by the pipeline and sweeper.

use crate::error::EtlError;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Outcome of a table delete. A missing table is an expected answer, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableDeletion {
    Deleted,
    NotFound,
}

pub trait Catalog: Send + Sync {
    /// Tables in `database` whose name matches the regular expression `pattern`.
    fn list_tables(&self, database: &str, pattern: &str) -> Result<Vec<String>>;
    fn delete_table(&self, database: &str, name: &str) -> Result<TableDeletion>;
}

#[derive(Clone)]
pub struct CatalogManager {
    catalog: Arc<dyn Catalog>,
}

impl CatalogManager {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub fn list_tables(&self, database: &str, pattern: &str) -> Result<Vec<String>> {
        self.catalog
            .list_tables(database, pattern)
            .with_context(|| format!("list tables in {database} matching '{pattern}'"))
    }

    pub fn delete_table(&self, database: &str, name: &str) -> Result<TableDeletion> {
        tracing::info!(database, table = name, "Delete catalog table");
        let outcome = self
            .catalog
            .delete_table(database, name)
            .map_err(|e| EtlError::catalog(database, name, format!("{e:#}")))?;
        if outcome == TableDeletion::NotFound {
            tracing::info!(database, table = name, "table already gone");
        }
        Ok(outcome)
    }
}
