//! Incremental catalog assembly for the introspectors.
//!
//! Introspection queries return flat rows keyed by `(schema, table)`; the
//! builder files each row under its table and assembles the [`Catalog`] at
//! the end.

use std::collections::BTreeMap;

use crate::core::catalog::{Catalog, Table};
use crate::core::traits::Session;
use crate::error::Result;

pub(crate) struct CatalogBuilder {
    catalog: Catalog,
    tables: BTreeMap<(String, String), Table>,
    /// Table keys in discovery order.
    order: Vec<(String, String)>,
}

impl CatalogBuilder {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            tables: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn add_schema(&mut self, name: &str) {
        self.catalog.schema_mut(name);
    }

    pub fn add_table(&mut self, schema: &str, name: &str, sql: String) {
        let key = (schema.to_string(), name.to_string());
        if self.tables.contains_key(&key) {
            return;
        }
        self.order.push(key.clone());
        self.tables.insert(
            key,
            Table {
                schema: schema.to_string(),
                name: name.to_string(),
                sql,
                ..Default::default()
            },
        );
    }

    /// Rows for tables that were not discovered (views, system tables) are skipped.
    pub fn table_mut(&mut self, schema: &str, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(&(schema.to_string(), name.to_string()))
    }

    pub fn table_keys(&self) -> Vec<(String, String)> {
        self.order.clone()
    }

    /// Assemble the catalog. Names are normalized so constraint lookups match.
    pub fn finish(mut self) -> Catalog {
        for key in &self.order {
            if let Some(table) = self.tables.remove(key) {
                self.catalog.schema_mut(&key.0).tables.push(table);
            }
        }
        self.catalog.normalize_names();
        self.catalog
    }
}

/// First column of the first row as text; empty when there are no rows.
pub(crate) async fn query_scalar(session: &mut dyn Session, sql: &str) -> Result<String> {
    Ok(session
        .query_row(sql, &[])
        .await?
        .map(|r| r.get_string(0))
        .unwrap_or_default())
}

/// Split a comma-separated aggregate (`GROUP_CONCAT`, `STRING_AGG`) into names.
pub(crate) fn split_list(s: &str, sep: char) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(sep).map(|p| p.to_string()).collect()
}
