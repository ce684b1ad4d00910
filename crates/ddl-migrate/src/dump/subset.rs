//! Subset dumps.
//!
//! A subset query selects seed rows from one table:
//!
//! ```text
//! SELECT {*} FROM {film} ORDER BY film_id LIMIT 10
//! ```
//!
//! `{film}` (or `{schema.film}`) expands to the quoted table name and `{*}` to
//! its column list. Collection then follows foreign keys to parent rows until
//! nothing new turns up, so the dumped rows load without violating any
//! constraint. Extended subsets also pull the child rows that reference the
//! seed rows (and their children), then those rows' parents.

use std::collections::{BTreeMap, HashSet, VecDeque};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SubsetQuery;
use crate::core::catalog::{Catalog, Constraint, Table};
use crate::core::traits::Session;
use crate::core::value::{Row, SqlValue};
use crate::diff::render::Ddl;
use crate::dump::{compare_cells, dump_columns};
use crate::error::{MigrateError, Result};

/// Tuples per `WHERE ... IN` lookup.
const LOOKUP_CHUNK: usize = 100;

#[derive(Debug, PartialEq)]
enum Piece<'q> {
    Text(&'q str),
    Star,
    Table(&'q str),
}

fn is_placeholder(token: &str) -> bool {
    token == "*"
        || (!token.is_empty()
            && token
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '$'))
}

fn pieces(query: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = query;
    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        let token = &rest[open + 1..open + len];
        if !is_placeholder(token) {
            out.push(Piece::Text(&rest[..open + len + 1]));
            rest = &rest[open + len + 1..];
            continue;
        }
        if open > 0 {
            out.push(Piece::Text(&rest[..open]));
        }
        out.push(if token == "*" { Piece::Star } else { Piece::Table(token) });
        rest = &rest[open + len + 1..];
    }
    if !rest.is_empty() {
        out.push(Piece::Text(rest));
    }
    out
}

fn resolve<'c>(catalog: &'c Catalog, reference: &str) -> Result<&'c Table> {
    let (schema, name) = reference.split_once('.').unwrap_or(("", reference));
    catalog
        .find_table(schema, name)
        .ok_or_else(|| MigrateError::Config(format!("subset query references unknown table {}", reference)))
}

/// Expand placeholders. Returns the seed table (the first one named) and the SQL.
pub fn expand<'c>(catalog: &'c Catalog, query: &str) -> Result<(&'c Table, String)> {
    let ddl = Ddl::new(catalog.dialect, &catalog.current_schema);
    let pieces = pieces(query);
    let root = pieces
        .iter()
        .find_map(|p| match p {
            Piece::Table(name) => Some(*name),
            _ => None,
        })
        .ok_or_else(|| MigrateError::Config(format!("subset query names no {{table}}: {}", query)))?;
    let root = resolve(catalog, root)?;

    let mut sql = String::with_capacity(query.len() * 2);
    for piece in &pieces {
        match piece {
            Piece::Text(text) => sql.push_str(text),
            Piece::Table(name) => sql.push_str(&ddl.table_name(resolve(catalog, name)?)),
            Piece::Star => {
                let qualifier = ddl.table_name(root);
                let columns: Vec<String> = dump_columns(root)
                    .iter()
                    .map(|c| format!("{}.{}", qualifier, ddl.ident(c)))
                    .collect();
                sql.push_str(&columns.join(", "));
            }
        }
    }
    Ok((root, sql))
}

/// Rows gathered for one table, deduplicated by key.
#[derive(Debug, Default)]
struct TableRows {
    keys: HashSet<String>,
    rows: Vec<Row>,
}

/// Rows gathered per table.
#[derive(Debug, Default)]
pub struct Collected {
    tables: BTreeMap<(String, String), TableRows>,
}

fn table_key(table: &Table) -> (String, String) {
    (table.schema.clone(), table.name.clone())
}

fn key_columns(table: &Table) -> Vec<String> {
    let pk = table.primary_key_columns();
    if pk.is_empty() {
        dump_columns(table)
    } else {
        pk
    }
}

fn values_at(table: &Table, row: &Row, columns: &[String]) -> Result<Vec<SqlValue<'static>>> {
    columns
        .iter()
        .map(|c| {
            let idx = row.index_of(c).ok_or_else(|| {
                MigrateError::Config(format!("subset rows for {} lack column {}", table.name, c))
            })?;
            Ok(row.values()[idx].clone())
        })
        .collect()
}

fn row_key(table: &Table, row: &Row) -> Result<String> {
    let values = values_at(table, row, &key_columns(table))?;
    Ok(values
        .iter()
        .map(|v| v.to_text().unwrap_or_else(|| "\\N".to_string()))
        .collect::<Vec<_>>()
        .join("\u{1f}"))
}

impl Collected {
    /// Add rows; returns the ones not seen before.
    fn add(&mut self, table: &Table, rows: Vec<Row>) -> Result<Vec<Row>> {
        let entry = self.tables.entry(table_key(table)).or_default();
        let mut fresh = Vec::new();
        for row in rows {
            if entry.keys.insert(row_key(table, &row)?) {
                entry.rows.push(row.clone());
                fresh.push(row);
            }
        }
        Ok(fresh)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    /// Tables with rows, in catalog order, each sorted by key.
    pub fn tables<'c>(&self, catalog: &'c Catalog) -> Vec<(&'c Table, Vec<Row>)> {
        let mut out = Vec::new();
        for table in catalog.tables() {
            let Some(entry) = self.tables.get(&table_key(table)) else {
                continue;
            };
            if entry.rows.is_empty() {
                continue;
            }
            let keys = key_columns(table);
            let mut rows = entry.rows.clone();
            rows.sort_by(|a, b| {
                for k in &keys {
                    let (Some(ia), Some(ib)) = (a.index_of(k), b.index_of(k)) else {
                        continue;
                    };
                    let ord = compare_cells(&a.values()[ia], &b.values()[ib]);
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            out.push((table, rows));
        }
        out
    }
}

fn parent_of<'c>(catalog: &'c Catalog, table: &Table, fk: &Constraint) -> Option<&'c Table> {
    let schema = if fk.references_schema.is_empty() {
        &table.schema
    } else {
        &fk.references_schema
    };
    catalog.find_table(schema, &fk.references_table)
}

/// Distinct non-NULL tuples of `columns` across `rows`.
fn tuples(table: &Table, rows: &[Row], columns: &[String]) -> Result<Vec<Vec<SqlValue<'static>>>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let values = values_at(table, row, columns)?;
        if values.iter().any(SqlValue::is_null) {
            continue;
        }
        let key: Vec<String> = values.iter().filter_map(SqlValue::to_text).collect();
        if seen.insert(key) {
            out.push(values);
        }
    }
    Ok(out)
}

/// Rows of `table` whose `columns` match any of `wanted`.
async fn lookup(
    session: &mut dyn Session,
    catalog: &Catalog,
    table: &Table,
    columns: &[String],
    wanted: &[Vec<SqlValue<'static>>],
) -> Result<Vec<Row>> {
    let d = catalog.dialect;
    let ddl = Ddl::new(d, &catalog.current_schema);
    let select = dump_columns(table)
        .iter()
        .map(|c| ddl.ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = Vec::new();
    for chunk in wanted.chunks(LOOKUP_CHUNK) {
        let condition = if columns.len() == 1 {
            let list: Vec<String> = chunk.iter().map(|t| t[0].to_literal(d)).collect();
            format!("{} IN ({})", ddl.ident(&columns[0]), list.join(", "))
        } else {
            chunk
                .iter()
                .map(|t| {
                    let parts: Vec<String> = columns
                        .iter()
                        .zip(t)
                        .map(|(c, v)| format!("{} = {}", ddl.ident(c), v.to_literal(d)))
                        .collect();
                    format!("({})", parts.join(" AND "))
                })
                .collect::<Vec<_>>()
                .join(" OR ")
        };
        let sql = format!("SELECT {} FROM {} WHERE {}", select, ddl.table_name(table), condition);
        out.extend(session.query(&sql, &[]).await.map_err(|e| MigrateError::sql(&sql, e))?);
    }
    Ok(out)
}

/// Run every subset query and close the result over foreign keys.
pub async fn collect(
    session: &mut dyn Session,
    catalog: &Catalog,
    subsets: &[SubsetQuery],
    cancel: &CancellationToken,
) -> Result<Collected> {
    let mut collected = Collected::default();
    // (table, new rows, pull children too)
    let mut queue: VecDeque<(&Table, Vec<Row>, bool)> = VecDeque::new();

    for subset in subsets {
        let (root, sql) = expand(catalog, &subset.query)?;
        debug!("subset seed: {}", sql);
        let rows = session.query(&sql, &[]).await.map_err(|e| MigrateError::sql(&sql, e))?;
        let fresh = collected.add(root, rows)?;
        queue.push_back((root, fresh, subset.extended));
    }

    while let Some((table, rows, descend)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        if rows.is_empty() {
            continue;
        }
        for fk in table.foreign_keys() {
            let Some(parent) = parent_of(catalog, table, fk) else {
                continue;
            };
            let wanted = tuples(table, &rows, &fk.columns)?;
            if wanted.is_empty() {
                continue;
            }
            let found = lookup(session, catalog, parent, &fk.references_columns, &wanted).await?;
            let fresh = collected.add(parent, found)?;
            debug!("{} -> {}: {} new rows", table.name, parent.name, fresh.len());
            queue.push_back((parent, fresh, false));
        }
        if !descend {
            continue;
        }
        for child in catalog.tables() {
            for fk in child.foreign_keys() {
                if !parent_of(catalog, child, fk).is_some_and(|p| std::ptr::eq(p, table)) {
                    continue;
                }
                let wanted = tuples(table, &rows, &fk.references_columns)?;
                if wanted.is_empty() {
                    continue;
                }
                let found = lookup(session, catalog, child, &fk.columns, &wanted).await?;
                let fresh = collected.add(child, found)?;
                debug!("{} <- {}: {} new rows", table.name, child.name, fresh.len());
                queue.push_back((child, fresh, true));
            }
        }
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::Database;
    use crate::core::dialect::Dialect;
    use crate::drivers::sqlite::SqliteDatabase;
    use crate::drivers;

    #[test]
    fn test_pieces() {
        assert_eq!(
            pieces("SELECT {*} FROM {film} WHERE x = '{not a placeholder}'"),
            vec![
                Piece::Text("SELECT "),
                Piece::Star,
                Piece::Text(" FROM "),
                Piece::Table("film"),
                Piece::Text(" WHERE x = '{not a placeholder}"),
                Piece::Text("'"),
            ]
        );
    }

    async fn sakila() -> (tempfile::TempDir, Box<dyn Session>) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::connect(&dir.path().join("s.db").to_string_lossy())
            .await
            .unwrap();
        let mut s = db.session().await.unwrap();
        s.exec(
            "CREATE TABLE language (language_id INTEGER PRIMARY KEY, name TEXT);\n\
             CREATE TABLE film (film_id INTEGER PRIMARY KEY, title TEXT, \
             language_id INTEGER REFERENCES language (language_id));\n\
             CREATE TABLE inventory (inventory_id INTEGER PRIMARY KEY, \
             film_id INTEGER REFERENCES film (film_id));\n\
             INSERT INTO language VALUES (1, 'English'), (2, 'Italian'), (3, 'Japanese');\n\
             INSERT INTO film VALUES (1, 'A', 2), (2, 'B', 1), (3, 'C', 1);\n\
             INSERT INTO inventory VALUES (10, 1), (11, 1), (12, 3);\n",
        )
        .await
        .unwrap();
        (dir, s)
    }

    #[tokio::test]
    async fn test_expand_placeholders() {
        let (_dir, mut s) = sakila().await;
        let catalog = drivers::introspect(s.as_mut()).await.unwrap();
        assert_eq!(catalog.dialect, Dialect::Sqlite);
        let (root, sql) = expand(&catalog, "SELECT {*} FROM {film} ORDER BY film_id LIMIT 1").unwrap();
        assert_eq!(root.name, "film");
        assert_eq!(
            sql,
            "SELECT film.film_id, film.title, film.language_id FROM film ORDER BY film_id LIMIT 1"
        );
        assert!(expand(&catalog, "SELECT 1").is_err());
        assert!(expand(&catalog, "SELECT {*} FROM {nope}").is_err());
    }

    #[tokio::test]
    async fn test_subset_follows_parents() {
        let (_dir, mut s) = sakila().await;
        let catalog = drivers::introspect(s.as_mut()).await.unwrap();
        let subsets = vec![SubsetQuery {
            query: "SELECT {*} FROM {film} ORDER BY film_id LIMIT 1".into(),
            extended: false,
        }];
        let collected = collect(s.as_mut(), &catalog, &subsets, &CancellationToken::new())
            .await
            .unwrap();
        let tables = collected.tables(&catalog);
        let names: Vec<&str> = tables.iter().map(|(t, _)| t.name.as_str()).collect();
        assert_eq!(names, vec!["language", "film"]);
        assert_eq!(tables[0].1.len(), 1);
        assert_eq!(tables[0].1[0].get_string(1), "Italian");
        assert_eq!(collected.row_count(), 2);
    }

    #[tokio::test]
    async fn test_extended_subset_pulls_children() {
        let (_dir, mut s) = sakila().await;
        let catalog = drivers::introspect(s.as_mut()).await.unwrap();
        let subsets = vec![SubsetQuery {
            query: "SELECT {*} FROM {film} WHERE film_id = 1".into(),
            extended: true,
        }];
        let collected = collect(s.as_mut(), &catalog, &subsets, &CancellationToken::new())
            .await
            .unwrap();
        let tables = collected.tables(&catalog);
        let inventory = tables.iter().find(|(t, _)| t.name == "inventory").unwrap();
        let ids: Vec<i64> = inventory.1.iter().map(|r| r.get_i64(0).unwrap()).collect();
        assert_eq!(ids, vec![10, 11]);
        // Parents of pulled rows only; film 3 is not reached through its language.
        let films = tables.iter().find(|(t, _)| t.name == "film").unwrap();
        assert_eq!(films.1.len(), 1);
    }
}
