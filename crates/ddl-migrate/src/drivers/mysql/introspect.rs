//! MySQL/MariaDB catalog introspection over `information_schema`.
//!
//! Only the connected database is read; it becomes the catalog's single schema.

use std::collections::HashSet;

use tracing::debug;

use crate::core::catalog::{
    Catalog, Column, Constraint, ConstraintKind, Index, Routine, Trigger, VersionNums, View,
};
use crate::core::dialect::Dialect;
use crate::core::identifier::{quote_identifier, quote_literal};
use crate::core::traits::Session;
use crate::drivers::common::builder::{query_scalar, CatalogBuilder};
use crate::error::Result;

/// Data types whose defaults are bare numbers in `COLUMN_DEFAULT`.
const NUMERIC_TYPES: &[&str] = &[
    "tinyint", "smallint", "mediumint", "int", "integer", "bigint", "decimal", "numeric",
    "float", "double", "real", "bit", "year",
];

/// Read the catalog of the current database.
pub async fn introspect(session: &mut dyn Session) -> Result<Catalog> {
    let mut catalog = Catalog::new(Dialect::Mysql);
    let version = query_scalar(session, "SELECT VERSION()").await?;
    let is_mariadb = version.to_ascii_lowercase().contains("mariadb");
    catalog.version_nums = VersionNums::parse(&version);
    catalog.current_schema = query_scalar(session, "SELECT DATABASE()").await?;
    catalog.default_collation = query_scalar(session, "SELECT @@collation_database").await?;
    debug!("introspecting MySQL {} ({})", version, catalog.current_schema);

    let default_collation = catalog.default_collation.clone();
    let current = catalog.current_schema.clone();
    let mut b = CatalogBuilder::new(catalog);
    b.add_schema(&current);

    let sql = "SELECT TABLE_SCHEMA, TABLE_NAME FROM information_schema.TABLES \
               WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME";
    for row in session.query(sql, &[]).await? {
        b.add_table(&row.get_string(0), &row.get_string(1), String::new());
    }

    let sql = "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, COLUMN_DEFAULT, \
               IS_NULLABLE, EXTRA, GENERATION_EXPRESSION, COALESCE(COLLATION_NAME, ''), DATA_TYPE \
               FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() \
               ORDER BY TABLE_NAME, ORDINAL_POSITION";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let extra = row.get_string(6).to_ascii_uppercase();
        let data_type = row.get_string(9).to_ascii_lowercase();
        let mut column = Column {
            name: row.get_string(2),
            column_type: row.get_string(3),
            is_not_null: row.get_string(5).eq_ignore_ascii_case("NO"),
            ..Default::default()
        };
        if let Some(raw) = row.get_str(4) {
            column.default = mysql_default(&raw, &data_type, &extra, is_mariadb);
        }
        let collation = row.get_string(8);
        if !collation.is_empty() && collation != default_collation {
            column.collation = collation;
        }
        if extra.contains("AUTO_INCREMENT") {
            column.identity = "AUTO_INCREMENT".to_string();
        }
        if extra.contains("VIRTUAL GENERATED") || extra.contains("STORED GENERATED") {
            column.is_generated = true;
            column.generated_expr = row.get_string(7);
            column.generated_kind = if extra.contains("STORED") {
                "STORED".to_string()
            } else {
                "VIRTUAL".to_string()
            };
            column.default.clear();
        }
        table.columns.push(column);
    }

    let constraint_names = load_constraints(session, &mut b).await?;
    load_checks(session, &mut b).await?;
    load_indexes(session, &mut b, &constraint_names).await?;

    let sql = "SELECT EVENT_OBJECT_SCHEMA, EVENT_OBJECT_TABLE, TRIGGER_NAME, ACTION_TIMING, \
               EVENT_MANIPULATION, ACTION_STATEMENT FROM information_schema.TRIGGERS \
               WHERE TRIGGER_SCHEMA = DATABASE() ORDER BY EVENT_OBJECT_TABLE, TRIGGER_NAME";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let name = row.get_string(2);
        let sql = format!(
            "CREATE TRIGGER {} {} {} ON {} FOR EACH ROW {};",
            quote_identifier(Dialect::Mysql, &name),
            row.get_string(3),
            row.get_string(4),
            quote_identifier(Dialect::Mysql, &table.name),
            row.get_string(5)
        );
        table.triggers.push(Trigger {
            name,
            sql,
            ..Default::default()
        });
    }

    let mut catalog = b.finish();

    let sql = "SELECT TABLE_NAME, VIEW_DEFINITION FROM information_schema.VIEWS \
               WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME";
    for row in session.query(sql, &[]).await? {
        let name = row.get_string(0);
        let sql = format!(
            "CREATE VIEW {} AS {};",
            quote_identifier(Dialect::Mysql, &name),
            row.get_string(1)
        );
        catalog.schema_mut(&current).views.push(View {
            schema: current.clone(),
            name,
            sql,
            ..Default::default()
        });
    }

    let sql = "SELECT ROUTINE_NAME, ROUTINE_TYPE FROM information_schema.ROUTINES \
               WHERE ROUTINE_SCHEMA = DATABASE() ORDER BY ROUTINE_NAME";
    for row in session.query(sql, &[]).await? {
        catalog.schema_mut(&current).routines.push(Routine {
            schema: current.clone(),
            name: row.get_string(0),
            kind: row.get_string(1).to_ascii_uppercase(),
            ..Default::default()
        });
    }

    Ok(catalog)
}

/// Returns the names of key constraints per table, so their backing indexes are skipped.
async fn load_constraints(
    session: &mut dyn Session,
    b: &mut CatalogBuilder,
) -> Result<HashSet<(String, String)>> {
    let sql = "SELECT tc.TABLE_SCHEMA, tc.TABLE_NAME, tc.CONSTRAINT_NAME, tc.CONSTRAINT_TYPE, \
               kcu.COLUMN_NAME, COALESCE(kcu.REFERENCED_TABLE_SCHEMA, ''), \
               COALESCE(kcu.REFERENCED_TABLE_NAME, ''), COALESCE(kcu.REFERENCED_COLUMN_NAME, ''), \
               COALESCE(rc.UPDATE_RULE, ''), COALESCE(rc.DELETE_RULE, ''), COALESCE(rc.MATCH_OPTION, '') \
               FROM information_schema.TABLE_CONSTRAINTS tc \
               JOIN information_schema.KEY_COLUMN_USAGE kcu \
                 ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA AND kcu.TABLE_NAME = tc.TABLE_NAME \
                AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
               LEFT JOIN information_schema.REFERENTIAL_CONSTRAINTS rc \
                 ON rc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA AND rc.TABLE_NAME = tc.TABLE_NAME \
                AND rc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
               WHERE tc.TABLE_SCHEMA = DATABASE() \
                 AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY') \
               ORDER BY tc.TABLE_NAME, tc.CONSTRAINT_TYPE, tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION";

    let mut names = HashSet::new();
    for row in session.query(sql, &[]).await? {
        let table_name = row.get_string(1);
        let Some(table) = b.table_mut(&row.get_string(0), &table_name) else {
            continue;
        };
        let name = row.get_string(2);
        let kind = match row.get_string(3).as_str() {
            "PRIMARY KEY" => ConstraintKind::PrimaryKey,
            "UNIQUE" => ConstraintKind::Unique,
            _ => ConstraintKind::ForeignKey,
        };
        names.insert((table_name, name.clone()));

        let existing = table
            .constraints
            .iter_mut()
            .find(|c| c.name == name && c.kind == kind);
        let constraint = match existing {
            Some(c) => c,
            None => {
                let mut c = Constraint {
                    name,
                    kind,
                    ..Default::default()
                };
                if kind == ConstraintKind::ForeignKey {
                    c.references_schema = row.get_string(5);
                    c.references_table = row.get_string(6);
                    c.update_rule = row.get_string(8);
                    c.delete_rule = row.get_string(9);
                    let match_option = row.get_string(10);
                    if match_option != "NONE" {
                        c.match_option = match_option;
                    }
                }
                table.constraints.push(c);
                let last = table.constraints.len() - 1;
                &mut table.constraints[last]
            }
        };
        constraint.columns.push(row.get_string(4));
        if kind == ConstraintKind::ForeignKey {
            constraint.references_columns.push(row.get_string(7));
        }
    }
    Ok(names)
}

/// CHECK constraints exist from MySQL 8.0.16 and MariaDB 10.2; older servers lack the view.
async fn load_checks(session: &mut dyn Session, b: &mut CatalogBuilder) -> Result<()> {
    let sql = "SELECT tc.TABLE_SCHEMA, tc.TABLE_NAME, cc.CONSTRAINT_NAME, cc.CHECK_CLAUSE \
               FROM information_schema.CHECK_CONSTRAINTS cc \
               JOIN information_schema.TABLE_CONSTRAINTS tc \
                 ON tc.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA \
                AND tc.CONSTRAINT_NAME = cc.CONSTRAINT_NAME AND tc.CONSTRAINT_TYPE = 'CHECK' \
               WHERE cc.CONSTRAINT_SCHEMA = DATABASE() ORDER BY tc.TABLE_NAME, cc.CONSTRAINT_NAME";
    let rows = match session.query(sql, &[]).await {
        Ok(rows) => rows,
        Err(e) => {
            debug!("CHECK constraints unavailable: {}", e);
            return Ok(());
        }
    };
    for row in rows {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        table.constraints.push(Constraint {
            name: row.get_string(2),
            kind: ConstraintKind::Check,
            check_expr: strip_outer_parens(&row.get_string(3)),
            ..Default::default()
        });
    }
    Ok(())
}

async fn load_indexes(
    session: &mut dyn Session,
    b: &mut CatalogBuilder,
    constraint_names: &HashSet<(String, String)>,
) -> Result<()> {
    let sql = "SELECT TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME, SUB_PART, INDEX_TYPE \
               FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = DATABASE() \
               ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";
    for row in session.query(sql, &[]).await? {
        let table_name = row.get_string(1);
        let name = row.get_string(2);
        if name == "PRIMARY" || constraint_names.contains(&(table_name.clone(), name.clone())) {
            continue;
        }
        let Some(table) = b.table_mut(&row.get_string(0), &table_name) else {
            continue;
        };
        let Some(column) = row.get_str(4) else {
            continue;
        };
        let column = match row.get_i64(5) {
            Some(len) => format!("{}({})", quote_identifier(Dialect::Mysql, &column), len),
            None => column,
        };
        if let Some(index) = table.indexes.iter_mut().find(|i| i.name == name) {
            index.columns.push(column);
            continue;
        }
        let using = row.get_string(6).to_ascii_uppercase();
        table.indexes.push(Index {
            name,
            is_unique: row.get_i64(3) == Some(0),
            columns: vec![column],
            using: if using == "BTREE" { String::new() } else { using },
            ..Default::default()
        });
    }
    Ok(())
}

/// Canonical default expression from `COLUMN_DEFAULT`.
///
/// MySQL reports string literals unquoted; MariaDB quotes them and spells a
/// NULL default as the word `NULL`.
fn mysql_default(raw: &str, data_type: &str, extra: &str, is_mariadb: bool) -> String {
    if is_mariadb {
        return if raw.eq_ignore_ascii_case("NULL") {
            String::new()
        } else {
            raw.to_string()
        };
    }
    if extra.contains("DEFAULT_GENERATED") || raw.to_ascii_uppercase().starts_with("CURRENT_TIMESTAMP") {
        return raw.to_string();
    }
    if NUMERIC_TYPES.contains(&data_type) {
        return raw.to_string();
    }
    quote_literal(Dialect::Mysql, raw)
}

fn strip_outer_parens(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        let inner = &trimmed[1..trimmed.len() - 1];
        // Only strip when the parens enclose the whole expression.
        let mut depth = 0i32;
        for c in inner.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return trimmed.to_string();
                    }
                }
                _ => {}
            }
        }
        return inner.trim().to_string();
    }
    trimmed.to_string()
}
