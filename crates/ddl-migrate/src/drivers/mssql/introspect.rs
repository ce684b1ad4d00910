//! SQL Server catalog introspection over the `sys.*` catalog views.

use tracing::debug;

use crate::core::catalog::{
    Catalog, Column, Constraint, ConstraintKind, Index, Routine, Trigger, VersionNums, View,
};
use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::drivers::common::builder::{query_scalar, CatalogBuilder};
use crate::error::Result;

/// Read every user schema of the current database.
pub async fn introspect(session: &mut dyn Session) -> Result<Catalog> {
    let mut catalog = Catalog::new(Dialect::SqlServer);
    let version = query_scalar(
        session,
        "SELECT CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128))",
    )
    .await?;
    catalog.version_nums = VersionNums::parse(&version);
    let current = query_scalar(session, "SELECT SCHEMA_NAME()").await?;
    if !current.is_empty() {
        catalog.current_schema = current;
    }
    catalog.default_collation = query_scalar(
        session,
        "SELECT CAST(DATABASEPROPERTYEX(DB_NAME(), 'Collation') AS NVARCHAR(128))",
    )
    .await?;
    debug!("introspecting SQL Server {}", version);

    let default_collation = catalog.default_collation.clone();
    let mut b = CatalogBuilder::new(catalog);

    // Fixed database roles own schemas with ids from 16384 up.
    let sql = "SELECT name FROM sys.schemas \
               WHERE schema_id < 16384 AND name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest') \
               ORDER BY name";
    for row in session.query(sql, &[]).await? {
        b.add_schema(&row.get_string(0));
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name FROM sys.tables t \
               WHERE t.is_ms_shipped = 0 ORDER BY 1, 2";
    for row in session.query(sql, &[]).await? {
        b.add_table(&row.get_string(0), &row.get_string(1), String::new());
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, c.name, TYPE_NAME(c.user_type_id), \
               c.max_length, c.precision, c.scale, c.is_nullable, c.is_identity, \
               COALESCE(CAST(ic.seed_value AS NVARCHAR(40)), ''), \
               COALESCE(CAST(ic.increment_value AS NVARCHAR(40)), ''), \
               c.is_computed, COALESCE(cc.definition, ''), COALESCE(CAST(cc.is_persisted AS INT), 0), \
               COALESCE(dc.definition, ''), COALESCE(c.collation_name, '') \
               FROM sys.columns c \
               JOIN sys.tables t ON t.object_id = c.object_id \
               LEFT JOIN sys.identity_columns ic ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
               LEFT JOIN sys.computed_columns cc ON cc.object_id = c.object_id AND cc.column_id = c.column_id \
               LEFT JOIN sys.default_constraints dc \
                 ON dc.parent_object_id = c.object_id AND dc.parent_column_id = c.column_id \
               WHERE t.is_ms_shipped = 0 ORDER BY 1, 2, c.column_id";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let type_name = row.get_string(3);
        let mut column = Column {
            name: row.get_string(2),
            column_type: render_type(
                &type_name,
                row.get_i64(4).unwrap_or(0),
                row.get_i64(5).unwrap_or(0),
                row.get_i64(6).unwrap_or(0),
            ),
            is_not_null: !row.get_bool(7),
            default: row.get_string(14),
            ..Default::default()
        };
        if row.get_bool(8) {
            column.identity = format!("IDENTITY({},{})", row.get_string(9), row.get_string(10));
        }
        if row.get_bool(11) {
            column.is_generated = true;
            column.generated_expr = row.get_string(12);
            column.generated_kind = if row.get_bool(13) {
                "STORED".to_string()
            } else {
                "VIRTUAL".to_string()
            };
        }
        let collation = row.get_string(15);
        if !collation.is_empty() && collation != default_collation {
            column.collation = collation;
        }
        table.columns.push(column);
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, kc.name, kc.type, col.name \
               FROM sys.key_constraints kc \
               JOIN sys.tables t ON t.object_id = kc.parent_object_id \
               JOIN sys.index_columns ic ON ic.object_id = kc.parent_object_id AND ic.index_id = kc.unique_index_id \
               JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id \
               WHERE t.is_ms_shipped = 0 ORDER BY 1, 2, 3, ic.key_ordinal";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let name = row.get_string(2);
        let kind = if row.get_string(3).trim() == "PK" {
            ConstraintKind::PrimaryKey
        } else {
            ConstraintKind::Unique
        };
        push_column(&mut table.constraints, name, kind, row.get_string(4));
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, fk.name, pc.name, \
               SCHEMA_NAME(rt.schema_id), rt.name, rc.name, \
               fk.update_referential_action_desc, fk.delete_referential_action_desc \
               FROM sys.foreign_keys fk \
               JOIN sys.tables t ON t.object_id = fk.parent_object_id \
               JOIN sys.tables rt ON rt.object_id = fk.referenced_object_id \
               JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
               JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
               JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
               WHERE t.is_ms_shipped = 0 ORDER BY 1, 2, 3, fkc.constraint_column_id";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let name = row.get_string(2);
        let constraint = push_column(
            &mut table.constraints,
            name,
            ConstraintKind::ForeignKey,
            row.get_string(3),
        );
        if constraint.references_table.is_empty() {
            constraint.references_schema = row.get_string(4);
            constraint.references_table = row.get_string(5);
            constraint.update_rule = row.get_string(7).replace('_', " ");
            constraint.delete_rule = row.get_string(8).replace('_', " ");
        }
        constraint.references_columns.push(row.get_string(6));
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, cc.name, cc.definition \
               FROM sys.check_constraints cc JOIN sys.tables t ON t.object_id = cc.parent_object_id \
               WHERE t.is_ms_shipped = 0 ORDER BY 1, 2, 3";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        table.constraints.push(Constraint {
            name: row.get_string(2),
            kind: ConstraintKind::Check,
            check_expr: unwrap_parens(&row.get_string(3)),
            ..Default::default()
        });
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, i.name, i.is_unique, col.name, \
               ic.is_included_column, ic.is_descending_key, COALESCE(i.filter_definition, ''), i.type_desc \
               FROM sys.indexes i \
               JOIN sys.tables t ON t.object_id = i.object_id \
               JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
               JOIN sys.columns col ON col.object_id = ic.object_id AND col.column_id = ic.column_id \
               WHERE t.is_ms_shipped = 0 AND i.is_primary_key = 0 AND i.is_unique_constraint = 0 \
                 AND i.name IS NOT NULL \
               ORDER BY 1, 2, 3, ic.is_included_column, ic.key_ordinal";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let name = row.get_string(2);
        let mut column = row.get_string(4);
        if row.get_bool(6) {
            column.push_str(" DESC");
        }
        let included = row.get_bool(5);
        let pos = match table.indexes.iter().position(|i| i.name == name) {
            Some(pos) => pos,
            None => {
                let type_desc = row.get_string(8);
                table.indexes.push(Index {
                    name,
                    is_unique: row.get_bool(3),
                    predicate: unwrap_parens(&row.get_string(7)),
                    using: if type_desc == "CLUSTERED" {
                        type_desc
                    } else {
                        String::new()
                    },
                    ..Default::default()
                });
                table.indexes.len() - 1
            }
        };
        if included {
            table.indexes[pos].include.push(column);
        } else {
            table.indexes[pos].columns.push(column);
        }
    }

    let sql = "SELECT SCHEMA_NAME(t.schema_id), t.name, tr.name, OBJECT_DEFINITION(tr.object_id) \
               FROM sys.triggers tr JOIN sys.tables t ON t.object_id = tr.parent_id \
               WHERE tr.is_ms_shipped = 0 ORDER BY 1, 2, 3";
    for row in session.query(sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        table.triggers.push(Trigger {
            name: row.get_string(2),
            sql: row.get_string(3),
            ..Default::default()
        });
    }

    let mut catalog = b.finish();

    let sql = "SELECT SCHEMA_NAME(v.schema_id), v.name, OBJECT_DEFINITION(v.object_id) \
               FROM sys.views v WHERE v.is_ms_shipped = 0 ORDER BY 1, 2";
    for row in session.query(sql, &[]).await? {
        let schema = row.get_string(0);
        catalog.schema_mut(&schema).views.push(View {
            schema: schema.clone(),
            name: row.get_string(1),
            sql: row.get_string(2),
            ..Default::default()
        });
    }

    let sql = "SELECT SCHEMA_NAME(o.schema_id), o.name, o.type, OBJECT_DEFINITION(o.object_id) \
               FROM sys.objects o WHERE o.is_ms_shipped = 0 AND o.type IN ('P', 'FN', 'IF', 'TF') \
               ORDER BY 1, 2";
    for row in session.query(sql, &[]).await? {
        let schema = row.get_string(0);
        let kind = if row.get_string(2).trim() == "P" {
            "PROCEDURE"
        } else {
            "FUNCTION"
        };
        catalog.schema_mut(&schema).routines.push(Routine {
            schema: schema.clone(),
            name: row.get_string(1),
            kind: kind.to_string(),
            sql: row.get_string(3),
            ..Default::default()
        });
    }

    Ok(catalog)
}

/// Find or create the named constraint and append a key column.
fn push_column(
    constraints: &mut Vec<Constraint>,
    name: String,
    kind: ConstraintKind,
    column: String,
) -> &mut Constraint {
    let pos = match constraints.iter().position(|c| c.name == name) {
        Some(pos) => pos,
        None => {
            constraints.push(Constraint {
                name,
                kind,
                ..Default::default()
            });
            constraints.len() - 1
        }
    };
    constraints[pos].columns.push(column);
    &mut constraints[pos]
}

/// Render a `sys.columns` type the way it is written in DDL.
///
/// `max_length` is in bytes (-1 for MAX); national types store two bytes per character.
fn render_type(type_name: &str, max_length: i64, precision: i64, scale: i64) -> String {
    let lower = type_name.to_ascii_lowercase();
    match lower.as_str() {
        "varchar" | "char" | "varbinary" | "binary" => {
            if max_length == -1 {
                format!("{}(MAX)", lower)
            } else {
                format!("{}({})", lower, max_length)
            }
        }
        "nvarchar" | "nchar" => {
            if max_length == -1 {
                format!("{}(MAX)", lower)
            } else {
                format!("{}({})", lower, max_length / 2)
            }
        }
        "decimal" | "numeric" => format!("{}({},{})", lower, precision, scale),
        "datetime2" | "datetimeoffset" | "time" if scale != 7 => format!("{}({})", lower, scale),
        _ => lower,
    }
}

/// SQL Server wraps stored definitions in parentheses: `([price]>(0))`.
fn unwrap_parens(expr: &str) -> String {
    let mut s = expr.trim();
    while s.starts_with('(') && s.ends_with(')') && encloses(s) {
        s = s[1..s.len() - 1].trim();
    }
    s.to_string()
}

fn encloses(s: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_type() {
        assert_eq!(render_type("nvarchar", 100, 0, 0), "nvarchar(50)");
        assert_eq!(render_type("varchar", -1, 0, 0), "varchar(MAX)");
        assert_eq!(render_type("decimal", 9, 10, 2), "decimal(10,2)");
        assert_eq!(render_type("datetime2", 8, 27, 7), "datetime2");
        assert_eq!(render_type("datetime2", 6, 19, 0), "datetime2(0)");
        assert_eq!(render_type("int", 4, 10, 0), "int");
    }

    #[test]
    fn test_unwrap_parens() {
        assert_eq!(unwrap_parens("([price]>(0))"), "[price]>(0)");
        assert_eq!(unwrap_parens("([a]>(0)) AND ([b]>(0))"), "([a]>(0)) AND ([b]>(0))");
        assert_eq!(unwrap_parens(""), "");
    }

    #[test]
    fn test_push_column_groups_by_name() {
        let mut constraints = Vec::new();
        push_column(&mut constraints, "pk".into(), ConstraintKind::PrimaryKey, "a".into());
        push_column(&mut constraints, "pk".into(), ConstraintKind::PrimaryKey, "b".into());
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].columns, vec!["a", "b"]);
    }
}
