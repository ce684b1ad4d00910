//! PostgreSQL catalog introspection over `pg_catalog`.
//!
//! Queries run without parameters, so every value arrives as text through the
//! simple query protocol. Arrays are decoded from their text form.

use tracing::debug;

use crate::core::catalog::{
    Catalog, Column, Constraint, ConstraintKind, Domain, Enum, Index, Routine, Trigger,
    VersionNums, View,
};
use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::drivers::common::builder::{query_scalar, CatalogBuilder};
use crate::error::Result;

const SYSTEM_SCHEMAS: &str = "n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
     AND n.nspname NOT LIKE 'pg_temp_%' AND n.nspname NOT LIKE 'pg_toast_temp_%'";

/// Objects created by extensions are left to the extension.
const NOT_EXTENSION: &str =
    "NOT EXISTS (SELECT 1 FROM pg_depend dep WHERE dep.objid = {oid} AND dep.deptype = 'e')";

fn not_extension(oid: &str) -> String {
    NOT_EXTENSION.replace("{oid}", oid)
}

/// Read the full catalog of the connected database.
pub async fn introspect(session: &mut dyn Session) -> Result<Catalog> {
    let mut catalog = Catalog::new(Dialect::Postgres);
    let version = query_scalar(session, "SELECT current_setting('server_version')").await?;
    catalog.version_nums = VersionNums::parse(&version);
    catalog.current_schema = query_scalar(session, "SELECT current_schema()").await?;
    catalog.default_collation = query_scalar(
        session,
        "SELECT datcollate FROM pg_database WHERE datname = current_database()",
    )
    .await?;
    let v = catalog.version_nums.clone();
    debug!("introspecting PostgreSQL {}", version);

    let mut b = CatalogBuilder::new(catalog);

    let sql = format!(
        "SELECT n.nspname FROM pg_namespace n WHERE {} AND {} ORDER BY n.nspname",
        SYSTEM_SCHEMAS,
        not_extension("n.oid")
    );
    for row in session.query(&sql, &[]).await? {
        b.add_schema(&row.get_string(0));
    }

    let sql = format!(
        "SELECT n.nspname, c.relname FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relkind IN ('r', 'p') AND {} AND {} ORDER BY n.nspname, c.relname",
        SYSTEM_SCHEMAS,
        not_extension("c.oid")
    );
    for row in session.query(&sql, &[]).await? {
        b.add_table(&row.get_string(0), &row.get_string(1), String::new());
    }

    load_columns(session, &mut b, &v).await?;
    load_constraints(session, &mut b).await?;
    load_indexes(session, &mut b, &v).await?;
    load_triggers(session, &mut b).await?;

    let mut catalog = b.finish();
    load_views(session, &mut catalog).await?;
    load_routines(session, &mut catalog, &v).await?;
    load_types(session, &mut catalog).await?;
    Ok(catalog)
}

async fn load_columns(
    session: &mut dyn Session,
    b: &mut CatalogBuilder,
    v: &VersionNums,
) -> Result<()> {
    let identity = if v.greater_or_equal_to(&[10]) {
        "a.attidentity::text"
    } else {
        "''"
    };
    let generated = if v.greater_or_equal_to(&[12]) {
        "a.attgenerated::text"
    } else {
        "''"
    };
    let sql = format!(
        "SELECT n.nspname, c.relname, a.attname, format_type(a.atttypid, a.atttypmod), \
         COALESCE(pg_get_expr(d.adbin, d.adrelid), ''), a.attnotnull, {identity}, {generated}, \
         COALESCE(coll.collname, '') \
         FROM pg_attribute a \
         JOIN pg_class c ON c.oid = a.attrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         JOIN pg_type t ON t.oid = a.atttypid \
         LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
         LEFT JOIN pg_collation coll ON coll.oid = a.attcollation AND a.attcollation <> t.typcollation \
         WHERE c.relkind IN ('r', 'p') AND a.attnum > 0 AND NOT a.attisdropped AND {SYSTEM_SCHEMAS} \
         ORDER BY n.nspname, c.relname, a.attnum"
    );
    for row in session.query(&sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let mut column = Column {
            name: row.get_string(2),
            column_type: row.get_string(3),
            default: row.get_string(4),
            is_not_null: row.get_bool(5),
            collation: row.get_string(8),
            ..Default::default()
        };
        column.identity = match row.get_string(6).as_str() {
            "a" => "GENERATED ALWAYS AS IDENTITY".to_string(),
            "d" => "GENERATED BY DEFAULT AS IDENTITY".to_string(),
            _ => String::new(),
        };
        if row.get_string(7) == "s" {
            column.is_generated = true;
            column.generated_kind = "STORED".to_string();
            column.generated_expr = std::mem::take(&mut column.default);
        }
        table.columns.push(column);
    }
    Ok(())
}

async fn load_constraints(session: &mut dyn Session, b: &mut CatalogBuilder) -> Result<()> {
    let sql = format!(
        "SELECT n.nspname, c.relname, con.conname, con.contype::text, \
         ARRAY(SELECT a.attname FROM unnest(con.conkey) WITH ORDINALITY k(attnum, ord) \
               JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum ORDER BY k.ord), \
         COALESCE(fn.nspname, ''), COALESCE(fc.relname, ''), \
         ARRAY(SELECT a.attname FROM unnest(con.confkey) WITH ORDINALITY k(attnum, ord) \
               JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum ORDER BY k.ord), \
         con.confupdtype::text, con.confdeltype::text, con.confmatchtype::text, \
         pg_get_constraintdef(con.oid), con.condeferrable, con.condeferred \
         FROM pg_constraint con \
         JOIN pg_class c ON c.oid = con.conrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         LEFT JOIN pg_class fc ON fc.oid = con.confrelid \
         LEFT JOIN pg_namespace fn ON fn.oid = fc.relnamespace \
         WHERE con.contype IN ('p', 'u', 'f', 'c', 'x') AND {SYSTEM_SCHEMAS} \
         ORDER BY n.nspname, c.relname, con.contype, con.conname"
    );
    for row in session.query(&sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let definition = row.get_string(11);
        let kind = match row.get_string(3).as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => ConstraintKind::ForeignKey,
            "c" => ConstraintKind::Check,
            _ => ConstraintKind::Exclude,
        };
        let mut constraint = Constraint {
            name: row.get_string(2),
            kind,
            columns: parse_pg_array(&row.get_string(4)),
            is_deferrable: row.get_bool(12),
            is_initially_deferred: row.get_bool(13),
            ..Default::default()
        };
        match kind {
            ConstraintKind::ForeignKey => {
                constraint.references_schema = row.get_string(5);
                constraint.references_table = row.get_string(6);
                constraint.references_columns = parse_pg_array(&row.get_string(7));
                constraint.update_rule = fk_rule(&row.get_string(8));
                constraint.delete_rule = fk_rule(&row.get_string(9));
                constraint.match_option = match row.get_string(10).as_str() {
                    "f" => "FULL".to_string(),
                    "p" => "PARTIAL".to_string(),
                    _ => String::new(),
                };
            }
            ConstraintKind::Check => constraint.check_expr = unwrap_check(&definition),
            ConstraintKind::Exclude => {
                constraint.exclusion_expr = definition
                    .trim_start_matches("EXCLUDE")
                    .trim()
                    .to_string();
            }
            _ => {}
        }
        table.constraints.push(constraint);
    }
    Ok(())
}

async fn load_indexes(
    session: &mut dyn Session,
    b: &mut CatalogBuilder,
    v: &VersionNums,
) -> Result<()> {
    let key_atts = if v.greater_or_equal_to(&[11]) {
        "ix.indnkeyatts"
    } else {
        "ix.indnatts"
    };
    let sql = format!(
        "SELECT n.nspname, t.relname, i.relname, ix.indisunique, am.amname, \
         COALESCE(pg_get_expr(ix.indpred, ix.indrelid), ''), {key_atts}, \
         ARRAY(SELECT pg_get_indexdef(ix.indexrelid, k + 1, true) \
               FROM generate_subscripts(ix.indkey, 1) AS k ORDER BY k) \
         FROM pg_index ix \
         JOIN pg_class i ON i.oid = ix.indexrelid \
         JOIN pg_class t ON t.oid = ix.indrelid \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         JOIN pg_am am ON am.oid = i.relam \
         WHERE t.relkind IN ('r', 'p') AND {SYSTEM_SCHEMAS} \
         AND NOT EXISTS (SELECT 1 FROM pg_constraint con \
                         WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')) \
         ORDER BY n.nspname, t.relname, i.relname"
    );
    for row in session.query(&sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        let mut columns = parse_pg_array(&row.get_string(7));
        let key_count = row.get_i64(6).unwrap_or(columns.len() as i64).max(0) as usize;
        let include = if key_count < columns.len() {
            columns.split_off(key_count)
        } else {
            Vec::new()
        };
        let using = row.get_string(4);
        table.indexes.push(Index {
            name: row.get_string(2),
            is_unique: row.get_bool(3),
            columns,
            include,
            predicate: row.get_string(5),
            using: if using == "btree" { String::new() } else { using },
            ..Default::default()
        });
    }
    Ok(())
}

async fn load_triggers(session: &mut dyn Session, b: &mut CatalogBuilder) -> Result<()> {
    let sql = format!(
        "SELECT n.nspname, c.relname, tg.tgname, pg_get_triggerdef(tg.oid, true) \
         FROM pg_trigger tg \
         JOIN pg_class c ON c.oid = tg.tgrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE NOT tg.tgisinternal AND {SYSTEM_SCHEMAS} \
         ORDER BY n.nspname, c.relname, tg.tgname"
    );
    for row in session.query(&sql, &[]).await? {
        let Some(table) = b.table_mut(&row.get_string(0), &row.get_string(1)) else {
            continue;
        };
        table.triggers.push(Trigger {
            name: row.get_string(2),
            sql: format!("{};", row.get_string(3)),
            ..Default::default()
        });
    }
    Ok(())
}

async fn load_views(session: &mut dyn Session, catalog: &mut Catalog) -> Result<()> {
    let sql = format!(
        "SELECT n.nspname, c.relname, pg_get_viewdef(c.oid, true), c.relkind = 'm' \
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relkind IN ('v', 'm') AND {} AND {} ORDER BY n.nspname, c.relname",
        SYSTEM_SCHEMAS,
        not_extension("c.oid")
    );
    for row in session.query(&sql, &[]).await? {
        let schema = row.get_string(0);
        catalog.schema_mut(&schema).views.push(View {
            schema: schema.clone(),
            name: row.get_string(1),
            sql: row.get_string(2),
            is_materialized: row.get_bool(3),
            ignore: false,
        });
    }
    Ok(())
}

async fn load_routines(
    session: &mut dyn Session,
    catalog: &mut Catalog,
    v: &VersionNums,
) -> Result<()> {
    let (kind, filter) = if v.greater_or_equal_to(&[11]) {
        (
            "CASE p.prokind WHEN 'p' THEN 'PROCEDURE' ELSE 'FUNCTION' END",
            "p.prokind IN ('f', 'p')",
        )
    } else {
        ("'FUNCTION'", "NOT p.proisagg AND NOT p.proiswindow")
    };
    let sql = format!(
        "SELECT n.nspname, p.proname, {kind}, pg_get_function_identity_arguments(p.oid), \
         pg_get_functiondef(p.oid) \
         FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE {filter} AND {SYSTEM_SCHEMAS} AND {} \
         ORDER BY n.nspname, p.proname",
        not_extension("p.oid")
    );
    for row in session.query(&sql, &[]).await? {
        let schema = row.get_string(0);
        catalog.schema_mut(&schema).routines.push(Routine {
            schema: schema.clone(),
            name: row.get_string(1),
            kind: row.get_string(2),
            identity_arguments: row.get_string(3),
            sql: row.get_string(4),
            ignore: false,
        });
    }
    Ok(())
}

async fn load_types(session: &mut dyn Session, catalog: &mut Catalog) -> Result<()> {
    let sql = format!(
        "SELECT n.nspname, t.typname, \
         ARRAY(SELECT e.enumlabel FROM pg_enum e WHERE e.enumtypid = t.oid ORDER BY e.enumsortorder) \
         FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace \
         WHERE t.typtype = 'e' AND {} AND {} ORDER BY n.nspname, t.typname",
        SYSTEM_SCHEMAS,
        not_extension("t.oid")
    );
    for row in session.query(&sql, &[]).await? {
        let schema = row.get_string(0);
        catalog.schema_mut(&schema).enums.push(Enum {
            schema: schema.clone(),
            name: row.get_string(1),
            labels: parse_pg_array(&row.get_string(2)),
            ignore: false,
        });
    }

    let sql = format!(
        "SELECT n.nspname, t.typname, format_type(t.typbasetype, t.typtypmod), \
         COALESCE(coll.collname, ''), t.typnotnull, COALESCE(t.typdefault, ''), \
         ARRAY(SELECT pg_get_constraintdef(con.oid) FROM pg_constraint con \
               WHERE con.contypid = t.oid AND con.contype = 'c' ORDER BY con.conname) \
         FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace \
         LEFT JOIN pg_collation coll ON coll.oid = t.typcollation AND t.typcollation <> 100 \
         WHERE t.typtype = 'd' AND {} AND {} ORDER BY n.nspname, t.typname",
        SYSTEM_SCHEMAS,
        not_extension("t.oid")
    );
    for row in session.query(&sql, &[]).await? {
        let schema = row.get_string(0);
        catalog.schema_mut(&schema).domains.push(Domain {
            schema: schema.clone(),
            name: row.get_string(1),
            underlying_type: row.get_string(2),
            collation: row.get_string(3),
            is_not_null: row.get_bool(4),
            default: row.get_string(5),
            check_exprs: parse_pg_array(&row.get_string(6))
                .iter()
                .map(|c| unwrap_check(c))
                .collect(),
            ignore: false,
        });
    }
    Ok(())
}

fn fk_rule(code: &str) -> String {
    match code {
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => "NO ACTION",
    }
    .to_string()
}

/// `CHECK ((price > 0)) NOT VALID` to `price > 0`.
pub(crate) fn unwrap_check(definition: &str) -> String {
    let mut s = definition.trim();
    s = s.strip_suffix("NOT VALID").unwrap_or(s).trim();
    s = s.strip_prefix("CHECK").unwrap_or(s).trim();
    let mut out = s.to_string();
    while out.starts_with('(') && out.ends_with(')') && balanced_outer(&out) {
        out = out[1..out.len() - 1].trim().to_string();
    }
    out
}

/// Whether the first `(` closes at the last character.
fn balanced_outer(s: &str) -> bool {
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Decode the text form of a one-dimensional Postgres array: `{a,"b c",NULL}`.
pub fn parse_pg_array(text: &str) -> Vec<String> {
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or("");
    let mut items = Vec::new();
    if inner.is_empty() {
        return items;
    }
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' if !quoted => {
                items.push(finish_item(&mut current, was_quoted));
                was_quoted = false;
            }
            _ => current.push(c),
        }
    }
    items.push(finish_item(&mut current, was_quoted));
    items
}

fn finish_item(current: &mut String, was_quoted: bool) -> String {
    let item = std::mem::take(current);
    if !was_quoted && item.eq_ignore_ascii_case("NULL") {
        return String::new();
    }
    item
}
