//! SQLite catalog introspection.
//!
//! Columns, keys and indexes come from the `pragma_*` table-valued functions.
//! Details SQLite does not expose through pragmas (CHECK bodies, generated
//! expressions, AUTOINCREMENT, collations, index expressions) are read back
//! from the stored CREATE statements.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::catalog::{
    Catalog, Column, Constraint, ConstraintKind, Index, Trigger, VersionNums, View,
};
use crate::core::dialect::Dialect;
use crate::core::traits::Session;
use crate::core::value::SqlValue;
use crate::drivers::common::builder::{query_scalar, CatalogBuilder};
use crate::error::Result;

const MAIN: &str = "main";

/// Read the `main` database.
pub async fn introspect(session: &mut dyn Session) -> Result<Catalog> {
    let mut catalog = Catalog::new(Dialect::Sqlite);
    let version = query_scalar(session, "SELECT sqlite_version()").await?;
    catalog.version_nums = VersionNums::parse(&version);
    catalog.current_schema = MAIN.to_string();
    debug!("introspecting SQLite {}", version);

    let mut b = CatalogBuilder::new(catalog);
    b.add_schema(MAIN);

    let sql = "SELECT name, COALESCE(sql, '') FROM sqlite_master \
               WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY rowid";
    for row in session.query(sql, &[]).await? {
        let name = row.get_string(0);
        let create = row.get_string(1);
        let is_virtual = create
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("CREATE VIRTUAL");
        b.add_table(MAIN, &name, create);
        if let Some(table) = b.table_mut(MAIN, &name) {
            table.is_virtual = is_virtual;
        }
    }

    for (_, name) in b.table_keys() {
        let param = [SqlValue::text_borrowed(&name)];

        let columns = session
            .query(
                "SELECT name, type, \"notnull\", dflt_value, pk, hidden \
                 FROM pragma_table_xinfo(?) ORDER BY cid",
                &param,
            )
            .await?;
        let foreign_keys = session
            .query(
                "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete, \"match\" \
                 FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                &param,
            )
            .await?;
        let index_list = session
            .query(
                "SELECT name, \"unique\", origin FROM pragma_index_list(?) ORDER BY seq",
                &param,
            )
            .await?;
        let mut unique_columns = Vec::new();
        for index in &index_list {
            if index.get_string(2) != "u" {
                continue;
            }
            let cols = session
                .query(
                    "SELECT name FROM pragma_index_info(?) ORDER BY seqno",
                    &[SqlValue::text_owned(index.get_string(0))],
                )
                .await?;
            unique_columns.push(cols.iter().map(|r| r.get_string(0)).collect::<Vec<_>>());
        }
        let index_sql = session
            .query(
                "SELECT name, COALESCE(sql, '') FROM sqlite_master \
                 WHERE type = 'index' AND tbl_name = ? AND sql IS NOT NULL ORDER BY name",
                &param,
            )
            .await?;
        let triggers = session
            .query(
                "SELECT name, sql FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ? \
                 ORDER BY name",
                &param,
            )
            .await?;

        let Some(table) = b.table_mut(MAIN, &name) else {
            continue;
        };
        let definitions = table_body(&table.sql)
            .map(split_top_level)
            .unwrap_or_default();

        let mut pk: Vec<(i64, String)> = Vec::new();
        for row in &columns {
            // hidden = 1 marks virtual-table plumbing
            let hidden = row.get_i64(5).unwrap_or(0);
            if hidden == 1 {
                continue;
            }
            let col_name = row.get_string(0);
            let segment = definitions
                .iter()
                .find(|d| column_segment_name(d).is_some_and(|n| n.eq_ignore_ascii_case(&col_name)));
            let mut column = Column {
                name: col_name.clone(),
                column_type: row.get_string(1),
                is_not_null: row.get_bool(2),
                default: row.get_string(3),
                ..Default::default()
            };
            let pk_pos = row.get_i64(4).unwrap_or(0);
            if pk_pos > 0 {
                pk.push((pk_pos, col_name.clone()));
            }
            if let Some(segment) = segment {
                if hidden >= 2 {
                    column.is_generated = true;
                    column.generated_expr = keyword_parens(segment, "AS").unwrap_or_default();
                    column.generated_kind = if hidden == 3 {
                        "STORED".to_string()
                    } else {
                        "VIRTUAL".to_string()
                    };
                }
                if find_keyword(segment, "AUTOINCREMENT").is_some() {
                    column.identity = "AUTOINCREMENT".to_string();
                }
                if let Some(collation) = keyword_word(segment, "COLLATE") {
                    column.collation = collation;
                }
                if let Some(expr) = keyword_parens(segment, "CHECK") {
                    table.constraints.push(Constraint {
                        kind: ConstraintKind::Check,
                        columns: vec![col_name.clone()],
                        check_expr: expr,
                        ..Default::default()
                    });
                }
            }
            table.columns.push(column);
        }

        if !pk.is_empty() {
            pk.sort();
            table.constraints.insert(
                0,
                Constraint {
                    kind: ConstraintKind::PrimaryKey,
                    columns: pk.into_iter().map(|(_, c)| c).collect(),
                    ..Default::default()
                },
            );
        }

        for columns in unique_columns {
            table.constraints.push(Constraint {
                kind: ConstraintKind::Unique,
                columns,
                ..Default::default()
            });
        }

        // Table-level CHECK clauses
        for definition in &definitions {
            if column_segment_name(definition).is_some() {
                continue;
            }
            let body = skip_constraint_name(definition);
            if !body.to_ascii_uppercase().starts_with("CHECK") {
                continue;
            }
            if let Some(expr) = keyword_parens(body, "CHECK") {
                let referenced = table
                    .columns
                    .iter()
                    .filter(|c| mentions_word(&expr, &c.name))
                    .map(|c| c.name.clone())
                    .collect();
                table.constraints.push(Constraint {
                    kind: ConstraintKind::Check,
                    columns: referenced,
                    check_expr: expr,
                    ..Default::default()
                });
            }
        }

        let mut fks: BTreeMap<i64, Constraint> = BTreeMap::new();
        for row in &foreign_keys {
            let fk = fks.entry(row.get_i64(0).unwrap_or(0)).or_insert_with(|| Constraint {
                kind: ConstraintKind::ForeignKey,
                references_table: row.get_string(1),
                update_rule: row.get_string(4),
                delete_rule: row.get_string(5),
                match_option: match row.get_string(6).as_str() {
                    "NONE" => String::new(),
                    other => other.to_string(),
                },
                ..Default::default()
            });
            fk.columns.push(row.get_string(2));
            // NULL "to" means the parent's primary key; resolved below.
            fk.references_columns.push(row.get_string(3));
        }
        table.constraints.extend(fks.into_values());

        for row in &index_sql {
            let index_name = row.get_string(0);
            if index_list
                .iter()
                .any(|i| i.get_string(0) == index_name && i.get_string(2) != "c")
            {
                continue;
            }
            let create = row.get_string(1);
            table.indexes.push(parse_create_index(&index_name, &create));
        }

        for row in &triggers {
            table.triggers.push(Trigger {
                name: row.get_string(0),
                sql: row.get_string(1),
                ..Default::default()
            });
        }
    }

    let mut catalog = b.finish();
    resolve_implicit_references(&mut catalog);

    let sql = "SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY rowid";
    for row in session.query(sql, &[]).await? {
        catalog.schema_mut(MAIN).views.push(View {
            schema: MAIN.to_string(),
            name: row.get_string(0),
            sql: row.get_string(1),
            ..Default::default()
        });
    }

    Ok(catalog)
}

/// Fill foreign-key target columns that default to the parent's primary key.
fn resolve_implicit_references(catalog: &mut Catalog) {
    let pks: BTreeMap<String, Vec<String>> = catalog
        .tables()
        .map(|t| (t.name.to_ascii_lowercase(), t.primary_key_columns()))
        .collect();
    for schema in &mut catalog.schemas {
        for table in &mut schema.tables {
            for fk in &mut table.constraints {
                if fk.kind != ConstraintKind::ForeignKey
                    || !fk.references_columns.iter().any(String::is_empty)
                {
                    continue;
                }
                if let Some(parent) = pks.get(&fk.references_table.to_ascii_lowercase()) {
                    if parent.len() == fk.columns.len() {
                        fk.references_columns = parent.clone();
                    }
                }
            }
        }
    }
}

/// Parse `CREATE [UNIQUE] INDEX name ON table (cols) [WHERE pred]`.
pub(crate) fn parse_create_index(name: &str, create: &str) -> Index {
    let is_unique = create
        .split_whitespace()
        .nth(1)
        .is_some_and(|w| w.eq_ignore_ascii_case("UNIQUE"));
    let mut index = Index {
        name: name.to_string(),
        is_unique,
        ..Default::default()
    };
    let Some(on) = find_keyword(create, "ON") else {
        return index;
    };
    let rest = &create[on..];
    let Some(open) = rest.find('(') else {
        return index;
    };
    let Some(close) = matching_paren(rest, open) else {
        return index;
    };
    index.columns = split_top_level(&rest[open + 1..close])
        .into_iter()
        .map(|c| unquote(&c))
        .collect();
    let tail = &rest[close + 1..];
    if let Some(pos) = find_keyword(tail, "WHERE") {
        index.predicate = tail[pos + "WHERE".len()..].trim().trim_end_matches(';').to_string();
    }
    index
}

/// Text inside the outermost parentheses of a CREATE TABLE statement.
fn table_body(sql: &str) -> Option<&str> {
    let open = sql.find('(')?;
    let close = matching_paren(sql, open)?;
    Some(&sql[open + 1..close])
}

/// Index of the parenthesis closing the one at `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside parentheses and quotes.
pub(crate) fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(s[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last.to_string());
    }
    parts
}

/// Byte offset of `keyword` as a whole word outside quotes and parentheses.
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let upper = s.to_ascii_uppercase();
    let kw = keyword.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => quote = Some(c),
            b'[' => quote = Some(b']'),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && upper[i..].starts_with(&kw) => {
                let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                let end = i + kw.len();
                let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
                if before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Whole-word, case-insensitive occurrence anywhere in `s`.
fn mentions_word(s: &str, word: &str) -> bool {
    let upper = s.to_ascii_uppercase();
    let word = word.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    upper.match_indices(&word).any(|(i, _)| {
        let end = i + word.len();
        (i == 0 || !is_word_byte(bytes[i - 1])) && (end >= bytes.len() || !is_word_byte(bytes[end]))
    })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Contents of the parentheses following `keyword`.
fn keyword_parens(s: &str, keyword: &str) -> Option<String> {
    let pos = find_keyword(s, keyword)?;
    let rest = &s[pos + keyword.len()..];
    let open = rest.find('(')?;
    if !rest[..open].trim().is_empty() {
        return None;
    }
    let close = matching_paren(rest, open)?;
    Some(rest[open + 1..close].trim().to_string())
}

/// The word following `keyword`.
fn keyword_word(s: &str, keyword: &str) -> Option<String> {
    let pos = find_keyword(s, keyword)?;
    s[pos + keyword.len()..]
        .split_whitespace()
        .next()
        .map(|w| unquote(w.trim_end_matches(',')))
}

const CONSTRAINT_KEYWORDS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Column name of a column definition; `None` for table constraints.
fn column_segment_name(definition: &str) -> Option<String> {
    let (name, quoted) = leading_identifier(definition)?;
    if !quoted && CONSTRAINT_KEYWORDS.contains(&name.to_ascii_uppercase().as_str()) {
        return None;
    }
    Some(name)
}

fn leading_identifier(s: &str) -> Option<(String, bool)> {
    let s = s.trim_start();
    let first = s.chars().next()?;
    let close = match first {
        '"' => '"',
        '`' => '`',
        '[' => ']',
        _ => {
            let end = s
                .find(|c: char| c.is_whitespace() || c == '(')
                .unwrap_or(s.len());
            return Some((s[..end].to_string(), false));
        }
    };
    let mut out = String::new();
    let mut chars = s[1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == close {
            if chars.peek() == Some(&close) && close != ']' {
                out.push(c);
                chars.next();
                continue;
            }
            return Some((out, true));
        }
        out.push(c);
    }
    None
}

/// Drop a leading `CONSTRAINT name`.
fn skip_constraint_name(definition: &str) -> &str {
    let trimmed = definition.trim_start();
    if !trimmed.to_ascii_uppercase().starts_with("CONSTRAINT") {
        return trimmed;
    }
    let rest = trimmed["CONSTRAINT".len()..].trim_start();
    match leading_identifier(rest) {
        Some((name, quoted)) => {
            let consumed = if quoted { name.len() + 2 } else { name.len() };
            rest.get(consumed..).unwrap_or("").trim_start()
        }
        None => rest,
    }
}

/// Strip quotes from a plain quoted identifier; expressions pass through.
fn unquote(s: &str) -> String {
    let s = s.trim();
    match leading_identifier(s) {
        Some((name, true)) if s.len() == name.len() + 2 => name,
        _ => s.to_string(),
    }
}
