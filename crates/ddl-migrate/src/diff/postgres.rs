//! Postgres diff.
//!
//! Files are emitted in phases: drop foreign keys, create/drop schemas, types
//! and tables, one alter file per table, then foreign keys (plain for new
//! tables, `NOT VALID` + `VALIDATE` for existing ones), then the deferred
//! NOT NULL validations. Index builds on live tables run `CONCURRENTLY`
//! outside a transaction, each with an undo script.

use std::collections::HashSet;

use super::{object_name, AlteredColumn, Context, FileKind, Files, PairBuckets, TablePair};
use crate::core::catalog::{names_equal, Catalog, Constraint, ConstraintKind, Domain, Enum, Table};
use crate::core::dialect::Dialect;
use crate::core::identifier::{generate_name, quote_always, quote_literal, NameKind};
use crate::core::normalize::{
    is_literal_default, normalize_column_type, normalize_default, normalize_expression, ColumnType,
};

pub(super) fn diff(cx: &Context<'_>, files: &mut Files) {
    let tables = cx.tables();
    let ddl = &cx.ddl;
    let key = |t: &Table| object_name(cx, &t.schema, &t.name);
    let ref_key = |c: &Constraint| {
        let schema = if c.references_schema.is_empty() {
            c.schema.as_str()
        } else {
            c.references_schema.as_str()
        };
        object_name(cx, schema, &c.references_table)
    };

    // Phase 1: foreign keys that go away or change.
    let mut drop_fkeys = PairBuckets::default();
    for pair in &tables.common {
        for c in cx.constraints(pair).dropped {
            if c.kind == ConstraintKind::ForeignKey {
                drop_fkeys.push(&key(pair.src), &ref_key(c), &ddl.drop_constraint(pair.src, c));
            }
        }
    }
    for table in &tables.dropped {
        for c in table.foreign_keys() {
            drop_fkeys.push(&key(table), &ref_key(c), &ddl.drop_constraint(table, c));
        }
    }
    drop_fkeys.emit(files, "drop_fkeys", FileKind::Plain);

    // Phase 2: schemas, types, tables.
    create_schemas_and_types(cx, files);
    for table in &tables.dropped {
        files.add("drop_table", &key(table), FileKind::Plain, ddl.drop_table(table));
    }
    for table in &tables.added {
        let mut sql = ddl.create_table(table, &ddl.table_name(table), false);
        for index in table.indexes.iter().filter(|i| !i.ignore) {
            sql.push_str(&ddl.create_index(index, false));
        }
        files.add("create_table", &key(table), FileKind::Plain, sql);
    }

    // Phase 3: per-table alters.
    let mut altered: HashSet<String> = HashSet::new();
    let mut validations: Vec<(String, String)> = Vec::new();
    for pair in &tables.common {
        if alter_table(cx, files, pair, &mut validations) {
            altered.insert(key(pair.dest));
        }
    }

    // Phase 4 and 5: foreign keys.
    let added: HashSet<String> = tables.added.iter().map(|t| key(t)).collect();
    let mut fast = PairBuckets::default();
    let mut slow = PairBuckets::default();
    let new_fkeys = tables
        .added
        .iter()
        .flat_map(|t| t.foreign_keys().map(move |c| (*t, c)));
    let changed_fkeys = tables.common.iter().flat_map(|pair| {
        cx.constraints(pair)
            .added
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
            .map(move |c| (pair.dest, c))
    });
    for (table, c) in new_fkeys.chain(changed_fkeys) {
        let from = key(table);
        let to = ref_key(c);
        // New, empty table pointing at a table this diff leaves untouched.
        let is_fast = added.contains(&from) && (added.contains(&to) || !altered.contains(&to));
        if is_fast {
            fast.push(&from, &to, &ddl.add_constraint(table, c));
        } else {
            let t = ddl.table_name(table);
            slow.push(
                &from,
                &to,
                &format!(
                    "ALTER TABLE {} ADD {} NOT VALID;\nALTER TABLE {} VALIDATE CONSTRAINT {};\n",
                    t,
                    ddl.constraint(c),
                    t,
                    ddl.ident(&c.name)
                ),
            );
        }
    }
    fast.emit(files, "add_fkeys", FileKind::Plain);
    slow.emit(files, "add_fkeys", FileKind::Plain);

    for (object, sql) in validations {
        files.add("validate_not_null", &object, FileKind::Tx, sql);
    }

    drop_schemas_and_types(cx, files);
}

fn find_enum<'a>(catalog: &'a Catalog, schema: &str, name: &str) -> Option<&'a Enum> {
    catalog
        .find_schema(schema)?
        .enums
        .iter()
        .find(|e| e.name == name)
}

fn find_domain<'a>(catalog: &'a Catalog, schema: &str, name: &str) -> Option<&'a Domain> {
    catalog
        .find_schema(schema)?
        .domains
        .iter()
        .find(|d| d.name == name)
}

fn enum_schema<'a>(schema_name: &'a str, e: &'a Enum) -> &'a str {
    if e.schema.is_empty() {
        schema_name
    } else {
        &e.schema
    }
}

fn create_schemas_and_types(cx: &Context<'_>, files: &mut Files) {
    let ddl = &cx.ddl;
    for schema in cx.dest.schemas.iter().filter(|s| !s.ignore) {
        let name = cx.dest.schema_name(&schema.name);
        let exists = cx.src.find_schema(name).is_some();
        if !exists && !name.is_empty() && !names_equal(cx.dialect, name, &cx.src.current_schema) {
            files.add(
                "create_schema",
                name,
                FileKind::Plain,
                format!("CREATE SCHEMA IF NOT EXISTS {};\n", ddl.ident(name)),
            );
        }
    }

    for schema in cx.dest.schemas.iter().filter(|s| !s.ignore) {
        let name = cx.dest.schema_name(&schema.name);
        for e in schema.enums.iter().filter(|e| !e.ignore) {
            let e_schema = enum_schema(name, e);
            let object = object_name(cx, e_schema, &e.name);
            let qualified = Enum {
                schema: e_schema.to_string(),
                ..e.clone()
            };
            match find_enum(cx.src, e_schema, &e.name) {
                None => files.add("create_type", &object, FileKind::Plain, ddl.create_enum(&qualified)),
                Some(existing) => {
                    let mut sql = String::new();
                    for label in e.labels.iter().filter(|l| !existing.labels.contains(l)) {
                        sql.push_str(&format!(
                            "ALTER TYPE {} ADD VALUE IF NOT EXISTS {};\n",
                            ddl.name(e_schema, &e.name),
                            quote_literal(cx.dialect, label)
                        ));
                    }
                    // ADD VALUE cannot run inside a transaction block before Postgres 12.
                    files.add("alter_type", &object, FileKind::TxOff, sql);
                    for label in existing.labels.iter().filter(|l| !e.labels.contains(l)) {
                        cx.warn(
                            files,
                            format!("enum {} no longer lists {:?}; enum labels cannot be removed", e.name, label),
                        );
                    }
                }
            }
        }

        for d in schema.domains.iter().filter(|d| !d.ignore) {
            let d_schema = if d.schema.is_empty() { name } else { d.schema.as_str() };
            let object = object_name(cx, d_schema, &d.name);
            match find_domain(cx.src, d_schema, &d.name) {
                None => {
                    let qualified = Domain {
                        schema: d_schema.to_string(),
                        ..d.clone()
                    };
                    files.add("create_domain", &object, FileKind::Plain, ddl.create_domain(&qualified));
                }
                Some(existing) if !domains_equal(existing, d) => cx.warn(
                    files,
                    format!("domain {} differs; domains are not altered automatically", d.name),
                ),
                Some(_) => {}
            }
        }
    }
}

fn domains_equal(a: &Domain, b: &Domain) -> bool {
    normalize_column_type(Dialect::Postgres, &a.underlying_type)
        == normalize_column_type(Dialect::Postgres, &b.underlying_type)
        && a.is_not_null == b.is_not_null
        && normalize_expression(&a.default) == normalize_expression(&b.default)
        && a.check_exprs.len() == b.check_exprs.len()
        && a.check_exprs
            .iter()
            .zip(&b.check_exprs)
            .all(|(x, y)| normalize_expression(x) == normalize_expression(y))
}

fn drop_schemas_and_types(cx: &Context<'_>, files: &mut Files) {
    if !cx.drop_objects() {
        return;
    }
    let ddl = &cx.ddl;
    for schema in cx.src.schemas.iter().filter(|s| !s.ignore) {
        let name = cx.src.schema_name(&schema.name);
        let kept = cx.dest.find_schema(name);
        if kept.is_some_and(|s| s.ignore) {
            continue;
        }
        let mut sql = String::new();
        for e in schema.enums.iter().filter(|e| !e.ignore) {
            let e_schema = enum_schema(name, e);
            if find_enum(cx.dest, e_schema, &e.name).is_none() {
                sql.push_str(&format!("DROP TYPE {};\n", ddl.name(e_schema, &e.name)));
            }
        }
        for d in schema.domains.iter().filter(|d| !d.ignore) {
            let d_schema = if d.schema.is_empty() { name } else { d.schema.as_str() };
            if find_domain(cx.dest, d_schema, &d.name).is_none() {
                sql.push_str(&format!("DROP DOMAIN {};\n", ddl.name(d_schema, &d.name)));
            }
        }
        if kept.is_none() && !names_equal(cx.dialect, name, &cx.src.current_schema) {
            sql.push_str(&format!("DROP SCHEMA {};\n", ddl.ident(name)));
        }
        files.add("drop_types", name, FileKind::Plain, sql);
    }
}

/// Whether a type change can be made without rewriting or truncating data.
fn is_safe_type_change(from: &ColumnType, to: &ColumnType) -> bool {
    if from == to {
        return true;
    }
    match (from.base.as_str(), to.base.as_str()) {
        ("CIDR", "INET") => true,
        ("VARCHAR", "TEXT") => true,
        ("VARCHAR", "VARCHAR") => match (from.length(), to.length()) {
            (_, None) => true,
            (Some(a), Some(b)) => b >= a,
            (None, Some(_)) => false,
        },
        ("NUMERIC", "NUMERIC") => {
            if to.arg1.is_empty() {
                return true;
            }
            from.arg2 == to.arg2
                && matches!((from.length(), to.length()), (Some(a), Some(b)) if b >= a)
        }
        _ => false,
    }
}

/// Emit the alter file for one table plus its concurrent index pairs.
/// Returns whether anything changed.
fn alter_table(
    cx: &Context<'_>,
    files: &mut Files,
    pair: &TablePair<'_>,
    validations: &mut Vec<(String, String)>,
) -> bool {
    let ddl = &cx.ddl;
    let columns = cx.columns(pair);
    let indexes = cx.indexes(pair);
    let constraints = cx.constraints(pair);
    if columns.is_empty() && indexes.is_empty() && constraints.is_empty() {
        return false;
    }
    let table = ddl.table_name(pair.dest);
    let object = object_name(cx, &pair.dest.schema, &pair.dest.name);
    let mut sql = String::new();

    for index in &indexes.dropped {
        sql.push_str(&ddl.drop_index(index, false));
    }
    for c in constraints
        .dropped
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
    {
        sql.push_str(&ddl.drop_constraint(pair.src, c));
    }
    for column in &columns.dropped {
        sql.push_str(&format!("ALTER TABLE {} DROP COLUMN {};\n", table, ddl.ident(&column.name)));
    }
    for column in &columns.added {
        sql.push_str(&format!("ALTER TABLE {} ADD COLUMN {};\n", table, ddl.column(column)));
    }
    let mut validate = String::new();
    for altered in &columns.altered {
        alter_column(cx, files, pair, altered, &mut sql, &mut validate);
    }

    // Key constraints on live tables are backed by an index built concurrently.
    let mut concurrent: Vec<(String, String, String, Option<String>)> = Vec::new();
    for c in constraints
        .added
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
    {
        match c.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                let name = ddl.ident(&c.name);
                let columns = c.columns.iter().map(|n| ddl.ident(n)).collect::<Vec<_>>().join(", ");
                concurrent.push((
                    c.name.clone(),
                    format!("CREATE UNIQUE INDEX CONCURRENTLY {} ON {} ({});\n", name, table, columns),
                    format!("DROP INDEX CONCURRENTLY IF EXISTS {};\n", ddl.name(&pair.dest.schema, &c.name)),
                    Some(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} {} USING INDEX {};\n",
                        table,
                        name,
                        c.kind.keyword(),
                        name
                    )),
                ));
            }
            _ => sql.push_str(&ddl.add_constraint(pair.dest, c)),
        }
    }
    for index in &indexes.added {
        concurrent.push((
            index.name.clone(),
            ddl.create_index(index, true),
            ddl.drop_index(index, true),
            None,
        ));
    }

    files.add("alter_table", &object, FileKind::Plain, sql);
    for (name, create, undo, attach) in concurrent {
        files.add_with_undo("create_index", &name, create, undo);
        if let Some(attach) = attach {
            files.add("add_constraint", &name, FileKind::Tx, attach);
        }
    }
    if !validate.is_empty() {
        validate_later(validations, &object, validate);
    }
    true
}

fn display_default(d: &str) -> &str {
    if d.is_empty() {
        "none"
    } else {
        d
    }
}

fn validate_later(validations: &mut Vec<(String, String)>, object: &str, sql: String) {
    match validations.iter_mut().find(|(o, _)| o == object) {
        Some((_, buf)) => buf.push_str(&sql),
        None => validations.push((object.to_string(), sql)),
    }
}

fn alter_column(
    cx: &Context<'_>,
    files: &mut Files,
    pair: &TablePair<'_>,
    altered: &AlteredColumn<'_>,
    sql: &mut String,
    validate: &mut String,
) {
    let ddl = &cx.ddl;
    let table = ddl.table_name(pair.dest);
    let (src, dest, delta) = (altered.src, altered.dest, altered.delta);
    let col = ddl.ident(&dest.name);
    let alter = format!("ALTER TABLE {} ALTER COLUMN {}", table, col);

    // Generated expressions cannot be altered in place.
    if delta.generated_changed {
        sql.push_str(&format!("ALTER TABLE {} DROP COLUMN {};\n", table, col));
        sql.push_str(&format!("ALTER TABLE {} ADD COLUMN {};\n", table, ddl.column(dest)));
        return;
    }

    if delta.type_changed || delta.collation_changed {
        let from = normalize_column_type(cx.dialect, &src.column_type);
        let to = normalize_column_type(cx.dialect, &dest.column_type);
        let mut stmt = format!("{} TYPE {}", alter, dest.column_type);
        if !dest.collation.is_empty() {
            stmt.push_str(&format!(" COLLATE {}", quote_always(cx.dialect, &dest.collation)));
        }
        sql.push_str(&stmt);
        sql.push_str(";\n");
        if !is_safe_type_change(&from, &to) {
            cx.warn(
                files,
                format!(
                    "changing {}.{} from {} to {} may rewrite the table or lose data",
                    pair.dest.name, dest.name, src.column_type, dest.column_type
                ),
            );
        }
    }

    if delta.identity_changed {
        if dest.identity.is_empty() {
            sql.push_str(&format!("{} DROP IDENTITY IF EXISTS;\n", alter));
            if !dest.default.is_empty() {
                sql.push_str(&format!("{} SET DEFAULT {};\n", alter, dest.default));
            }
        } else {
            if !src.default.is_empty() {
                sql.push_str(&format!("{} DROP DEFAULT;\n", alter));
            }
            let spelling = dest.identity.trim_start_matches("GENERATED").trim();
            sql.push_str(&format!("{} ADD GENERATED {};\n", alter, spelling));
        }
    } else if delta.default_changed {
        // Expressions may be re-evaluated or own a sequence; only literals are rewritten.
        let literal = |d: &str| is_literal_default(&normalize_default(cx.dialect, d));
        if !literal(&src.default) || !literal(&dest.default) {
            cx.warn(
                files,
                format!(
                    "default of {}.{} differs ({} vs {}) and is not a literal, left unchanged",
                    pair.dest.name,
                    dest.name,
                    display_default(&src.default),
                    display_default(&dest.default)
                ),
            );
        } else if dest.default.is_empty() {
            sql.push_str(&format!("{} DROP DEFAULT;\n", alter));
        } else {
            sql.push_str(&format!("{} SET DEFAULT {};\n", alter, dest.default));
        }
    }

    if delta.null_changed {
        if !dest.is_not_null {
            sql.push_str(&format!("{} DROP NOT NULL;\n", alter));
        } else if cx.src.version_nums.greater_or_equal_to(&[12]) {
            // A validated CHECK lets SET NOT NULL skip its own table scan.
            let check = generate_name(NameKind::Check, &pair.dest.name, &[dest.name.clone(), "not_null".to_string()]);
            let check = ddl.ident(&check);
            sql.push_str(&format!(
                "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({} IS NOT NULL) NOT VALID;\n",
                table, check, col
            ));
            validate.push_str(&format!(
                "ALTER TABLE {table} VALIDATE CONSTRAINT {check};\n{alter} SET NOT NULL;\nALTER TABLE {table} DROP CONSTRAINT {check};\n"
            ));
        } else {
            sql.push_str(&format!("{} SET NOT NULL;\n", alter));
            cx.warn(
                files,
                format!(
                    "setting NOT NULL on {}.{} scans the table under an exclusive lock",
                    pair.dest.name, dest.name
                ),
            );
        }
    }
}
