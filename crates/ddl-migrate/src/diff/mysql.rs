//! MySQL diff.
//!
//! Each existing table gets one `ALTER TABLE` with every change as a clause,
//! so the table is rebuilt at most once. Foreign keys are added in separate
//! files once all referenced tables exist.

use super::render::Ddl;
use super::{object_name, Context, FileKind, Files, TablePair};
use crate::core::catalog::{Constraint, ConstraintKind, Index, Table};
use crate::core::normalize::{normalize_column_type, ColumnType};

/// Longest VARCHAR whose length prefix fits in one byte.
const ONE_BYTE_PREFIX_MAX: u64 = 255;

pub(super) fn diff(cx: &Context<'_>, files: &mut Files) {
    let tables = cx.tables();
    let ddl = &cx.ddl;
    let key = |t: &Table| object_name(cx, &t.schema, &t.name);

    for pair in &tables.common {
        alter_table(cx, files, pair);
    }

    for table in &tables.added {
        let mut sql = ddl.create_table(table, &ddl.table_name(table), false);
        for index in table.indexes.iter().filter(|i| !i.ignore) {
            sql.push_str(&ddl.create_index(index, false));
        }
        files.add("create_table", &key(table), FileKind::Plain, sql);
    }

    let new_fkeys = tables.added.iter().map(|t| (*t, t.foreign_keys().collect::<Vec<_>>()));
    let changed_fkeys = tables.common.iter().map(|pair| {
        let added = cx
            .constraints(pair)
            .added
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
            .collect::<Vec<_>>();
        (pair.dest, added)
    });
    for (table, fkeys) in new_fkeys.chain(changed_fkeys) {
        if fkeys.is_empty() {
            continue;
        }
        let clauses: Vec<String> = fkeys.iter().map(|c| format!("ADD {}", ddl.constraint(c))).collect();
        files.add("add_fkeys", &key(table), FileKind::Plain, alter_statement(ddl, table, &clauses));
    }

    // Foreign keys between dropped tables would block the drops.
    for table in &tables.dropped {
        let clauses: Vec<String> = table
            .foreign_keys()
            .map(|c| format!("DROP FOREIGN KEY {}", ddl.ident(&c.name)))
            .collect();
        if !clauses.is_empty() {
            files.add("drop_fkeys", &key(table), FileKind::Plain, alter_statement(ddl, table, &clauses));
        }
    }
    for table in &tables.dropped {
        files.add("drop_table", &key(table), FileKind::Plain, ddl.drop_table(table));
    }
}

fn alter_statement(ddl: &Ddl, table: &Table, clauses: &[String]) -> String {
    format!("ALTER TABLE {}\n    {};\n", ddl.table_name(table), clauses.join(",\n    "))
}

fn drop_constraint_clause(ddl: &Ddl, c: &Constraint) -> String {
    match c.kind {
        ConstraintKind::PrimaryKey => "DROP PRIMARY KEY".to_string(),
        ConstraintKind::ForeignKey => format!("DROP FOREIGN KEY {}", ddl.ident(&c.name)),
        ConstraintKind::Unique => format!("DROP INDEX {}", ddl.ident(&c.name)),
        _ => format!("DROP CHECK {}", ddl.ident(&c.name)),
    }
}

fn add_index_clause(ddl: &Ddl, index: &Index) -> String {
    let using = index.using.to_ascii_uppercase();
    let kind = match using.as_str() {
        "FULLTEXT" => "FULLTEXT INDEX",
        "SPATIAL" => "SPATIAL INDEX",
        _ if index.is_unique => "UNIQUE INDEX",
        _ => "INDEX",
    };
    let columns = index
        .columns
        .iter()
        .map(|c| ddl.index_column(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut clause = format!("ADD {} {} ({})", kind, ddl.ident(&index.name), columns);
    if using == "HASH" {
        clause.push_str(" USING HASH");
    }
    clause
}

fn alter_table(cx: &Context<'_>, files: &mut Files, pair: &TablePair<'_>) {
    let ddl = &cx.ddl;
    let columns = cx.columns(pair);
    let indexes = cx.indexes(pair);
    let constraints = cx.constraints(pair);

    let mut clauses = Vec::new();
    for c in &constraints.dropped {
        clauses.push(drop_constraint_clause(ddl, c));
    }
    for index in &indexes.dropped {
        clauses.push(format!("DROP INDEX {}", ddl.ident(&index.name)));
    }
    for column in &columns.dropped {
        clauses.push(format!("DROP COLUMN {}", ddl.ident(&column.name)));
    }
    for column in &columns.added {
        clauses.push(format!("ADD COLUMN {}", ddl.column(column)));
    }
    for altered in &columns.altered {
        clauses.push(format!("MODIFY COLUMN {}", ddl.column(altered.dest)));
        if altered.delta.type_changed {
            let from = normalize_column_type(cx.dialect, &altered.src.column_type);
            let to = normalize_column_type(cx.dialect, &altered.dest.column_type);
            if let Some(reason) = type_change_risk(&from, &to) {
                cx.warn(
                    files,
                    format!(
                        "changing {}.{} from {} to {} {}",
                        pair.dest.name, altered.dest.name, altered.src.column_type, altered.dest.column_type, reason
                    ),
                );
            }
        }
    }
    for index in &indexes.added {
        clauses.push(add_index_clause(ddl, index));
    }
    for c in constraints
        .added
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
    {
        clauses.push(format!("ADD {}", ddl.constraint(c)));
    }

    if clauses.is_empty() {
        return;
    }
    files.add(
        "alter_table",
        &object_name(cx, &pair.dest.schema, &pair.dest.name),
        FileKind::Plain,
        alter_statement(ddl, pair.dest, &clauses),
    );
}

/// Why a type change is risky, if it is.
fn type_change_risk(from: &ColumnType, to: &ColumnType) -> Option<&'static str> {
    let varchar = ["VARCHAR", "VARBINARY"];
    if from.is_one_of(&varchar) && from.base == to.base {
        return match (from.length(), to.length()) {
            (Some(a), Some(b)) if b < a => Some("may truncate data"),
            (Some(a), Some(b)) if a <= ONE_BYTE_PREFIX_MAX && b > ONE_BYTE_PREFIX_MAX => {
                Some("crosses the 255-byte length prefix boundary and rebuilds the table")
            }
            _ => None,
        };
    }
    if from.base != to.base {
        return Some("may rebuild the table or lose data");
    }
    match (from.length(), to.length()) {
        (Some(a), Some(b)) if b < a => Some("may truncate data"),
        _ if from.arg2 != to.arg2 => Some("changes the scale and may lose data"),
        _ => None,
    }
}
