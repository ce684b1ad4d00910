//! SQL Server diff.
//!
//! Index builds and key constraints each get their own transactional file.
//! Columns cannot be altered while an index, constraint or default depends on
//! them, so those are dropped first and recreated afterwards. Defaults are
//! anonymous constraints whose names are only known at runtime.

use super::{object_name, Context, FileKind, Files, PairBuckets, TablePair};
use crate::core::catalog::{names_equal, Column, Constraint, ConstraintKind, Index, Table};
use crate::core::dialect::Dialect;
use crate::core::identifier::quote_literal;

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

    for table in &tables.added {
        files.add(
            "create_table",
            &key(table),
            FileKind::Plain,
            ddl.create_table(table, &ddl.table_name(table), false),
        );
        for index in table.indexes.iter().filter(|i| !i.ignore) {
            files.add("create_index", &index.name, FileKind::Tx, ddl.create_index(index, false));
        }
    }

    for pair in &tables.common {
        alter_table(cx, files, pair);
    }

    let mut add_fkeys = PairBuckets::default();
    for table in &tables.added {
        for c in table.foreign_keys() {
            add_fkeys.push(&key(table), &ref_key(c), &ddl.add_constraint(table, c));
        }
    }
    for pair in &tables.common {
        for c in cx.constraints(pair).added {
            if c.kind == ConstraintKind::ForeignKey {
                add_fkeys.push(&key(pair.dest), &ref_key(c), &ddl.add_constraint(pair.dest, c));
            }
        }
    }
    add_fkeys.emit(files, "add_fkeys", FileKind::Plain);

    for table in &tables.dropped {
        files.add("drop_table", &key(table), FileKind::Plain, ddl.drop_table(table));
    }
}

/// Drop a column's default constraint, whatever it was named.
fn drop_default(cx: &Context<'_>, table: &str, column: &str, var: usize) -> String {
    let d = Dialect::SqlServer;
    let v = format!("@default_name_{}", var);
    format!(
        "DECLARE {v} sysname;\n\
         SELECT {v} = dc.name FROM sys.default_constraints dc \
         JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id \
         WHERE dc.parent_object_id = OBJECT_ID({obj}) AND c.name = {col};\n\
         IF {v} IS NOT NULL EXEC({stmt} + QUOTENAME({v}));\n",
        v = v,
        obj = quote_literal(d, table),
        col = quote_literal(d, column),
        stmt = quote_literal(cx.dialect, &format!("ALTER TABLE {} DROP CONSTRAINT ", table)),
    )
}

fn mentions(cx: &Context<'_>, list: &[String], column: &str) -> bool {
    list.iter().any(|entry| {
        let name = entry
            .strip_suffix(" DESC")
            .or_else(|| entry.strip_suffix(" ASC"))
            .unwrap_or(entry)
            .trim_matches(|c| c == '[' || c == ']');
        names_equal(cx.dialect, name, column)
    })
}

fn alter_column_sql(cx: &Context<'_>, table: &str, column: &Column) -> String {
    let mut def = format!(
        "ALTER TABLE {} ALTER COLUMN {} {}",
        table,
        cx.ddl.ident(&column.name),
        column.column_type
    );
    if !column.collation.is_empty() {
        def.push_str(&format!(" COLLATE {}", column.collation));
    }
    def.push_str(if column.is_not_null { " NOT NULL;\n" } else { " NULL;\n" });
    def
}

fn alter_table(cx: &Context<'_>, files: &mut Files, pair: &TablePair<'_>) {
    let ddl = &cx.ddl;
    let d = cx.dialect;
    let columns = cx.columns(pair);
    let indexes = cx.indexes(pair);
    let constraints = cx.constraints(pair);
    if columns.is_empty() && indexes.is_empty() && constraints.is_empty() {
        return;
    }
    let table = ddl.table_name(pair.dest);

    // Columns whose definition is rewritten with ALTER COLUMN.
    let mut rewritten: Vec<&Column> = Vec::new();
    for altered in &columns.altered {
        let delta = altered.delta;
        if delta.identity_changed {
            cx.warn(
                files,
                format!(
                    "identity on {}.{} cannot be changed on an existing column; change omitted",
                    pair.dest.name, altered.dest.name
                ),
            );
        }
        if delta.type_changed || delta.null_changed || delta.collation_changed {
            rewritten.push(altered.src);
        }
    }

    // Dependents of rewritten columns are dropped and recreated from the destination.
    let mut drop_indexes: Vec<&Index> = indexes.dropped.clone();
    let mut create_indexes: Vec<&Index> = indexes.added.clone();
    for col in &rewritten {
        for index in pair.src.indexes.iter().filter(|i| !i.ignore && mentions(cx, &i.columns, &col.name)) {
            if !drop_indexes.iter().any(|x| names_equal(d, &x.name, &index.name)) {
                drop_indexes.push(index);
                if let Some(again) = pair.dest.indexes.iter().find(|x| names_equal(d, &x.name, &index.name)) {
                    if !create_indexes.iter().any(|x| names_equal(d, &x.name, &again.name)) {
                        create_indexes.push(again);
                    }
                }
            }
        }
    }
    let same = |a: &Constraint, b: &Constraint| a.kind == b.kind && names_equal(d, &a.name, &b.name);
    let mut drop_constraints: Vec<&Constraint> = constraints
        .dropped
        .iter()
        .copied()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
        .collect();
    let mut add_constraints: Vec<&Constraint> = constraints
        .added
        .iter()
        .copied()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
        .collect();
    for col in &rewritten {
        for c in pair.src.constraints.iter().filter(|c| {
            !c.ignore && c.kind != ConstraintKind::ForeignKey && mentions(cx, &c.columns, &col.name)
        }) {
            if !drop_constraints.iter().any(|x| same(x, c)) {
                drop_constraints.push(c);
                if let Some(again) = pair.dest.constraints.iter().find(|x| same(x, c)) {
                    if !add_constraints.iter().any(|x| same(x, again)) {
                        add_constraints.push(again);
                    }
                }
            }
        }
    }

    let mut sql = String::new();
    let mut vars = 0;
    for index in &drop_indexes {
        sql.push_str(&ddl.drop_index(index, false));
    }
    for c in &drop_constraints {
        sql.push_str(&ddl.drop_constraint(pair.src, c));
    }
    for column in &columns.dropped {
        if !column.default.is_empty() {
            vars += 1;
            sql.push_str(&drop_default(cx, &table, &column.name, vars));
        }
        sql.push_str(&format!("ALTER TABLE {} DROP COLUMN {};\n", table, ddl.ident(&column.name)));
    }
    for column in &columns.added {
        sql.push_str(&format!("ALTER TABLE {} ADD {};\n", table, ddl.column(column)));
    }
    let mut defaults = String::new();
    for altered in &columns.altered {
        let (src, dest, delta) = (altered.src, altered.dest, altered.delta);
        if delta.generated_changed {
            sql.push_str(&format!("ALTER TABLE {} DROP COLUMN {};\n", table, ddl.ident(&dest.name)));
            sql.push_str(&format!("ALTER TABLE {} ADD {};\n", table, ddl.column(dest)));
            continue;
        }
        let rewrite = rewritten.iter().any(|c| names_equal(d, &c.name, &src.name));
        // A bound default blocks ALTER COLUMN as well.
        let replace_default = delta.default_changed || (rewrite && !src.default.is_empty());
        if replace_default && !src.default.is_empty() {
            vars += 1;
            sql.push_str(&drop_default(cx, &table, &src.name, vars));
        }
        if rewrite {
            sql.push_str(&alter_column_sql(cx, &table, dest));
        }
        if replace_default && !dest.default.is_empty() {
            defaults.push_str(&format!(
                "ALTER TABLE {} ADD DEFAULT {} FOR {};\n",
                table,
                dest.default,
                ddl.ident(&dest.name)
            ));
        }
    }
    sql.push_str(&defaults);

    // Key constraints go to their own files; checks stay inline.
    let mut keyed = Vec::new();
    for c in add_constraints {
        match c.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => keyed.push(c),
            _ => sql.push_str(&ddl.add_constraint(pair.dest, c)),
        }
    }

    files.add(
        "alter_table",
        &object_name(cx, &pair.dest.schema, &pair.dest.name),
        FileKind::Plain,
        sql,
    );
    for c in keyed {
        files.add("add_constraint", &c.name, FileKind::Tx, ddl.add_constraint(pair.dest, c));
    }
    for index in create_indexes {
        files.add("create_index", &index.name, FileKind::Tx, ddl.create_index(index, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::Catalog;
    use crate::diff::diff;
    use crate::diff::tests::{column, opts, sample};

    fn film_mut(c: &mut Catalog) -> &mut Table {
        c.schemas[0]
            .tables
            .iter_mut()
            .find(|t| t.name == "film")
            .unwrap()
    }

    #[test]
    fn test_default_change_uses_runtime_lookup() {
        let mut src = sample(Dialect::SqlServer);
        film_mut(&mut src).columns.push(Column {
            default: "((0))".into(),
            ..column("length", "SMALLINT")
        });
        let mut dest = sample(Dialect::SqlServer);
        film_mut(&mut dest).columns.push(Column {
            default: "120".into(),
            ..column("length", "SMALLINT")
        });

        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(out.filenames(), vec!["m_01_alter_table_film.sql"]);
        let sql = &out.migrations[0].sql;
        assert!(sql.starts_with("DECLARE @default_name_1 sysname;\n"));
        assert!(sql.contains(
            "WHERE dc.parent_object_id = OBJECT_ID(N'film') AND c.name = N'length';\n"
        ));
        assert!(sql.contains(
            "IF @default_name_1 IS NOT NULL EXEC(N'ALTER TABLE film DROP CONSTRAINT ' + QUOTENAME(@default_name_1));\n"
        ));
        assert!(sql.ends_with("ALTER TABLE film ADD DEFAULT 120 FOR length;\n"));
        assert!(!sql.contains("ALTER COLUMN"));
    }

    #[test]
    fn test_identity_add_is_omitted_with_warning() {
        let src = sample(Dialect::SqlServer);
        let mut dest = sample(Dialect::SqlServer);
        film_mut(&mut dest).columns[0].identity = "IDENTITY(1,1)".into();
        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("film.film_id"));
    }

    #[test]
    fn test_type_change_recreates_dependent_index() {
        let src = sample(Dialect::SqlServer);
        let mut dest = sample(Dialect::SqlServer);
        film_mut(&mut dest).columns[1].column_type = "NVARCHAR(300)".into();

        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(
            out.filenames(),
            vec!["m_01_alter_table_film.sql", "m_02_create_index_film_title_idx.tx.sql"]
        );
        assert_eq!(
            out.migrations[0].sql,
            "DROP INDEX film_title_idx ON film;\nALTER TABLE film ALTER COLUMN title NVARCHAR(300) NULL;\n"
        );
        assert_eq!(out.migrations[1].sql, "CREATE INDEX film_title_idx ON film (title);\n");
    }

    #[test]
    fn test_new_unique_constraint_gets_own_file() {
        let src = sample(Dialect::SqlServer);
        let mut dest = sample(Dialect::SqlServer);
        film_mut(&mut dest).constraints.push(Constraint {
            name: "film_title_key".into(),
            kind: ConstraintKind::Unique,
            columns: vec!["title".into()],
            ..Default::default()
        });
        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(out.filenames(), vec!["m_01_add_constraint_film_title_key.tx.sql"]);
        assert_eq!(
            out.migrations[0].sql,
            "ALTER TABLE film ADD CONSTRAINT film_title_key UNIQUE (title);\n"
        );
    }
}
