//! SQLite diff.
//!
//! `ALTER TABLE` in SQLite can add a column, drop a column and little else,
//! so anything beyond that rebuilds the table: create `<name>_new` with the
//! destination definition, copy the shared columns, drop the old table and
//! rename the new one into place.

use super::render::statement;
use super::{object_name, ColumnChanges, Changes, Context, FileKind, Files, TablePair};
use crate::core::catalog::{names_equal, Column, Constraint, ConstraintKind, Index, Table};

pub(super) fn diff(cx: &Context<'_>, files: &mut Files) {
    let tables = cx.tables();

    for table in &tables.added {
        let ddl = &cx.ddl;
        let mut sql = ddl.create_table(table, &ddl.table_name(table), true);
        for index in table.indexes.iter().filter(|i| !i.ignore) {
            sql.push_str(&ddl.create_index(index, false));
        }
        for trigger in table.triggers.iter().filter(|t| !t.ignore) {
            sql.push_str(&statement(&trigger.sql));
        }
        files.add(
            "create_table",
            &object_name(cx, &table.schema, &table.name),
            FileKind::Plain,
            sql,
        );
    }

    for pair in &tables.common {
        alter_table(cx, files, pair);
    }

    for table in &tables.dropped {
        files.add(
            "drop_table",
            &object_name(cx, &table.schema, &table.name),
            FileKind::Plain,
            cx.ddl.drop_table(table),
        );
    }
}

fn alter_table(cx: &Context<'_>, files: &mut Files, pair: &TablePair<'_>) {
    let columns = cx.columns(pair);
    let indexes = cx.indexes(pair);
    let constraints = cx.constraints(pair);
    if columns.is_empty() && indexes.is_empty() && constraints.is_empty() {
        return;
    }
    let object = object_name(cx, &pair.dest.schema, &pair.dest.name);

    if !needs_rebuild(cx, pair, &columns, &indexes, &constraints) {
        files.add("alter_table", &object, FileKind::Plain, direct_alter(cx, pair, &columns, &indexes, &constraints));
        return;
    }
    if pair.src.is_virtual || pair.dest.is_virtual {
        cx.warn(
            files,
            format!("virtual table {} differs and cannot be rebuilt; recreate it manually", pair.dest.name),
        );
        return;
    }
    files.add("rebuild_table", &object, FileKind::Plain, rebuild(cx, pair));
}

fn is_added(cx: &Context<'_>, columns: &ColumnChanges<'_>, name: &str) -> bool {
    columns.added.iter().any(|c| names_equal(cx.dialect, &c.name, name))
}

/// A constraint that `ADD COLUMN` can carry inline.
fn inline_on_added_column(cx: &Context<'_>, columns: &ColumnChanges<'_>, c: &Constraint) -> bool {
    matches!(c.kind, ConstraintKind::ForeignKey | ConstraintKind::Check)
        && c.columns.len() == 1
        && is_added(cx, columns, &c.columns[0])
}

fn needs_rebuild(
    cx: &Context<'_>,
    pair: &TablePair<'_>,
    columns: &ColumnChanges<'_>,
    indexes: &Changes<'_, Index>,
    constraints: &Changes<'_, Constraint>,
) -> bool {
    let d = cx.dialect;
    if !columns.altered.is_empty() || !constraints.dropped.is_empty() {
        return true;
    }
    if constraints
        .added
        .iter()
        .any(|c| !inline_on_added_column(cx, columns, c))
    {
        return true;
    }
    // ADD COLUMN cannot add key, identity or stored generated columns, nor a
    // NOT NULL column without a default.
    let unaddable = |c: &&Column| {
        c.is_primary_key
            || !c.identity.is_empty()
            || (c.is_generated && c.generated_kind.eq_ignore_ascii_case("STORED"))
            || (c.is_not_null && c.default.is_empty() && !c.is_generated)
    };
    if columns.added.iter().any(unaddable) {
        return true;
    }
    // DROP COLUMN refuses columns still used by a constraint or a surviving index.
    columns.dropped.iter().any(|col| {
        let mentions = |list: &[String]| list.iter().any(|n| names_equal(d, n, &col.name));
        pair.src.constraints.iter().any(|c| mentions(&c.columns))
            || pair.src.indexes.iter().any(|i| {
                mentions(&i.columns) && !indexes.dropped.iter().any(|x| names_equal(d, &x.name, &i.name))
            })
    })
}

fn direct_alter(
    cx: &Context<'_>,
    pair: &TablePair<'_>,
    columns: &ColumnChanges<'_>,
    indexes: &Changes<'_, Index>,
    constraints: &Changes<'_, Constraint>,
) -> String {
    let ddl = &cx.ddl;
    let d = cx.dialect;
    let table = ddl.table_name(pair.dest);
    let mut sql = String::new();

    for index in &indexes.dropped {
        sql.push_str(&ddl.drop_index(index, false));
    }
    for column in &columns.added {
        let mut def = ddl.column(column);
        for c in constraints
            .added
            .iter()
            .filter(|c| names_equal(d, &c.columns[0], &column.name))
        {
            match c.kind {
                ConstraintKind::ForeignKey => {
                    def.push(' ');
                    def.push_str(&ddl.references(c));
                }
                _ => def.push_str(&format!(" CHECK ({})", c.check_expr)),
            }
        }
        sql.push_str(&format!("ALTER TABLE {} ADD COLUMN {};\n", table, def));
    }
    for column in &columns.dropped {
        sql.push_str(&format!("ALTER TABLE {} DROP COLUMN {};\n", table, ddl.ident(&column.name)));
    }
    for index in &indexes.added {
        sql.push_str(&ddl.create_index(index, false));
    }
    sql
}

/// The table as it should look after the rebuild. Without `drop_objects`,
/// source-only columns, constraints and indexes are carried over.
fn rebuilt_definition(cx: &Context<'_>, pair: &TablePair<'_>) -> Table {
    let d = cx.dialect;
    let mut table = pair.dest.clone();
    table.columns.retain(|c| !c.ignore);
    if cx.drop_objects() {
        return table;
    }
    for col in pair.src.columns.iter().filter(|c| !c.ignore) {
        if pair.dest.find_column(d, &col.name).is_none() {
            table.columns.push(col.clone());
        }
    }
    for c in pair.src.constraints.iter().filter(|c| !c.ignore) {
        let present = pair
            .dest
            .constraints
            .iter()
            .any(|x| x.kind == c.kind && names_equal(d, &x.name, &c.name));
        if !present {
            table.constraints.push(c.clone());
        }
    }
    for i in pair.src.indexes.iter().filter(|i| !i.ignore) {
        if !pair.dest.indexes.iter().any(|x| names_equal(d, &x.name, &i.name)) {
            table.indexes.push(i.clone());
        }
    }
    table
}

fn rebuild(cx: &Context<'_>, pair: &TablePair<'_>) -> String {
    let d = cx.dialect;
    let ddl = &cx.ddl;
    let table = rebuilt_definition(cx, pair);
    let old_name = ddl.table_name(&table);
    let new_name = ddl.name(&table.schema, &format!("{}_new", table.name));

    let copied: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !c.is_generated)
        .filter(|c| {
            pair.src
                .find_column(d, &c.name)
                .is_some_and(|s| !s.is_generated && !s.ignore)
        })
        .map(|c| ddl.ident(&c.name))
        .collect();

    let mut sql = String::from("PRAGMA legacy_alter_table = ON;\n");
    sql.push_str(&ddl.create_table(&table, &new_name, true));
    if !copied.is_empty() {
        let list = copied.join(", ");
        sql.push_str(&format!(
            "INSERT INTO {} ({}) SELECT {} FROM {};\n",
            new_name, list, list, old_name
        ));
    }
    sql.push_str(&format!("DROP TABLE {};\n", old_name));
    sql.push_str(&format!(
        "ALTER TABLE {} RENAME TO {};\n",
        new_name,
        ddl.ident(&table.name)
    ));
    for index in table.indexes.iter().filter(|i| !i.ignore) {
        sql.push_str(&ddl.create_index(index, false));
    }
    // Declarative catalogs may not carry triggers; keep the live ones then.
    let triggers = if pair.dest.triggers.is_empty() {
        &pair.src.triggers
    } else {
        &pair.dest.triggers
    };
    for trigger in triggers.iter().filter(|t| !t.ignore && !t.sql.is_empty()) {
        sql.push_str(&statement(&trigger.sql));
    }
    sql.push_str("PRAGMA legacy_alter_table = OFF;\n");
    sql
}

#[cfg(test)]
mod tests {
    use crate::core::catalog::{Constraint, ConstraintKind, Index, Trigger};
    use crate::core::dialect::Dialect;
    use crate::diff::diff;
    use crate::diff::tests::{column, fk, opts, sample};

    fn film_mut(c: &mut crate::core::catalog::Catalog) -> &mut crate::core::catalog::Table {
        c.schemas[0]
            .tables
            .iter_mut()
            .find(|t| t.name == "film")
            .unwrap()
    }

    #[test]
    fn test_add_column_and_index_is_direct() {
        let src = sample(Dialect::Sqlite);
        let mut dest = sample(Dialect::Sqlite);
        let film = film_mut(&mut dest);
        film.columns.push(column("rating", "TEXT"));
        film.indexes.push(Index {
            name: "film_rating_idx".into(),
            table: "film".into(),
            columns: vec!["rating".into()],
            ..Default::default()
        });
        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(out.filenames(), vec!["m_01_alter_table_film.sql"]);
        assert_eq!(
            out.migrations[0].sql,
            "ALTER TABLE film ADD COLUMN rating TEXT;\nCREATE INDEX film_rating_idx ON film (rating);\n"
        );
    }

    #[test]
    fn test_added_column_with_foreign_key_is_inline() {
        let src = sample(Dialect::Sqlite);
        let mut dest = sample(Dialect::Sqlite);
        let film = film_mut(&mut dest);
        film.columns.push(column("original_language_id", "INT"));
        film.constraints
            .push(fk("film", "original_language_id", "language", "language_id"));
        dest.normalize_names();
        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(
            out.migrations[0].sql,
            "ALTER TABLE film ADD COLUMN original_language_id INT REFERENCES language (language_id);\n"
        );
    }

    #[test]
    fn test_type_change_rebuilds() {
        let mut src = sample(Dialect::Sqlite);
        film_mut(&mut src).triggers.push(Trigger {
            name: "film_touch".into(),
            sql: "CREATE TRIGGER film_touch AFTER UPDATE ON film BEGIN SELECT 1; END".into(),
            ..Default::default()
        });
        let mut dest = sample(Dialect::Sqlite);
        film_mut(&mut dest).columns[1].column_type = "TEXT".into();

        let out = diff(&src, &dest, &opts(true)).unwrap();
        assert_eq!(out.filenames(), vec!["m_01_rebuild_table_film.sql"]);
        let sql = &out.migrations[0].sql;
        assert!(sql.starts_with("PRAGMA legacy_alter_table = ON;\nCREATE TABLE film_new (\n"));
        assert!(sql.contains("    title TEXT,\n"));
        assert!(sql.contains(
            "INSERT INTO film_new (film_id, title, language_id) SELECT film_id, title, language_id FROM film;\n\
             DROP TABLE film;\nALTER TABLE film_new RENAME TO film;\n\
             CREATE INDEX film_title_idx ON film (title);\n"
        ));
        assert!(sql.contains("CREATE TRIGGER film_touch AFTER UPDATE ON film BEGIN SELECT 1; END;\n"));
        assert!(sql.ends_with("PRAGMA legacy_alter_table = OFF;\n"));
    }

    #[test]
    fn test_new_unique_constraint_rebuilds() {
        let src = sample(Dialect::Sqlite);
        let mut dest = sample(Dialect::Sqlite);
        film_mut(&mut dest).constraints.push(Constraint {
            kind: ConstraintKind::Unique,
            columns: vec!["title".into()],
            ..Default::default()
        });
        dest.normalize_names();
        let out = diff(&src, &dest, &opts(false)).unwrap();
        assert_eq!(out.filenames(), vec!["m_01_rebuild_table_film.sql"]);
        assert!(out.migrations[0].sql.contains("    UNIQUE (title)\n"));
    }

    #[test]
    fn test_dropped_column_kept_without_drop_objects() {
        let src = sample(Dialect::Sqlite);
        let mut dest = sample(Dialect::Sqlite);
        film_mut(&mut dest).columns.retain(|c| c.name != "title");
        film_mut(&mut dest).indexes.clear();

        assert!(diff(&src, &dest, &opts(false)).unwrap().is_empty());

        let out = diff(&src, &dest, &opts(true)).unwrap();
        assert_eq!(
            out.migrations[0].sql,
            "DROP INDEX film_title_idx;\nALTER TABLE film DROP COLUMN title;\n"
        );
    }

    #[test]
    fn test_create_and_drop_tables() {
        let src = sample(Dialect::Sqlite);
        let mut dest = sample(Dialect::Sqlite);
        dest.schemas[0].tables.retain(|t| t.name != "film");
        dest.schemas[0].tables.push(crate::diff::tests::table(
            "main",
            "actor",
            vec![crate::diff::tests::pk_column("actor_id", "INTEGER")],
        ));
        dest.normalize_names();

        let out = diff(&src, &dest, &opts(true)).unwrap();
        assert_eq!(
            out.filenames(),
            vec!["m_01_create_table_actor.sql", "m_02_drop_table_film.sql"]
        );
        assert_eq!(
            out.migrations[0].sql,
            "CREATE TABLE actor (\n    actor_id INTEGER NOT NULL,\n    PRIMARY KEY (actor_id)\n);\n"
        );
        assert_eq!(out.migrations[1].sql, "DROP TABLE film;\n");
    }
}
