//! DDL rendering shared by the diff engines, the dumper and wipe.

use crate::core::catalog::{Column, Constraint, ConstraintKind, Domain, Enum, Index, Table};
use crate::core::dialect::Dialect;
use crate::core::identifier::{qualify, quote_always, quote_identifier, quote_literal};
use crate::core::normalize::is_literal_default;

/// Renders statements for one dialect relative to a current schema.
#[derive(Debug, Clone)]
pub struct Ddl {
    pub dialect: Dialect,
    pub current_schema: String,
}

impl Ddl {
    pub fn new(dialect: Dialect, current_schema: &str) -> Self {
        Self {
            dialect,
            current_schema: current_schema.to_string(),
        }
    }

    pub fn ident(&self, name: &str) -> String {
        quote_identifier(self.dialect, name)
    }

    pub fn name(&self, schema: &str, name: &str) -> String {
        qualify(self.dialect, schema, name, &self.current_schema)
    }

    pub fn table_name(&self, table: &Table) -> String {
        self.name(&table.schema, &table.name)
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Index entries may be expressions or already-quoted names; only bare
    /// identifiers get quoted.
    pub fn index_column(&self, entry: &str) -> String {
        let bare = !entry.is_empty()
            && entry
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '$');
        if bare {
            return self.ident(entry);
        }
        // "col DESC" / "col ASC"
        if let Some((col, order)) = entry.rsplit_once(' ') {
            let order_upper = order.to_ascii_uppercase();
            if (order_upper == "DESC" || order_upper == "ASC")
                && !col.is_empty()
                && col.chars().all(|c| c.is_alphanumeric() || c == '_')
            {
                return format!("{} {}", self.ident(col), order_upper);
            }
        }
        entry.to_string()
    }

    fn collate(&self, collation: &str) -> String {
        match self.dialect {
            Dialect::Postgres => format!(" COLLATE {}", quote_always(self.dialect, collation)),
            _ => format!(" COLLATE {}", collation),
        }
    }

    fn default_clause(&self, default: &str) -> String {
        let d = default.trim();
        let needs_parens = self.dialect == Dialect::Sqlite
            && !d.starts_with('(')
            && !is_literal_default(d)
            && !d.to_ascii_uppercase().starts_with("CURRENT_");
        if needs_parens {
            format!(" DEFAULT ({})", d)
        } else {
            format!(" DEFAULT {}", d)
        }
    }

    /// Column definition as used in CREATE TABLE and ADD COLUMN.
    pub fn column(&self, column: &Column) -> String {
        let mut out = self.ident(&column.name);
        if self.dialect == Dialect::SqlServer && column.is_generated {
            out.push_str(&format!(" AS ({})", column.generated_expr));
            if column.generated_kind.eq_ignore_ascii_case("STORED") {
                out.push_str(" PERSISTED");
            }
            return out;
        }

        out.push(' ');
        out.push_str(&column.column_type);
        if !column.collation.is_empty() {
            out.push_str(&self.collate(&column.collation));
        }

        if column.is_generated {
            let kind = if column.generated_kind.is_empty() {
                "VIRTUAL"
            } else {
                column.generated_kind.as_str()
            };
            let kind = if self.dialect == Dialect::Postgres { "STORED" } else { kind };
            out.push_str(&format!(" GENERATED ALWAYS AS ({}) {}", column.generated_expr, kind));
            if column.is_not_null {
                out.push_str(" NOT NULL");
            }
            return out;
        }

        match self.dialect {
            Dialect::Postgres => {
                if !column.default.is_empty() && column.identity.is_empty() {
                    out.push_str(&self.default_clause(&column.default));
                }
                if column.is_not_null {
                    out.push_str(" NOT NULL");
                }
                if !column.identity.is_empty() {
                    out.push(' ');
                    out.push_str(&column.identity);
                }
            }
            Dialect::Mysql => {
                if column.is_not_null {
                    out.push_str(" NOT NULL");
                }
                if !column.default.is_empty() {
                    out.push_str(&self.default_clause(&column.default));
                }
                if !column.identity.is_empty() {
                    out.push_str(" AUTO_INCREMENT");
                }
            }
            Dialect::SqlServer => {
                if !column.identity.is_empty() {
                    out.push(' ');
                    out.push_str(&column.identity);
                }
                out.push_str(if column.is_not_null { " NOT NULL" } else { " NULL" });
                if !column.default.is_empty() {
                    out.push_str(&self.default_clause(&column.default));
                }
            }
            Dialect::Sqlite => {
                if !column.identity.is_empty() {
                    out.push_str(" PRIMARY KEY AUTOINCREMENT");
                }
                if !column.default.is_empty() {
                    out.push_str(&self.default_clause(&column.default));
                }
                if column.is_not_null {
                    out.push_str(" NOT NULL");
                }
            }
        }
        out
    }

    /// `REFERENCES parent (cols)` with its referential actions.
    pub fn references(&self, c: &Constraint) -> String {
        let mut out = format!(
            "REFERENCES {} ({})",
            self.name(&c.references_schema, &c.references_table),
            self.column_list(&c.references_columns)
        );
        if self.dialect == Dialect::Postgres && c.match_option.eq_ignore_ascii_case("FULL") {
            out.push_str(" MATCH FULL");
        }
        for (keyword, rule) in [("UPDATE", &c.update_rule), ("DELETE", &c.delete_rule)] {
            if !is_default_rule(rule) {
                out.push_str(&format!(" ON {} {}", keyword, rule.to_ascii_uppercase()));
            }
        }
        if c.is_deferrable && matches!(self.dialect, Dialect::Postgres | Dialect::Sqlite) {
            out.push_str(" DEFERRABLE");
            if c.is_initially_deferred {
                out.push_str(" INITIALLY DEFERRED");
            }
        }
        out
    }

    /// Body of a constraint without its name.
    pub fn constraint_body(&self, c: &Constraint) -> String {
        match c.kind {
            ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
                let clustered = if self.dialect == Dialect::SqlServer
                    && c.kind == ConstraintKind::PrimaryKey
                {
                    " CLUSTERED"
                } else {
                    ""
                };
                format!("{}{} ({})", c.kind.keyword(), clustered, self.column_list(&c.columns))
            }
            ConstraintKind::ForeignKey => format!(
                "FOREIGN KEY ({}) {}",
                self.column_list(&c.columns),
                self.references(c)
            ),
            ConstraintKind::Check => format!("CHECK ({})", c.check_expr),
            ConstraintKind::Exclude => format!("EXCLUDE {}", c.exclusion_expr),
        }
    }

    /// Constraint clause for CREATE TABLE or ADD. SQLite constraints and the
    /// MySQL primary key stay anonymous.
    pub fn constraint(&self, c: &Constraint) -> String {
        let anonymous = self.dialect == Dialect::Sqlite
            || c.name.is_empty()
            || (self.dialect == Dialect::Mysql && c.kind == ConstraintKind::PrimaryKey);
        if anonymous {
            self.constraint_body(c)
        } else {
            format!("CONSTRAINT {} {}", self.ident(&c.name), self.constraint_body(c))
        }
    }

    /// CREATE TABLE, optionally with foreign keys inline.
    pub fn create_table(&self, table: &Table, name: &str, with_foreign_keys: bool) -> String {
        let inline_pk = self.dialect == Dialect::Sqlite
            && table.columns.iter().any(|c| !c.ignore && !c.identity.is_empty());
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !c.ignore)
            .map(|c| self.column(c))
            .collect();
        for c in table.constraints.iter().filter(|c| !c.ignore) {
            if c.kind == ConstraintKind::ForeignKey && !with_foreign_keys {
                continue;
            }
            if c.kind == ConstraintKind::PrimaryKey && inline_pk {
                continue;
            }
            lines.push(self.constraint(c));
        }
        format!("CREATE TABLE {} (\n    {}\n);\n", name, lines.join(",\n    "))
    }

    pub fn drop_table(&self, table: &Table) -> String {
        format!("DROP TABLE {};\n", self.table_name(table))
    }

    pub fn add_constraint(&self, table: &Table, c: &Constraint) -> String {
        format!("ALTER TABLE {} ADD {};\n", self.table_name(table), self.constraint(c))
    }

    pub fn drop_constraint(&self, table: &Table, c: &Constraint) -> String {
        let t = self.table_name(table);
        if self.dialect == Dialect::Mysql {
            return match c.kind {
                ConstraintKind::PrimaryKey => format!("ALTER TABLE {} DROP PRIMARY KEY;\n", t),
                ConstraintKind::ForeignKey => {
                    format!("ALTER TABLE {} DROP FOREIGN KEY {};\n", t, self.ident(&c.name))
                }
                ConstraintKind::Unique => {
                    format!("ALTER TABLE {} DROP INDEX {};\n", t, self.ident(&c.name))
                }
                _ => format!("ALTER TABLE {} DROP CHECK {};\n", t, self.ident(&c.name)),
            };
        }
        format!("ALTER TABLE {} DROP CONSTRAINT {};\n", t, self.ident(&c.name))
    }

    /// Index definition after `CREATE [UNIQUE] INDEX name ON`.
    fn index_target(&self, index: &Index) -> String {
        // SQLite wants the bare table name after ON.
        let table = match self.dialect {
            Dialect::Sqlite => self.ident(&index.table),
            _ => self.name(&index.schema, &index.table),
        };
        let columns = index
            .columns
            .iter()
            .map(|c| self.index_column(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut out = match self.dialect {
            Dialect::Postgres if !index.using.is_empty() => {
                format!("{} USING {} ({})", table, index.using.to_lowercase(), columns)
            }
            Dialect::Mysql if index.using.eq_ignore_ascii_case("HASH") => {
                format!("{} ({}) USING HASH", table, columns)
            }
            _ => format!("{} ({})", table, columns),
        };
        if !index.include.is_empty() && matches!(self.dialect, Dialect::Postgres | Dialect::SqlServer) {
            out.push_str(&format!(" INCLUDE ({})", self.column_list(&index.include)));
        }
        if !index.predicate.is_empty()
            && matches!(self.dialect, Dialect::Postgres | Dialect::Sqlite | Dialect::SqlServer)
        {
            out.push_str(&format!(" WHERE {}", index.predicate));
        }
        out
    }

    /// `CREATE INDEX`, with `CONCURRENTLY` on Postgres when asked.
    pub fn create_index(&self, index: &Index, concurrently: bool) -> String {
        let mut head = String::from("CREATE ");
        if index.is_unique {
            head.push_str("UNIQUE ");
        }
        match self.dialect {
            Dialect::Mysql => {
                let using = index.using.to_ascii_uppercase();
                if using == "FULLTEXT" || using == "SPATIAL" {
                    head.push_str(&using);
                    head.push(' ');
                }
            }
            Dialect::SqlServer => {
                if index.using.to_ascii_uppercase().starts_with("CLUSTERED") {
                    head.push_str("CLUSTERED ");
                }
            }
            _ => {}
        }
        head.push_str("INDEX ");
        if concurrently && self.dialect == Dialect::Postgres {
            head.push_str("CONCURRENTLY ");
        }
        // Postgres and SQLite index names live in the schema; the others are per table.
        let name = match self.dialect {
            Dialect::Sqlite => self.name(&index.schema, &index.name),
            _ => self.ident(&index.name),
        };
        format!("{}{} ON {};\n", head, name, self.index_target(index))
    }

    pub fn drop_index(&self, index: &Index, concurrently: bool) -> String {
        match self.dialect {
            Dialect::Postgres => format!(
                "DROP INDEX {}{};\n",
                if concurrently { "CONCURRENTLY IF EXISTS " } else { "" },
                self.name(&index.schema, &index.name)
            ),
            Dialect::Sqlite => format!("DROP INDEX {};\n", self.name(&index.schema, &index.name)),
            Dialect::Mysql | Dialect::SqlServer => format!(
                "DROP INDEX {} ON {};\n",
                self.ident(&index.name),
                self.name(&index.schema, &index.table)
            ),
        }
    }

    pub fn create_enum(&self, e: &Enum) -> String {
        let labels = e
            .labels
            .iter()
            .map(|l| quote_literal(self.dialect, l))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TYPE {} AS ENUM ({});\n", self.name(&e.schema, &e.name), labels)
    }

    pub fn create_domain(&self, d: &Domain) -> String {
        let mut out = format!(
            "CREATE DOMAIN {} AS {}",
            self.name(&d.schema, &d.name),
            d.underlying_type
        );
        if !d.collation.is_empty() {
            out.push_str(&self.collate(&d.collation));
        }
        if !d.default.is_empty() {
            out.push_str(&format!(" DEFAULT {}", d.default));
        }
        if d.is_not_null {
            out.push_str(" NOT NULL");
        }
        for check in &d.check_exprs {
            out.push_str(&format!(" CHECK ({})", check));
        }
        out.push_str(";\n");
        out
    }
}

/// `""` and `NO ACTION` mean the same thing for referential actions.
pub fn is_default_rule(rule: &str) -> bool {
    rule.is_empty() || rule.eq_ignore_ascii_case("NO ACTION")
}

/// Terminate a statement with `;` and a newline.
pub fn statement(sql: &str) -> String {
    let trimmed = sql.trim_end();
    if trimmed.ends_with(';') {
        format!("{}\n", trimmed)
    } else {
        format!("{};\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> Column {
        Column {
            name: name.into(),
            column_type: ty.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_column_definitions_per_dialect() {
        let mut id = col("id", "INT");
        id.is_not_null = true;
        id.identity = "GENERATED BY DEFAULT AS IDENTITY".into();
        assert_eq!(
            Ddl::new(Dialect::Postgres, "public").column(&id),
            "id INT NOT NULL GENERATED BY DEFAULT AS IDENTITY"
        );

        id.identity = "IDENTITY(1,1)".into();
        assert_eq!(Ddl::new(Dialect::SqlServer, "dbo").column(&id), "id INT IDENTITY(1,1) NOT NULL");

        id.identity = "AUTO_INCREMENT".into();
        assert_eq!(Ddl::new(Dialect::Mysql, "").column(&id), "id INT NOT NULL AUTO_INCREMENT");

        let mut created = col("created", "TEXT");
        created.default = "datetime('now')".into();
        assert_eq!(
            Ddl::new(Dialect::Sqlite, "main").column(&created),
            "created TEXT DEFAULT (datetime('now'))"
        );
        created.default = "CURRENT_TIMESTAMP".into();
        assert_eq!(
            Ddl::new(Dialect::Sqlite, "main").column(&created),
            "created TEXT DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_generated_and_collated_columns() {
        let mut full = col("full_name", "TEXT");
        full.is_generated = true;
        full.generated_expr = "first || ' ' || last".into();
        full.generated_kind = "STORED".into();
        assert_eq!(
            Ddl::new(Dialect::Postgres, "public").column(&full),
            "full_name TEXT GENERATED ALWAYS AS (first || ' ' || last) STORED"
        );
        assert_eq!(
            Ddl::new(Dialect::SqlServer, "dbo").column(&full),
            "full_name AS (first || ' ' || last) PERSISTED"
        );

        let mut name = col("name", "TEXT");
        name.collation = "C".into();
        assert_eq!(Ddl::new(Dialect::Postgres, "public").column(&name), "name TEXT COLLATE \"C\"");
        name.collation = "NOCASE".into();
        assert_eq!(Ddl::new(Dialect::Sqlite, "main").column(&name), "name TEXT COLLATE NOCASE");
    }

    #[test]
    fn test_foreign_key_clause() {
        let fk = Constraint {
            name: "film_language_id_fkey".into(),
            kind: ConstraintKind::ForeignKey,
            columns: vec!["language_id".into()],
            references_table: "language".into(),
            references_columns: vec!["language_id".into()],
            update_rule: "CASCADE".into(),
            delete_rule: "NO ACTION".into(),
            ..Default::default()
        };
        assert_eq!(
            Ddl::new(Dialect::Postgres, "public").constraint(&fk),
            "CONSTRAINT film_language_id_fkey FOREIGN KEY (language_id) REFERENCES language (language_id) ON UPDATE CASCADE"
        );
        assert_eq!(
            Ddl::new(Dialect::Sqlite, "main").constraint(&fk),
            "FOREIGN KEY (language_id) REFERENCES language (language_id) ON UPDATE CASCADE"
        );
    }

    #[test]
    fn test_create_table_sqlite_autoincrement_skips_table_pk() {
        let mut id = col("id", "INTEGER");
        id.identity = "AUTOINCREMENT".into();
        id.is_primary_key = true;
        let table = Table {
            name: "t".into(),
            columns: vec![id, col("v", "TEXT")],
            constraints: vec![Constraint {
                name: "t_id_pkey".into(),
                kind: ConstraintKind::PrimaryKey,
                columns: vec!["id".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let ddl = Ddl::new(Dialect::Sqlite, "main");
        assert_eq!(
            ddl.create_table(&table, "t", true),
            "CREATE TABLE t (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    v TEXT\n);\n"
        );
    }

    #[test]
    fn test_create_index_variants() {
        let idx = Index {
            schema: "public".into(),
            table: "film".into(),
            name: "film_title_idx".into(),
            columns: vec!["title".into(), "lower(description)".into()],
            include: vec!["rating".into()],
            predicate: "rating IS NOT NULL".into(),
            using: "gin".into(),
            ..Default::default()
        };
        assert_eq!(
            Ddl::new(Dialect::Postgres, "public").create_index(&idx, true),
            "CREATE INDEX CONCURRENTLY film_title_idx ON film USING gin (title, lower(description)) INCLUDE (rating) WHERE rating IS NOT NULL;\n"
        );

        let ft = Index {
            table: "film_text".into(),
            name: "idx_title".into(),
            columns: vec!["title".into()],
            using: "FULLTEXT".into(),
            ..Default::default()
        };
        let my = Ddl::new(Dialect::Mysql, "");
        assert_eq!(my.create_index(&ft, true), "CREATE FULLTEXT INDEX idx_title ON film_text (title);\n");
        assert_eq!(my.drop_index(&ft, false), "DROP INDEX idx_title ON film_text;\n");

        let desc = Index {
            schema: "dbo".into(),
            table: "t".into(),
            name: "ix".into(),
            columns: vec!["a DESC".into()],
            ..Default::default()
        };
        assert_eq!(
            Ddl::new(Dialect::SqlServer, "dbo").create_index(&desc, false),
            "CREATE INDEX ix ON t (a DESC);\n"
        );
    }

    #[test]
    fn test_mysql_drop_constraint_forms() {
        let table = Table {
            name: "t".into(),
            ..Default::default()
        };
        let my = Ddl::new(Dialect::Mysql, "");
        let pk = Constraint {
            name: "PRIMARY".into(),
            kind: ConstraintKind::PrimaryKey,
            ..Default::default()
        };
        assert_eq!(my.drop_constraint(&table, &pk), "ALTER TABLE t DROP PRIMARY KEY;\n");
        let fk = Constraint {
            name: "t_a_fkey".into(),
            kind: ConstraintKind::ForeignKey,
            ..Default::default()
        };
        assert_eq!(my.drop_constraint(&table, &fk), "ALTER TABLE t DROP FOREIGN KEY t_a_fkey;\n");
    }

    #[test]
    fn test_enum_and_domain() {
        let ddl = Ddl::new(Dialect::Postgres, "public");
        let e = Enum {
            schema: "public".into(),
            name: "mpaa_rating".into(),
            labels: vec!["G".into(), "PG-13".into()],
            ..Default::default()
        };
        assert_eq!(ddl.create_enum(&e), "CREATE TYPE mpaa_rating AS ENUM ('G', 'PG-13');\n");
        let d = Domain {
            schema: "public".into(),
            name: "year".into(),
            underlying_type: "INT".into(),
            check_exprs: vec!["VALUE >= 1901".into()],
            ..Default::default()
        };
        assert_eq!(ddl.create_domain(&d), "CREATE DOMAIN year AS INT CHECK (VALUE >= 1901);\n");
    }
}
