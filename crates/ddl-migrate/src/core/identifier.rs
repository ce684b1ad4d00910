//! Dialect-aware identifier quoting, literal escaping and constraint naming.
//!
//! Identifiers cannot be bound as statement parameters, so every dynamic name
//! that reaches generated SQL passes through [`quote_identifier`]. Names are
//! quoted only when they have to be, which keeps generated migrations readable:
//! an identifier is quoted when it is empty, starts with a digit, contains a
//! character outside `[a-z0-9_]`, or is a reserved word of the dialect.
//!
//! The pseudo-tables `EXCLUDED`, `INSERTED`, `DELETED`, `NEW` and `OLD` are
//! never quoted, since upsert and trigger bodies reference them bare.

use crate::core::dialect::Dialect;
use crate::error::{MigrateError, Result};

/// Longest name accepted from users and files. Postgres truncates at 63 bytes,
/// MySQL at 64 characters and SQL Server at 128.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Length limit for generated constraint and index names.
pub const MAX_GENERATED_NAME_LENGTH: usize = 63;

const PSEUDO_TABLES: &[&str] = &["EXCLUDED", "INSERTED", "DELETED", "NEW", "OLD"];

// Keywords shared by every dialect.
const COMMON_RESERVED: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLLATE",
    "COLUMN", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END",
    "EXCEPT", "EXISTS", "FALSE", "FOR", "FOREIGN", "FROM", "FULL", "GROUP", "HAVING", "IN",
    "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE",
    "LIMIT", "NATURAL", "NOT", "NULL", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES",
    "RIGHT", "SELECT", "SET", "TABLE", "THEN", "TO", "TRUE", "UNION", "UNIQUE", "UPDATE",
    "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

const SQLITE_RESERVED: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ANALYZE", "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN",
    "CASCADE", "CAST", "COMMIT", "CONFLICT", "DATABASE", "DEFERRABLE", "DEFERRED", "DETACH",
    "EACH", "ESCAPE", "EXCLUSIVE", "EXPLAIN", "FAIL", "GLOB", "IF", "IGNORE", "IMMEDIATE",
    "INDEXED", "INITIALLY", "INSTEAD", "ISNULL", "MATCH", "NO", "NOTNULL", "OF", "OFFSET",
    "PLAN", "PRAGMA", "QUERY", "RAISE", "RECURSIVE", "REGEXP", "REINDEX", "RELEASE", "RENAME",
    "REPLACE", "RESTRICT", "ROLLBACK", "ROW", "SAVEPOINT", "TEMP", "TEMPORARY", "TRANSACTION",
    "TRIGGER", "VACUUM", "VIEW", "VIRTUAL", "WITHOUT",
];

const POSTGRES_RESERVED: &[&str] = &[
    "ANALYSE", "ANALYZE", "ARRAY", "ASYMMETRIC", "AUTHORIZATION", "BINARY", "BOTH", "CAST",
    "CONCURRENTLY", "CURRENT_CATALOG", "CURRENT_ROLE", "CURRENT_SCHEMA", "CURRENT_USER",
    "DEFERRABLE", "DO", "FETCH", "FREEZE", "GRANT", "ILIKE", "INITIALLY", "ISNULL", "LATERAL",
    "LEADING", "LOCALTIME", "LOCALTIMESTAMP", "NOTNULL", "OFFSET", "ONLY", "OVERLAPS",
    "PLACING", "RETURNING", "SESSION_USER", "SIMILAR", "SOME", "SYMMETRIC", "TABLESAMPLE",
    "TRAILING", "USER", "VARIADIC", "VERBOSE", "WINDOW",
];

const MYSQL_RESERVED: &[&str] = &[
    "ACCESSIBLE", "ADD", "BEFORE", "BIGINT", "BINARY", "BLOB", "BOTH", "CALL", "CASCADE",
    "CHANGE", "CHAR", "CHARACTER", "CONDITION", "CONTINUE", "CONVERT", "CURSOR", "DATABASE",
    "DATABASES", "DAY_HOUR", "DEC", "DECIMAL", "DECLARE", "DELAYED", "DESCRIBE",
    "DETERMINISTIC", "DIV", "DOUBLE", "DUAL", "EACH", "ELSEIF", "ENCLOSED", "ESCAPED", "EXIT",
    "EXPLAIN", "FETCH", "FLOAT", "FORCE", "FULLTEXT", "GENERATED", "GRANT", "GROUPS",
    "HIGH_PRIORITY", "IF", "IGNORE", "INFILE", "INOUT", "INT", "INTEGER", "INTERVAL", "ITERATE",
    "KEYS", "KILL", "LEADING", "LEAVE", "LINES", "LOAD", "LOCK", "LONG", "LOOP", "MATCH",
    "MEDIUMINT", "MOD", "MODIFIES", "NUMERIC", "OPTIMIZE", "OPTION", "OUT", "OUTFILE",
    "PARTITION", "PRECISION", "PROCEDURE", "PURGE", "RANGE", "RANK", "READ", "REAL", "REGEXP",
    "RELEASE", "RENAME", "REPEAT", "REPLACE", "REQUIRE", "RESTRICT", "RETURN", "REVOKE",
    "RLIKE", "ROW", "ROWS", "SCHEMA", "SCHEMAS", "SEPARATOR", "SHOW", "SIGNAL", "SMALLINT",
    "SPATIAL", "SQL", "STARTING", "STORED", "TERMINATED", "TINYINT", "TRAILING", "TRIGGER",
    "UNDO", "UNLOCK", "UNSIGNED", "USAGE", "USE", "VARBINARY", "VARCHAR", "VARYING",
    "VIRTUAL", "WHILE", "WINDOW", "WRITE", "XOR", "YEAR_MONTH", "ZEROFILL",
];

const SQLSERVER_RESERVED: &[&str] = &[
    "ADD", "AUTHORIZATION", "BACKUP", "BEGIN", "BREAK", "BROWSE", "BULK", "CASCADE",
    "CHECKPOINT", "CLOSE", "CLUSTERED", "COALESCE", "COMMIT", "COMPUTE", "CONTAINS",
    "CONTINUE", "CONVERT", "CURRENT", "CURRENT_USER", "CURSOR", "DATABASE", "DBCC",
    "DEALLOCATE", "DECLARE", "DENY", "DISK", "DISTRIBUTED", "DOUBLE", "DUMP", "ERRLVL",
    "ESCAPE", "EXEC", "EXECUTE", "EXIT", "EXTERNAL", "FETCH", "FILE", "FILLFACTOR", "FUNCTION",
    "GOTO", "GRANT", "HOLDLOCK", "IDENTITY", "IDENTITYCOL", "IDENTITY_INSERT", "IF", "KILL",
    "LINENO", "LOAD", "MERGE", "NATIONAL", "NOCHECK", "NONCLUSTERED", "NULLIF", "OF", "OFF",
    "OFFSETS", "OPEN", "OPENDATASOURCE", "OPENQUERY", "OPENROWSET", "OPENXML", "OPTION",
    "OVER", "PERCENT", "PIVOT", "PLAN", "PRECISION", "PRINT", "PROC", "PROCEDURE", "PUBLIC",
    "RAISERROR", "READ", "READTEXT", "RECONFIGURE", "REPLICATION", "RESTORE", "RESTRICT",
    "RETURN", "REVERT", "REVOKE", "ROLLBACK", "ROWCOUNT", "ROWGUIDCOL", "RULE", "SAVE",
    "SCHEMA", "SESSION_USER", "SETUSER", "SHUTDOWN", "SOME", "STATISTICS", "SYSTEM_USER",
    "TABLESAMPLE", "TEXTSIZE", "TOP", "TRAN", "TRANSACTION", "TRIGGER", "TRUNCATE",
    "TRY_CONVERT", "TSEQUAL", "UNPIVOT", "UPDATETEXT", "USE", "USER", "VARYING", "VIEW",
    "WAITFOR", "WHILE", "WITHIN", "WRITETEXT",
];

/// Reject names that no dialect can store: NUL bytes or more than
/// 128 bytes. Used on names that come from options and file names.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "identifier {:?} contains a NUL byte",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "identifier {:?} is {} bytes long, the limit is {}",
            name,
            name.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }
    Ok(())
}

/// Whether `word` is reserved in `dialect` (case-insensitive).
pub fn is_reserved(dialect: Dialect, word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    let dialect_words = match dialect {
        Dialect::Sqlite => SQLITE_RESERVED,
        Dialect::Postgres => POSTGRES_RESERVED,
        Dialect::Mysql => MYSQL_RESERVED,
        Dialect::SqlServer => SQLSERVER_RESERVED,
    };
    COMMON_RESERVED.contains(&upper.as_str()) || dialect_words.contains(&upper.as_str())
}

/// Whether an identifier must be quoted in `dialect`.
pub fn needs_quoting(dialect: Dialect, name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if PSEUDO_TABLES.contains(&name.to_ascii_uppercase().as_str()) {
        return false;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return true;
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'))
    {
        return true;
    }
    is_reserved(dialect, name)
}

/// Opening and closing quote characters for `dialect`.
pub fn quote_chars(dialect: Dialect) -> (char, char) {
    match dialect {
        Dialect::Mysql => ('`', '`'),
        Dialect::SqlServer => ('[', ']'),
        Dialect::Sqlite | Dialect::Postgres => ('"', '"'),
    }
}

/// Double every occurrence of `quote` in `s`.
pub fn escape_quote(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        out.push(c);
        if c == quote {
            out.push(quote);
        }
    }
    out
}

/// Quote an identifier only when it needs quoting.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(quote_identifier(Dialect::Postgres, "users"), "users");
/// assert_eq!(quote_identifier(Dialect::Postgres, "User"), "\"User\"");
/// assert_eq!(quote_identifier(Dialect::SqlServer, "a]b"), "[a]]b]");
/// ```
pub fn quote_identifier(dialect: Dialect, name: &str) -> String {
    if !needs_quoting(dialect, name) {
        return name.to_string();
    }
    quote_always(dialect, name)
}

/// Quote an identifier unconditionally.
pub fn quote_always(dialect: Dialect, name: &str) -> String {
    let (open, close) = quote_chars(dialect);
    format!("{}{}{}", open, escape_quote(name, close), close)
}

/// Qualify `name` with `schema` unless the schema is empty or is the current schema.
pub fn qualify(dialect: Dialect, schema: &str, name: &str, current_schema: &str) -> String {
    if schema.is_empty() || schema == current_schema {
        quote_identifier(dialect, name)
    } else {
        format!(
            "{}.{}",
            quote_identifier(dialect, schema),
            quote_identifier(dialect, name)
        )
    }
}

/// Render a string as a SQL string literal.
///
/// MySQL treats backslash as an escape inside literals, so it is doubled too.
/// SQL Server literals use the `N'...'` form to keep Unicode intact.
pub fn quote_literal(dialect: Dialect, s: &str) -> String {
    let mut escaped = escape_quote(s, '\'');
    if dialect == Dialect::Mysql {
        escaped = escaped.replace('\\', "\\\\");
    }
    match dialect {
        Dialect::SqlServer => format!("N'{}'", escaped),
        _ => format!("'{}'", escaped),
    }
}

/// Kind of object a generated name is for; selects the name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
    Exclude,
    Index,
}

impl NameKind {
    /// Suffix appended to generated names.
    pub fn suffix(&self) -> &'static str {
        match self {
            NameKind::PrimaryKey => "pkey",
            NameKind::ForeignKey => "fkey",
            NameKind::Unique => "key",
            NameKind::Check => "check",
            NameKind::Exclude => "excl",
            NameKind::Index => "idx",
        }
    }
}

/// Deterministic name `{table}_{col1}_{col2}_..._{suffix}`.
///
/// Spaces become underscores. Names longer than 63 characters lose characters
/// from the end of the table/column part so the suffix always survives.
pub fn generate_name(kind: NameKind, table: &str, columns: &[String]) -> String {
    let mut stem = table.replace(' ', "_");
    for col in columns {
        stem.push('_');
        stem.push_str(&col.replace(' ', "_"));
    }
    let suffix = kind.suffix();
    let budget = MAX_GENERATED_NAME_LENGTH - suffix.len() - 1;
    if stem.chars().count() > budget {
        stem = stem.chars().take(budget).collect();
    }
    format!("{}_{}", stem, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Quoting
    // =========================================================================

    #[test]
    fn test_plain_identifiers_unquoted() {
        assert_eq!(quote_identifier(Dialect::Postgres, "users"), "users");
        assert_eq!(quote_identifier(Dialect::Mysql, "film_id"), "film_id");
        assert_eq!(quote_identifier(Dialect::SqlServer, "t1"), "t1");
    }

    #[test]
    fn test_quote_style_per_dialect() {
        assert_eq!(quote_identifier(Dialect::Postgres, "User"), "\"User\"");
        assert_eq!(quote_identifier(Dialect::Sqlite, "my table"), "\"my table\"");
        assert_eq!(quote_identifier(Dialect::Mysql, "Order Id"), "`Order Id`");
        assert_eq!(quote_identifier(Dialect::SqlServer, "Order Id"), "[Order Id]");
    }

    #[test]
    fn test_closing_quote_doubled() {
        assert_eq!(quote_identifier(Dialect::Postgres, "a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_identifier(Dialect::Mysql, "a`b"), "`a``b`");
        assert_eq!(quote_identifier(Dialect::SqlServer, "a]b"), "[a]]b]");
        // An opening bracket is not doubled
        assert_eq!(quote_identifier(Dialect::SqlServer, "a[b"), "[a[b]");
    }

    #[test]
    fn test_reserved_words_quoted_case_insensitive() {
        assert_eq!(quote_identifier(Dialect::Postgres, "order"), "\"order\"");
        assert_eq!(quote_identifier(Dialect::Mysql, "key"), "`key`");
        assert_eq!(quote_identifier(Dialect::SqlServer, "user"), "[user]");
        assert!(is_reserved(Dialect::Sqlite, "Pragma"));
        // Reserved in MySQL only
        assert_eq!(quote_identifier(Dialect::Postgres, "rank"), "rank");
        assert_eq!(quote_identifier(Dialect::Mysql, "rank"), "`rank`");
    }

    #[test]
    fn test_empty_and_leading_digit() {
        assert_eq!(quote_identifier(Dialect::Postgres, ""), "\"\"");
        assert_eq!(quote_identifier(Dialect::Postgres, "1abc"), "\"1abc\"");
    }

    #[test]
    fn test_pseudo_tables_exempt() {
        for name in ["EXCLUDED", "excluded", "INSERTED", "DELETED", "NEW", "OLD"] {
            assert_eq!(quote_identifier(Dialect::Postgres, name), name);
        }
    }

    #[test]
    fn test_qualify_skips_current_schema() {
        assert_eq!(qualify(Dialect::Postgres, "public", "film", "public"), "film");
        assert_eq!(qualify(Dialect::Postgres, "", "film", "public"), "film");
        assert_eq!(
            qualify(Dialect::Postgres, "Sales", "film", "public"),
            "\"Sales\".film"
        );
        assert_eq!(qualify(Dialect::SqlServer, "hr", "emp", "dbo"), "hr.emp");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal(Dialect::Postgres, "it's"), "'it''s'");
        assert_eq!(quote_literal(Dialect::Mysql, "a\\b'c"), "'a\\\\b''c'");
        assert_eq!(quote_literal(Dialect::SqlServer, "x"), "N'x'");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"a".repeat(129)).is_err());
    }

    // =========================================================================
    // Name generation
    // =========================================================================

    #[test]
    fn test_generate_name_suffixes() {
        let cols = vec!["film_id".to_string()];
        assert_eq!(generate_name(NameKind::PrimaryKey, "film", &cols), "film_film_id_pkey");
        assert_eq!(generate_name(NameKind::ForeignKey, "film", &cols), "film_film_id_fkey");
        assert_eq!(generate_name(NameKind::Unique, "film", &cols), "film_film_id_key");
        assert_eq!(generate_name(NameKind::Check, "film", &cols), "film_film_id_check");
        assert_eq!(generate_name(NameKind::Exclude, "film", &cols), "film_film_id_excl");
        assert_eq!(generate_name(NameKind::Index, "film", &cols), "film_film_id_idx");
    }

    #[test]
    fn test_generate_name_multi_column_and_spaces() {
        let cols = vec!["first name".to_string(), "last_name".to_string()];
        assert_eq!(
            generate_name(NameKind::Unique, "my table", &cols),
            "my_table_first_name_last_name_key"
        );
    }

    #[test]
    fn test_generate_name_truncates_preserving_suffix() {
        let cols = vec!["a_very_long_column_name_number_one".to_string(),
                        "another_very_long_column_name".to_string()];
        let name = generate_name(NameKind::ForeignKey, "some_long_table_name", &cols);
        assert_eq!(name.len(), 63);
        assert!(name.ends_with("_fkey"));
        assert!(name.starts_with("some_long_table_name_a_very_long_column_name"));
    }
}
