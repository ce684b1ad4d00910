//! Column type and default-expression normalization.
//!
//! Introspected catalogs and declarative catalogs spell the same type in
//! different ways (`int4` vs `integer`, `character varying(20)` vs
//! `varchar(20)`). The diff engines compare normalized forms only.

use std::fmt;

use crate::core::dialect::Dialect;

/// A normalized column type: uppercase base plus up to two arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnType {
    pub base: String,
    pub arg1: String,
    pub arg2: String,
}

impl ColumnType {
    /// Render back to a type string that normalizes to `self`.
    pub fn render(&self) -> String {
        let mut core = self.base.as_str();
        let mut arrays = String::new();
        while let Some(stripped) = core.strip_suffix("[]") {
            arrays.push_str("[]");
            core = stripped;
        }
        let (core, unsigned) = match core.strip_suffix(" UNSIGNED") {
            Some(stripped) => (stripped, " UNSIGNED"),
            None => (core, ""),
        };
        let args = match (self.arg1.is_empty(), self.arg2.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("({})", self.arg1),
            (false, false) => format!("({},{})", self.arg1, self.arg2),
        };
        format!("{}{}{}{}", core, args, unsigned, arrays)
    }

    /// Integer value of the first argument, if numeric.
    pub fn length(&self) -> Option<u64> {
        self.arg1.parse().ok()
    }

    /// Whether the base (ignoring array suffixes) is one of `names`.
    pub fn is_one_of(&self, names: &[&str]) -> bool {
        let base = self.base.trim_end_matches("[]");
        names.contains(&base)
    }

    /// Whether this is an array type.
    pub fn is_array(&self) -> bool {
        self.base.ends_with("[]")
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Normalize a raw column type for `dialect`.
pub fn normalize_column_type(dialect: Dialect, raw: &str) -> ColumnType {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = collapsed.to_uppercase();

    let (mut base, mut args) = match (upper.find('('), upper.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let before = upper[..open].trim();
            let after = upper[close + 1..].trim();
            let args: Vec<String> = upper[open + 1..close]
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            let base = if after.is_empty() {
                before.to_string()
            } else if after.starts_with('[') {
                format!("{}{}", before, after)
            } else {
                format!("{} {}", before, after)
            };
            (base, args)
        }
        _ => (upper.clone(), Vec::new()),
    };

    // Postgres reports arrays as _int4 in some catalogs.
    if dialect == Dialect::Postgres {
        if let Some(element) = base.strip_prefix('_') {
            base = format!("{}[]", element);
        }
    }

    let mut arrays = String::new();
    while let Some(stripped) = base.strip_suffix("[]") {
        arrays.push_str("[]");
        base = stripped.trim_end().to_string();
    }

    base = match dialect {
        Dialect::Postgres => canonical_postgres(&base),
        Dialect::Mysql => canonical_mysql(&base, &mut args),
        Dialect::SqlServer => canonical_sqlserver(&base),
        Dialect::Sqlite => base,
    };
    base.push_str(&arrays);

    let mut args = args.into_iter();
    ColumnType {
        base,
        arg1: args.next().unwrap_or_default(),
        arg2: args.next().unwrap_or_default(),
    }
}

fn canonical_postgres(base: &str) -> String {
    match base {
        "INTEGER" | "INT4" | "SERIAL" | "SERIAL4" | "INT" => "INT",
        "BIGINT" | "INT8" | "BIGSERIAL" | "SERIAL8" => "BIGINT",
        "SMALLINT" | "INT2" | "SMALLSERIAL" | "SERIAL2" => "SMALLINT",
        "REAL" | "FLOAT4" => "REAL",
        "DOUBLE PRECISION" | "FLOAT8" | "FLOAT" => "DOUBLE PRECISION",
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => "TIMESTAMPTZ",
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMETZ" | "TIME WITH TIME ZONE" => "TIMETZ",
        "TIME" | "TIME WITHOUT TIME ZONE" => "TIME",
        "CHARACTER VARYING" | "VARCHAR" => "VARCHAR",
        "CHARACTER" | "CHAR" | "BPCHAR" => "CHAR",
        "BIT VARYING" | "VARBIT" => "VARBIT",
        "BOOL" | "BOOLEAN" => "BOOLEAN",
        "DECIMAL" | "NUMERIC" => "NUMERIC",
        other => return other.to_string(),
    }
    .to_string()
}

fn canonical_mysql(base: &str, args: &mut Vec<String>) -> String {
    let mut words: Vec<&str> = base.split(' ').collect();
    let unsigned = words.last() == Some(&"UNSIGNED");
    words.retain(|w| *w != "UNSIGNED" && *w != "SIGNED" && *w != "ZEROFILL");
    let core = words.join(" ");

    if core == "TINYINT" && args.first().map(String::as_str) == Some("1") && !unsigned {
        args.clear();
        return "BOOLEAN".to_string();
    }

    let core = match core.as_str() {
        "BOOL" | "BOOLEAN" => "BOOLEAN",
        "INTEGER" | "INT" => "INT",
        "CHARACTER VARYING" | "VARCHAR" => "VARCHAR",
        "CHARACTER" | "CHAR" => "CHAR",
        "DEC" | "DECIMAL" | "NUMERIC" | "FIXED" => "DECIMAL",
        "DOUBLE PRECISION" | "DOUBLE" | "REAL" => "DOUBLE",
        other => other,
    }
    .to_string();

    // Integer display widths carry no meaning.
    if matches!(
        core.as_str(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT"
    ) {
        args.clear();
    }

    if unsigned {
        format!("{} UNSIGNED", core)
    } else {
        core
    }
}

fn canonical_sqlserver(base: &str) -> String {
    match base {
        "NATIONAL CHARACTER VARYING" | "NATIONAL CHAR VARYING" | "NVARCHAR" => "NVARCHAR",
        "NATIONAL CHARACTER" | "NATIONAL CHAR" | "NCHAR" => "NCHAR",
        "BINARY VARYING" | "VARBINARY" => "VARBINARY",
        "CHARACTER VARYING" | "CHAR VARYING" | "VARCHAR" => "VARCHAR",
        "CHARACTER" | "CHAR" => "CHAR",
        "INTEGER" | "INT" => "INT",
        "DEC" | "DECIMAL" => "DECIMAL",
        "DOUBLE PRECISION" | "FLOAT" => "FLOAT",
        other => return other.to_string(),
    }
    .to_string()
}

const TIMESTAMP_ALIASES: &[&str] = &[
    "NOW()",
    "CURRENT_TIMESTAMP",
    "CURRENT_TIMESTAMP()",
    "DATETIME('NOW')",
    "GETDATE()",
    "SYSDATETIME()",
    "SYSDATETIMEOFFSET()",
    "TRANSACTION_TIMESTAMP()",
];

/// Normalize a default expression for comparison.
///
/// Boolean-ish literals collapse to `'0'`/`'1'`, current-timestamp spellings
/// collapse to `CURRENT_TIMESTAMP`, Postgres casts on literals are stripped and
/// a NULL default is the same as no default.
pub fn normalize_default(dialect: Dialect, raw: &str) -> String {
    let mut s = raw.trim().to_string();

    loop {
        let stripped = strip_outer_parens(&s);
        if stripped == s {
            break;
        }
        s = stripped;
    }

    if dialect == Dialect::Postgres {
        s = strip_pg_casts(&s);
    }

    let upper = s.to_uppercase();
    if upper.is_empty() || upper == "NULL" {
        return String::new();
    }
    if TIMESTAMP_ALIASES.contains(&upper.as_str()) || upper.starts_with("CURRENT_TIMESTAMP(") {
        return "CURRENT_TIMESTAMP".to_string();
    }
    match upper.as_str() {
        "0" | "'0'" | "FALSE" | "'FALSE'" | "B'0'" | "'F'" => return "'0'".to_string(),
        "1" | "'1'" | "TRUE" | "'TRUE'" | "B'1'" | "'T'" => return "'1'".to_string(),
        _ => {}
    }
    if is_numeric(&s) {
        return format!("'{}'", s);
    }
    if let Some(inner) = s.strip_prefix("N'") {
        // SQL Server Unicode literal
        if dialect == Dialect::SqlServer {
            return format!("'{}", inner);
        }
    }
    s
}

/// Whether a (normalized or raw) default is a literal rather than an expression.
pub fn is_literal_default(default: &str) -> bool {
    let s = default.trim();
    if s.is_empty() {
        return true;
    }
    let upper = s.to_uppercase();
    if matches!(upper.as_str(), "NULL" | "TRUE" | "FALSE") || is_numeric(s) {
        return true;
    }
    let body = s.strip_prefix('N').unwrap_or(s);
    body.len() >= 2
        && body.starts_with('\'')
        && body.ends_with('\'')
        && !body[1..body.len() - 1].replace("''", "").contains('\'')
}

fn is_numeric(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|c| *c == '.').count() <= 1
        && body != "."
}

fn strip_outer_parens(s: &str) -> String {
    let t = s.trim();
    if !(t.starts_with('(') && t.ends_with(')')) {
        return t.to_string();
    }
    // Only strip when the first paren closes at the very end.
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, c) in t.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 && i != t.len() - 1 {
                    return t.to_string();
                }
            }
            _ => {}
        }
    }
    t[1..t.len() - 1].trim().to_string()
}

fn strip_pg_casts(s: &str) -> String {
    let mut out = s.to_string();
    while let Some(idx) = out.rfind("::") {
        let type_part = &out[idx + 2..];
        let balanced = type_part.matches('(').count() == type_part.matches(')').count();
        let type_like = type_part
            .chars()
            .all(|c| c.is_alphanumeric() || " _.\"[](),".contains(c));
        if !balanced || !type_like || type_part.contains('\'') {
            break;
        }
        out = out[..idx].trim_end().to_string();
        out = strip_outer_parens(&out);
    }
    out
}

/// Collapse whitespace and case for comparing expressions (CHECK bodies, predicates).
pub fn normalize_expression(expr: &str) -> String {
    let mut s = expr.trim().to_string();
    loop {
        let stripped = strip_outer_parens(&s);
        if stripped == s {
            break;
        }
        s = stripped;
    }
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace("( ", "(")
        .replace(" )", ")")
}
