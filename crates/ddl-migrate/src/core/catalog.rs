//! In-memory catalog model shared by introspection, diff and dump.
//!
//! Entities are plain data; behaviour lives in free functions that switch on
//! [`Dialect`]. The serde form doubles as the declarative destination format
//! accepted by `automigrate --dest schema.json`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::core::dialect::Dialect;
use crate::core::identifier::{generate_name, NameKind};

/// Server version as an ordered vector of integers, e.g. `[16, 2]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionNums(pub Vec<u32>);

impl VersionNums {
    /// Parse "16.2", "8.0.36-log" or "PostgreSQL 15.4 on x86_64" style strings.
    pub fn parse(version: &str) -> Self {
        let start = version.find(|c: char| c.is_ascii_digit());
        let Some(start) = start else {
            return Self::default();
        };
        let nums = version[start..]
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or("")
            .split('.')
            .filter_map(|p| p.parse().ok())
            .collect();
        Self(nums)
    }

    /// Lexicographic comparison against a version literal.
    pub fn lower_than(&self, other: &[u32]) -> bool {
        compare_versions(&self.0, other) == Ordering::Less
    }

    pub fn greater_or_equal_to(&self, other: &[u32]) -> bool {
        !self.lower_than(other)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn compare_versions(a: &[u32], b: &[u32]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    if a.is_empty() && !b.is_empty() {
        return Ordering::Less;
    }
    Ordering::Equal
}

/// The whole model of one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub dialect: Dialect,
    pub current_schema: String,
    pub default_collation: String,
    pub version_nums: VersionNums,
    pub schemas: Vec<Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Empty means the current schema.
    pub name: String,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub routines: Vec<Routine>,
    pub enums: Vec<Enum>,
    pub domains: Vec<Domain>,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Table {
    pub schema: String,
    pub name: String,
    /// Original CREATE statement where the database keeps one (SQLite).
    pub sql: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
    pub triggers: Vec<Trigger>,
    pub ignore: bool,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub default: String,
    pub is_not_null: bool,
    pub is_primary_key: bool,
    pub is_generated: bool,
    pub generated_expr: String,
    /// Generated column storage: "STORED" or "VIRTUAL".
    pub generated_kind: String,
    /// Identity spelling for the dialect, empty when none.
    pub identity: String,
    pub collation: String,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Index {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub is_unique: bool,
    /// Column names or expressions.
    pub columns: Vec<String>,
    pub include: Vec<String>,
    pub predicate: String,
    pub using: String,
    pub ignore: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    #[default]
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    Exclude,
}

impl ConstraintKind {
    pub fn name_kind(&self) -> NameKind {
        match self {
            ConstraintKind::PrimaryKey => NameKind::PrimaryKey,
            ConstraintKind::Unique => NameKind::Unique,
            ConstraintKind::ForeignKey => NameKind::ForeignKey,
            ConstraintKind::Check => NameKind::Check,
            ConstraintKind::Exclude => NameKind::Exclude,
        }
    }

    /// SQL keyword for the constraint clause.
    pub fn keyword(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
            ConstraintKind::Check => "CHECK",
            ConstraintKind::Exclude => "EXCLUDE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraint {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references_schema: String,
    pub references_table: String,
    pub references_columns: Vec<String>,
    pub update_rule: String,
    pub delete_rule: String,
    pub match_option: String,
    pub check_expr: String,
    /// Full EXCLUDE body (`USING gist (...)`) for Postgres exclusion constraints.
    pub exclusion_expr: String,
    pub is_deferrable: bool,
    pub is_initially_deferred: bool,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trigger {
    pub schema: String,
    pub table: String,
    pub name: String,
    /// Complete CREATE TRIGGER statement.
    pub sql: String,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct View {
    pub schema: String,
    pub name: String,
    pub sql: String,
    pub is_materialized: bool,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routine {
    pub schema: String,
    pub name: String,
    /// "FUNCTION" or "PROCEDURE".
    pub kind: String,
    /// Argument signature used in DROP (Postgres overloads).
    pub identity_arguments: String,
    pub sql: String,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enum {
    pub schema: String,
    pub name: String,
    pub labels: Vec<String>,
    pub ignore: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Domain {
    pub schema: String,
    pub name: String,
    pub underlying_type: String,
    pub collation: String,
    pub is_not_null: bool,
    pub default: String,
    pub check_exprs: Vec<String>,
    pub ignore: bool,
}

impl Catalog {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            current_schema: dialect.default_schema().to_string(),
            ..Default::default()
        }
    }

    /// Resolve an empty schema name to the current schema.
    pub fn schema_name<'a>(&'a self, name: &'a str) -> &'a str {
        if name.is_empty() {
            &self.current_schema
        } else {
            name
        }
    }

    pub fn find_schema(&self, name: &str) -> Option<&Schema> {
        let wanted = self.schema_name(name);
        self.schemas
            .iter()
            .find(|s| self.schema_name(&s.name) == wanted)
    }

    /// Get or create a schema entry.
    pub fn schema_mut(&mut self, name: &str) -> &mut Schema {
        let pos = self.schemas.iter().position(|s| s.name == name);
        match pos {
            Some(i) => &mut self.schemas[i],
            None => {
                self.schemas.push(Schema {
                    name: name.to_string(),
                    ..Default::default()
                });
                let last = self.schemas.len() - 1;
                &mut self.schemas[last]
            }
        }
    }

    pub fn find_table(&self, schema: &str, name: &str) -> Option<&Table> {
        let schema = self.find_schema(schema)?;
        schema.tables.iter().find(|t| names_equal(self.dialect, &t.name, name))
    }

    /// Every non-ignored table across all non-ignored schemas.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.schemas
            .iter()
            .filter(|s| !s.ignore)
            .flat_map(|s| s.tables.iter())
            .filter(|t| !t.ignore)
    }

    /// Fill in empty schema fields on child objects and synthesize SQLite constraint names.
    pub fn normalize_names(&mut self) {
        let dialect = self.dialect;
        for schema in &mut self.schemas {
            let schema_name = schema.name.clone();
            for table in &mut schema.tables {
                if table.schema.is_empty() {
                    table.schema = schema_name.clone();
                }
                for index in &mut table.indexes {
                    index.schema = table.schema.clone();
                    index.table = table.name.clone();
                }
                for constraint in &mut table.constraints {
                    constraint.schema = table.schema.clone();
                    constraint.table = table.name.clone();
                    if dialect == Dialect::Sqlite || constraint.name.is_empty() {
                        constraint.name = constraint_name(dialect, &table.name, constraint);
                    }
                }
                for trigger in &mut table.triggers {
                    trigger.schema = table.schema.clone();
                    trigger.table = table.name.clone();
                }
                // Primary-key flag and constraint must agree.
                let pk_cols: Vec<String> = table
                    .constraints
                    .iter()
                    .filter(|c| c.kind == ConstraintKind::PrimaryKey)
                    .flat_map(|c| c.columns.clone())
                    .collect();
                for col in &mut table.columns {
                    if pk_cols.iter().any(|c| names_equal(dialect, c, &col.name)) {
                        col.is_primary_key = true;
                    }
                }
                if !table.columns.iter().any(|c| c.is_primary_key)
                    || table
                        .constraints
                        .iter()
                        .any(|c| c.kind == ConstraintKind::PrimaryKey)
                {
                    continue;
                }
                let cols: Vec<String> = table
                    .columns
                    .iter()
                    .filter(|c| c.is_primary_key)
                    .map(|c| c.name.clone())
                    .collect();
                let mut pk = Constraint {
                    schema: table.schema.clone(),
                    table: table.name.clone(),
                    kind: ConstraintKind::PrimaryKey,
                    columns: cols,
                    ..Default::default()
                };
                pk.name = constraint_name(dialect, &table.name, &pk);
                table.constraints.insert(0, pk);
            }
            for view in &mut schema.views {
                if view.schema.is_empty() {
                    view.schema = schema_name.clone();
                }
            }
        }
    }
}

/// Deterministic name for a constraint. MySQL primary keys are always `PRIMARY`.
pub fn constraint_name(dialect: Dialect, table: &str, constraint: &Constraint) -> String {
    if dialect == Dialect::Mysql && constraint.kind == ConstraintKind::PrimaryKey {
        return "PRIMARY".to_string();
    }
    generate_name(constraint.kind.name_kind(), table, &constraint.columns)
}

/// Identifier equality: exact for Postgres, case-insensitive elsewhere.
pub fn names_equal(dialect: Dialect, a: &str, b: &str) -> bool {
    match dialect {
        Dialect::Postgres => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

impl Table {
    pub fn find_column(&self, dialect: Dialect, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| names_equal(dialect, &c.name, name))
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    /// Primary-key column names in key order, falling back to column flags.
    pub fn primary_key_columns(&self) -> Vec<String> {
        if let Some(pk) = self.primary_key() {
            return pk.columns.clone();
        }
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey && !c.ignore)
    }
}
