//! Core abstractions shared by every engine.
//!
//! - [`dialect`]: the four supported SQL dialects
//! - [`identifier`]: quoting, literal escaping and name generation
//! - [`catalog`]: schema model (tables, columns, indexes, constraints, ...)
//! - [`normalize`]: type and default normalization for comparison
//! - [`value`]: SQL value and row representation
//! - [`traits`]: `Database` and `Session`, implemented by each driver

pub mod catalog;
pub mod dialect;
pub mod identifier;
pub mod normalize;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::{
    Catalog, Column, Constraint, ConstraintKind, Domain, Enum, Index, Routine, Schema, Table,
    Trigger, VersionNums, View,
};
pub use dialect::Dialect;
pub use identifier::{generate_name, quote_identifier, NameKind};
pub use normalize::{normalize_column_type, normalize_default, ColumnType};
pub use traits::{Database, RowSink, Session};
pub use value::{Row, SqlNullType, SqlValue};
