//! PostgreSQL driver.
//!
//! - [`PostgresDatabase`]: deadpool-postgres pool with rustls TLS
//! - [`introspect`]: catalog reader over `pg_catalog`

pub mod introspect;
mod session;

pub use introspect::parse_pg_array;
pub use session::{PostgresDatabase, PostgresSession};
