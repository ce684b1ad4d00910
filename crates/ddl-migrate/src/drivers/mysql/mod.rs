//! MySQL/MariaDB driver.
//!
//! - [`MysqlDatabase`]: `mysql_async` pool
//! - [`introspect`]: catalog reader over `information_schema`

pub mod introspect;
mod session;

pub use session::{MysqlDatabase, MysqlSession};
