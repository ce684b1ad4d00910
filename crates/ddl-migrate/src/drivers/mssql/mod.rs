//! Microsoft SQL Server driver.
//!
//! - [`MssqlDatabase`]: Tiberius connections in a bb8 pool
//! - [`introspect`]: catalog reader over `sys.*`

pub mod introspect;
mod session;

pub use session::{MssqlConnectOptions, MssqlDatabase, MssqlSession, TiberiusConnectionManager};
