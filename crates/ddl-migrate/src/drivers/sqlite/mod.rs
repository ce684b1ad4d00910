//! SQLite driver.

pub mod introspect;
mod session;

pub use session::{SqliteDatabase, SqliteSession};
