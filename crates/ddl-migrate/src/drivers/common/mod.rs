//! Utilities shared across drivers.
//!
//! - [`session`]: session-scoped settings with one-shot restore
//! - [`tls`]: TLS configuration for Postgres connections
//! - `builder`: catalog assembly used by the introspectors

pub(crate) mod builder;
pub mod session;
pub mod tls;

pub use session::SessionSetting;
pub use tls::{split_sslmode, SslMode, TlsBuilder};
