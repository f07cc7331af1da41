//! Core types for the MariaDB Rust connector.
//!
//! - `Error` taxonomy shared by every connector operation
//! - `Value` dynamic SQL values with structured temporal types
//! - `Row` materialized rows with label lookup
//! - `Outcome` / `Cx` re-exports from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome};

pub mod error;
pub mod row;
pub mod temporal;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, PacketTooLargeError, ProtocolError,
    QueryError, QueryErrorKind, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use temporal::{Date, DateTime, Time};
pub use value::Value;
