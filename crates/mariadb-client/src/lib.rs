//! MariaDB/MySQL client protocol driver.
//!
//! This crate implements the client side of the MariaDB wire protocol over
//! blocking sockets, with an asupersync-aware shared wrapper for tasks. It
//! provides:
//!
//! - Packet framing with sequence numbers and 16MB continuation packets
//! - Handshake with capability negotiation and authentication switches
//!   (mysql_native_password, caching_sha2_password, mysql_clear_password)
//! - Text and binary result set decoding, materialized or streamed
//! - Server side prepared statements with a per-connection LRU cache
//! - Command pipelining on servers supporting bulk operations
//! - LOCAL INFILE with file name validation
//!
//! # Example
//!
//! ```rust,ignore
//! use mariadb_client::{MariaDbConfig, MariaDbConnection};
//!
//! let config = MariaDbConfig::parse("server=localhost;user id=root;database=test")?;
//! let mut conn = MariaDbConnection::connect(config)?;
//!
//! let mut stream = conn.query_stream("SELECT id, name FROM users")?;
//! while stream.next_row()? {
//!     let id = stream.get_i64(0)?;
//!     let name = stream.get_string(1)?;
//! }
//! ```

pub mod auth;
pub mod column;
pub mod config;
pub mod connection;
pub mod context;
pub mod decode;
pub mod error_mapping;
pub mod host;
pub mod message;
pub mod prepare_cache;
pub mod protocol;
pub mod result;
pub mod row;
pub mod security;
pub mod shared;
pub mod version;

pub use column::{ColumnDefinition, DataType};
pub use config::{IsolationLevel, MariaDbConfig, SslMode, TimeZoneSetting, TransportKind};
pub use connection::{ConnectionState, MariaDbConnection};
pub use decode::Encoding;
pub use host::HostAddress;
pub use message::{BatchQueryPacket, ClientMessage, OkPacket, PrepareResult, QueryPacket};
pub use result::{Completion, ResultSet, RowStream};
pub use shared::SharedMariaDbConnection;
pub use version::ServerVersion;

pub use mariadb_core::{Cx, Error, Outcome, Result, Row, Value};
