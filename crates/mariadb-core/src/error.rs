//! Error types for connector operations.

use std::fmt;

/// The primary error type for all connector operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, authentication, lost or closed socket)
    Connection(ConnectionError),
    /// Errors reported by the server for a command, or raised while running one
    Query(QueryError),
    /// Value decoding errors
    Type(TypeError),
    /// Malformed or unexpected wire data
    Protocol(ProtocolError),
    /// A command exceeded the server's `max_allowed_packet`
    PacketTooLarge(PacketTooLargeError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub sqlstate: Option<String>,
    pub code: Option<u16>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused
    Refused,
    /// Authentication failed or plugin rejected
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Operation attempted on a closed connection
    Closed,
    /// SSL/TLS required but unavailable
    Ssl,
    /// A post-connection session command failed
    Initialization,
    /// Server reported a non-transient connection error (SQLSTATE class 08)
    NonTransient,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub code: Option<u16>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Classification of server-side errors by SQLSTATE class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax, access or data errors (classes 22, 26, 2F, 20, 42, XA)
    Syntax,
    /// Invalid authorization or transaction state (classes 25, 28)
    Authorization,
    /// Constraint violation (classes 21, 23)
    Integrity,
    /// Transaction rolled back (class 40)
    TransactionRollback,
    /// Feature not supported (class 0A)
    FeatureNotSupported,
    /// Query interrupted (SQLSTATE 70100)
    Timeout,
    /// Generic driver or server error (class HY)
    Database,
    /// Any other class, may succeed on retry
    Transient,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Raised by the packet writer when a command would exceed `max_allowed_packet`.
///
/// `must_reconnect` is set when part of the command already reached the
/// server; the exchange cannot be completed and the socket must be dropped.
#[derive(Debug)]
pub struct PacketTooLargeError {
    pub message: String,
    pub must_reconnect: bool,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (rollback, timeout, transient class, unsent oversized packet)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::TransactionRollback
                    | QueryErrorKind::Timeout
                    | QueryErrorKind::Transient
            ),
            Error::PacketTooLarge(p) => !p.must_reconnect,
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this a connection error that requires a new connection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_) => true,
            Error::PacketTooLarge(p) => p.must_reconnect,
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::Connection(c) => c.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the server error code if available (e.g., 1062)
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Query(q) => q.code,
            Error::Connection(c) => c.code,
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a duplicate key violation?
    pub fn is_duplicate_key(&self) -> bool {
        self.code == Some(1062)
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, Some(1451 | 1452))
    }
}

impl TypeError {
    /// Decoding error naming the SQL type that could not be converted.
    pub fn unsupported(data_type: impl fmt::Display, expected: &'static str) -> Self {
        Self {
            expected,
            actual: format!("data type {data_type}"),
            column: None,
        }
    }

    /// Decoding error for a value that does not fit the requested width.
    pub fn overflow(value: impl fmt::Display, expected: &'static str) -> Self {
        Self {
            expected,
            actual: format!("out of range value {value}"),
            column: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::PacketTooLarge(e) => write!(f, "Packet too large: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PacketTooLargeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<PacketTooLargeError> for Error {
    fn from(err: PacketTooLargeError) -> Self {
        Error::PacketTooLarge(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_and_code_helpers() {
        let query = QueryError {
            kind: QueryErrorKind::Integrity,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            sqlstate: Some("23000".to_string()),
            code: Some(1062),
            message: "Duplicate entry '1' for key 'PRIMARY'".to_string(),
            source: None,
        };

        assert!(query.is_duplicate_key());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert_eq!(err.sqlstate(), Some("23000"));
        assert_eq!(err.code(), Some(1062));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn retryable_and_connection_flags() {
        let rollback = Error::Query(QueryError {
            kind: QueryErrorKind::TransactionRollback,
            sql: None,
            sqlstate: Some("40001".to_string()),
            code: Some(1213),
            message: "Deadlock found".to_string(),
            source: None,
        });
        assert!(rollback.is_retryable());
        assert!(!rollback.is_connection_error());

        let unsent = Error::PacketTooLarge(PacketTooLargeError {
            message: "query size (20) is >= to max_allowed_packet (10)".to_string(),
            must_reconnect: false,
        });
        assert!(unsent.is_retryable());
        assert!(!unsent.is_connection_error());

        let partial = Error::PacketTooLarge(PacketTooLargeError {
            message: "query size (20) is >= to max_allowed_packet (10)".to_string(),
            must_reconnect: true,
        });
        assert!(!partial.is_retryable());
        assert!(partial.is_connection_error());

        let closed = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Closed,
            message: "Connection is closed".to_string(),
            sqlstate: Some("08000".to_string()),
            code: Some(1220),
            source: None,
        });
        assert!(closed.is_connection_error());
        assert_eq!(closed.sqlstate(), Some("08000"));
        assert_eq!(closed.code(), Some(1220));
    }

    #[test]
    fn type_error_names_source_type() {
        let err = Error::Type(TypeError::unsupported("VARCHAR", "Date"));
        assert_eq!(
            err.to_string(),
            "Type error: expected Date, found data type VARCHAR"
        );
    }
}
