//! Server error packets and driver failures mapped onto the error taxonomy.

use mariadb_core::error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds typed errors for one connection.
///
/// Messages are prefixed with `(conn=<thread id>)` and, when enabled, followed
/// by the offending SQL truncated to `max_query_size_to_log`.
#[derive(Debug, Clone, Default)]
pub struct ExceptionFactory {
    thread_id: u64,
    dump_queries: bool,
    max_query_size_to_log: usize,
    allow_local_infile: bool,
    sql: Option<String>,
}

impl ExceptionFactory {
    pub fn new(dump_queries: bool, max_query_size_to_log: usize, allow_local_infile: bool) -> Self {
        Self {
            thread_id: 0,
            dump_queries,
            max_query_size_to_log,
            allow_local_infile,
            sql: None,
        }
    }

    /// Record the server thread id once the handshake is read.
    pub fn set_thread_id(&mut self, thread_id: u64) {
        self.thread_id = thread_id;
    }

    /// A factory attaching `sql` to the errors it builds.
    pub fn with_sql(&self, sql: &str) -> Self {
        Self {
            sql: Some(sql.to_string()),
            ..self.clone()
        }
    }

    /// SQL attached to this factory.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    fn build_message(&self, initial: &str) -> String {
        let mut msg = String::new();
        if self.thread_id != 0 {
            msg.push_str(&format!("(conn={}) ", self.thread_id));
        }
        msg.push_str(initial);

        if self.dump_queries {
            if let Some(sql) = &self.sql {
                msg.push_str("\nQuery is: ");
                let limit = self.max_query_size_to_log;
                if limit != 0 && sql.len() > limit.saturating_sub(3) {
                    msg.push_str(truncate_at_char_boundary(sql, limit.saturating_sub(3)));
                    msg.push_str("...");
                } else {
                    msg.push_str(sql);
                }
            }
        }
        msg
    }

    fn create_error(
        &self,
        initial: &str,
        sqlstate: Option<&str>,
        code: Option<u16>,
        source: Option<BoxError>,
    ) -> Error {
        let message = self.build_message(initial);

        if sqlstate == Some("70100") {
            return self.query_error(QueryErrorKind::Timeout, message, sqlstate, code, source);
        }

        // 4166 MariaDB, 1148 MariaDB 10.2, 3948 MySQL: local infile disabled
        if matches!(code, Some(4166 | 3948 | 1148)) && !self.allow_local_infile {
            return self.query_error(
                QueryErrorKind::Database,
                "Local infile is disabled by connector. Enable `allowLocalInfile` to allow local infile commands"
                    .to_string(),
                sqlstate,
                code,
                source,
            );
        }

        let class = sqlstate.map_or("42", |s| s.get(..2).unwrap_or(s));
        let kind = match class {
            "0A" => QueryErrorKind::FeatureNotSupported,
            "22" | "26" | "2F" | "20" | "42" | "XA" => QueryErrorKind::Syntax,
            "25" | "28" => QueryErrorKind::Authorization,
            "21" | "23" => QueryErrorKind::Integrity,
            "08" => {
                return Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::NonTransient,
                    message,
                    sqlstate: sqlstate.map(str::to_string),
                    code,
                    source,
                });
            }
            "40" => QueryErrorKind::TransactionRollback,
            "HY" => QueryErrorKind::Database,
            _ => QueryErrorKind::Transient,
        };
        self.query_error(kind, message, sqlstate, code, source)
    }

    fn query_error(
        &self,
        kind: QueryErrorKind,
        message: String,
        sqlstate: Option<&str>,
        code: Option<u16>,
        source: Option<BoxError>,
    ) -> Error {
        Error::Query(QueryError {
            kind,
            sql: self.sql.clone(),
            sqlstate: sqlstate.map(str::to_string),
            code,
            message,
            source,
        })
    }

    /// Error for an operation the driver does not support.
    pub fn not_supported(&self, message: &str) -> Error {
        self.create_error(message, Some("0A000"), None, None)
    }

    /// Error with the default syntax class.
    pub fn create(&self, message: &str) -> Error {
        self.create_error(message, Some("42000"), None, None)
    }

    /// Error classified by SQLSTATE.
    pub fn create_with_state(&self, message: &str, sqlstate: &str) -> Error {
        self.create_error(message, Some(sqlstate), None, None)
    }

    /// Error classified by SQLSTATE, keeping the underlying cause.
    pub fn create_with_source(
        &self,
        message: &str,
        sqlstate: &str,
        source: impl Into<BoxError>,
    ) -> Error {
        self.create_error(message, Some(sqlstate), None, Some(source.into()))
    }

    /// Error decoded from a server error packet.
    pub fn from_server(&self, message: &str, sqlstate: &str, code: u16) -> Error {
        self.create_error(message, Some(sqlstate), Some(code), None)
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ExceptionFactory {
        let mut f = ExceptionFactory::new(false, 1024, false);
        f.set_thread_id(42);
        f
    }

    fn query_kind(err: &Error) -> QueryErrorKind {
        match err {
            Error::Query(q) => q.kind,
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[test]
    fn test_sqlstate_classes() {
        let f = factory();
        let cases = [
            ("0A000", QueryErrorKind::FeatureNotSupported),
            ("22003", QueryErrorKind::Syntax),
            ("42S02", QueryErrorKind::Syntax),
            ("XAE07", QueryErrorKind::Syntax),
            ("28000", QueryErrorKind::Authorization),
            ("25000", QueryErrorKind::Authorization),
            ("23000", QueryErrorKind::Integrity),
            ("21S01", QueryErrorKind::Integrity),
            ("40001", QueryErrorKind::TransactionRollback),
            ("HY000", QueryErrorKind::Database),
            ("70100", QueryErrorKind::Timeout),
            ("01000", QueryErrorKind::Transient),
        ];
        for (state, kind) in cases {
            assert_eq!(query_kind(&f.from_server("x", state, 1000)), kind, "{state}");
        }
    }

    #[test]
    fn test_connection_class() {
        let err = factory().from_server("gone", "08S01", 1047);
        match err {
            Error::Connection(c) => {
                assert_eq!(c.kind, ConnectionErrorKind::NonTransient);
                assert_eq!(c.code, Some(1047));
                assert_eq!(c.message, "(conn=42) gone");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_local_infile_disabled_rewording() {
        let err = factory().from_server("The used command is not allowed", "42000", 1148);
        assert!(err.to_string().contains("Local infile is disabled by connector"));

        let allowed = ExceptionFactory::new(false, 1024, true);
        let err = allowed.from_server("The used command is not allowed", "42000", 1148);
        assert!(!err.to_string().contains("Local infile is disabled"));
    }

    #[test]
    fn test_query_dump_truncation() {
        let f = ExceptionFactory::new(true, 10, true).with_sql("select * from some_table");
        let err = f.create("boom");
        match err {
            Error::Query(q) => {
                assert_eq!(q.message, "boom\nQuery is: select ...");
                assert_eq!(q.sql.as_deref(), Some("select * from some_table"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let f = ExceptionFactory::new(true, 0, true).with_sql("select 1");
        match f.create("boom") {
            Error::Query(q) => assert_eq!(q.message, "boom\nQuery is: select 1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_dump_by_default() {
        let f = factory().with_sql("select 1");
        match f.create("boom") {
            Error::Query(q) => assert_eq!(q.message, "(conn=42) boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
