//! Shared connection for concurrent tasks.
//!
//! Commands on one connection must not interleave on the wire, so every
//! operation runs under the connection lock. Cancellation is checked before
//! the lock is taken and after the command completed; a command observed as
//! cancelled once its bytes were exchanged closes the connection.
//!
//! The socket I/O of a command is blocking and cannot observe cancellation
//! while it waits, so every socket read and write under the lock is bounded
//! by a timeout. A command that hits it fails and closes the connection,
//! releasing the lock for the waiting tasks.

use std::sync::Arc;
use std::time::Duration;

use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use mariadb_core::error::{ConnectionError, ConnectionErrorKind, Error};
use mariadb_core::{Result, Row, Value};

use crate::config::MariaDbConfig;
use crate::connection::MariaDbConnection;
use crate::message::PrepareResult;
use crate::result::Completion;

fn connection_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: msg.into(),
        sqlstate: None,
        code: None,
        source: None,
    })
}

fn outcome<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(e) => Outcome::Err(e),
    }
}

/// Socket I/O bound applied when the configuration sets no socket timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection shared between tasks behind an async mutex.
pub struct SharedMariaDbConnection {
    inner: Arc<Mutex<MariaDbConnection>>,
    io_timeout: Duration,
}

impl SharedMariaDbConnection {
    pub fn new(conn: MariaDbConnection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bound socket reads and writes by `timeout` when the configuration
    /// sets no socket timeout.
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Connect to the server and wrap the connection.
    pub async fn connect(cx: &Cx, config: MariaDbConfig) -> Outcome<Self, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        match MariaDbConnection::connect(config) {
            Ok(conn) => Outcome::Ok(Self::new(conn)),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Get the inner Arc for cloning.
    pub fn inner(&self) -> &Arc<Mutex<MariaDbConnection>> {
        &self.inner
    }

    async fn run<T>(
        &self,
        cx: &Cx,
        op: impl FnOnce(&mut MariaDbConnection) -> Result<T>,
    ) -> Outcome<T, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(connection_error("Failed to acquire connection lock"));
        };
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        if let Err(e) = guard.bound_socket_io(self.io_timeout) {
            return Outcome::Err(e);
        }

        let result = op(&mut *guard);
        if let Err(e) = &result {
            if guard.is_closed() {
                tracing::debug!("shared connection {} closed: {}", guard.thread_id(), e);
            }
        }

        if let Some(reason) = cx.cancel_reason() {
            tracing::debug!("command cancelled, closing connection {}", guard.thread_id());
            guard.close();
            return Outcome::Cancelled(reason);
        }
        outcome(result)
    }

    pub async fn query(&self, cx: &Cx, sql: &str) -> Outcome<Vec<Completion>, Error> {
        self.run(cx, |conn| conn.query(sql)).await
    }

    pub async fn query_rows(&self, cx: &Cx, sql: &str) -> Outcome<Vec<Row>, Error> {
        self.run(cx, |conn| conn.query_rows(sql)).await
    }

    pub async fn execute_sql(&self, cx: &Cx, sql: &str) -> Outcome<u64, Error> {
        self.run(cx, |conn| conn.execute_sql(sql)).await
    }

    pub async fn prepare(&self, cx: &Cx, sql: &str) -> Outcome<Arc<PrepareResult>, Error> {
        self.run(cx, |conn| conn.prepare(sql)).await
    }

    pub async fn execute_prepared(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Completion>, Error> {
        self.run(cx, |conn| conn.execute_prepared(sql, params)).await
    }

    pub async fn ping(&self, cx: &Cx) -> Outcome<(), Error> {
        self.run(cx, |conn| conn.ping()).await
    }

    pub async fn reset(&self, cx: &Cx) -> Outcome<(), Error> {
        self.run(cx, |conn| conn.reset()).await
    }

    /// Close the connection. Later operations fail with a closed
    /// connection error.
    pub async fn close(&self, cx: &Cx) -> Outcome<(), Error> {
        let Ok(mut guard) = self.inner.lock(cx).await else {
            return Outcome::Err(connection_error("Failed to acquire connection lock"));
        };
        guard.close();
        Outcome::Ok(())
    }
}

impl Clone for SharedMariaDbConnection {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            io_timeout: self.io_timeout,
        }
    }
}

impl std::fmt::Debug for SharedMariaDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMariaDbConnection")
            .field("inner", &"Arc<Mutex<MariaDbConnection>>")
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}
