//! MariaDB connection.
//!
//! This module drives the client side of the protocol: socket setup, the
//! handshake and authentication exchange, post-connection session setup,
//! and the execution engine reading the completions of each command.
//!
//! The protocol is half-duplex. Every public operation runs to the end of
//! the server response before returning, except [`MariaDbConnection::query_stream`]
//! whose [`RowStream`] keeps the connection borrowed; rows it leaves unread
//! are skipped before the next command.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use mariadb_core::error::{ConnectionError, ConnectionErrorKind, Error, ProtocolError};
use mariadb_core::{Result, Row, Value};
use regex::Regex;

use crate::auth::{self, native::native_password, plugins, trim_seed};
use crate::column::ColumnDefinition;
use crate::config::{MariaDbConfig, SslMode, TimeZoneSetting, TransportKind};
use crate::context::Context;
use crate::decode::Encoding;
use crate::error_mapping::ExceptionFactory;
use crate::host::HostAddress;
use crate::message::{
    AuthSwitchPacket, BatchQueryPacket, ClientMessage, ClosePreparePacket, ErrorPacket, ExecutePacket,
    HandshakeResponse, InitialHandshake, OkPacket, PingPacket, PreparePacket, PrepareResult,
    QueryPacket, QuitPacket, ResetConnectionPacket,
};
use crate::prepare_cache::PrepareCache;
use crate::protocol::{
    PacketReader, PacketWriter, ReadableBuf, capabilities, charset, thread_log_prefix,
};
use crate::result::{self, Completion, EOF, ERROR, LOCAL_INFILE, OK, ResultSet, RowStream};
use crate::security::parse_session_variables;
use crate::version::ServerVersion;

/// Size of the chunks a local file is sent in.
const LOCAL_INFILE_CHUNK: usize = 8192;

/// Server error: unknown or incorrect time zone.
const ER_UNKNOWN_TIME_ZONE: u16 = 1298;

/// Leading comments, an optional statement timeout prefix, then the
/// `LOAD DATA LOCAL INFILE` clause up to the file name.
const LOAD_LOCAL_INFILE_PREFIX: &str = r"(?i)^(\s*/\*([^*]|\*[^/])*\*/)*\s*(SET\s+STATEMENT\s+max_statement_time=[0-9.]+\s+FOR\s+)?LOAD\s+(DATA|XML)\s+((LOW_PRIORITY|CONCURRENT)\s+)?LOCAL\s+INFILE\s+";

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, waiting for the server greeting
    Connecting,
    /// Performing the authentication exchange
    Authenticating,
    /// Ready for commands
    Ready,
    /// Closed by the client or after a fatal error
    Closed,
}

/// What a dropped row stream left on the socket.
#[derive(Debug)]
struct PendingStream {
    message: QueryPacket,
    factory: ExceptionFactory,
    rows_open: bool,
}

/// First part of a response, before any result set rows.
enum Response {
    Ok(OkPacket),
    Prepare(PrepareResult),
    Columns(Arc<[ColumnDefinition]>),
}

#[derive(Debug)]
enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Socket {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Socket::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_write_timeout(timeout),
            #[cfg(unix)]
            Socket::Unix(s) => s.set_write_timeout(timeout),
        }
    }

    fn shutdown(&self) {
        let outcome = match self {
            Socket::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Socket::Unix(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = outcome {
            tracing::debug!("error closing socket: {}", e);
        }
    }
}

type Streams = (Box<dyn Read + Send>, Box<dyn Write + Send>, Socket);

fn connection_error(
    kind: ConnectionErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message,
        sqlstate: Some("08000".to_string()),
        code: None,
        source,
    })
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}

/// Errors after which the exchange with the server cannot continue.
fn is_fatal(err: &Error) -> bool {
    match err {
        Error::Io(_) | Error::Protocol(_) => true,
        Error::Connection(e) => e.kind != ConnectionErrorKind::NonTransient,
        Error::PacketTooLarge(e) => e.must_reconnect,
        _ => false,
    }
}

fn connect_tcp(host: &HostAddress, config: &MariaDbConfig) -> Result<TcpStream> {
    let addrs = (host.host.as_str(), host.port).to_socket_addrs().map_err(|e| {
        connection_error(
            ConnectionErrorKind::Connect,
            format!("Failed to resolve {}:{}: {}", host.host, host.port, e),
            Some(Box::new(e)),
        )
    })?;

    let mut last_error = None;
    for addr in addrs {
        let attempt = if config.connect_timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, config.connect_timeout)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    let Some(e) = last_error else {
        return Err(connection_error(
            ConnectionErrorKind::Connect,
            format!("No address found for {}:{}", host.host, host.port),
            None,
        ));
    };
    let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Err(connection_error(
        kind,
        format!("Failed to connect to {}:{}: {}", host.host, host.port, e),
        Some(Box::new(e)),
    ))
}

fn tcp_streams(stream: TcpStream) -> io::Result<Streams> {
    stream.set_nodelay(true)?;
    let input = BufReader::new(stream.try_clone()?);
    let output = stream.try_clone()?;
    Ok((Box::new(input), Box::new(output), Socket::Tcp(stream)))
}

#[cfg(unix)]
fn unix_streams(path: &std::path::Path) -> Result<Streams> {
    let stream = UnixStream::connect(path).map_err(|e| {
        connection_error(
            ConnectionErrorKind::Connect,
            format!("Failed to connect to socket {}: {}", path.display(), e),
            Some(Box::new(e)),
        )
    })?;
    let input = BufReader::new(stream.try_clone()?);
    let output = stream.try_clone()?;
    Ok((Box::new(input), Box::new(output), Socket::Unix(stream)))
}

#[cfg(not(unix))]
fn unix_streams(path: &std::path::Path) -> Result<Streams> {
    Err(connection_error(
        ConnectionErrorKind::Connect,
        format!(
            "Unix domain sockets are not supported on this platform ({})",
            path.display()
        ),
        None,
    ))
}

/// Does `filename` match the file named by the `LOAD DATA LOCAL INFILE`
/// statement the message sent?
fn valid_local_infile(message: &dyn ClientMessage, filename: &str) -> bool {
    let Some(sql) = message.description() else {
        return false;
    };
    let literal = format!("{LOAD_LOCAL_INFILE_PREFIX}'{}'", regex::escape(filename));
    if Regex::new(&literal).is_ok_and(|re| re.is_match(sql)) {
        return true;
    }
    match message.infile_parameter() {
        Some(parameter) if parameter.eq_ignore_ascii_case(filename) => {
            Regex::new(&format!(r"{LOAD_LOCAL_INFILE_PREFIX}\?")).is_ok_and(|re| re.is_match(sql))
        }
        _ => false,
    }
}

fn same_time_zone(server: &str, client: &str) -> bool {
    let utc = |zone: &str| {
        matches!(
            zone.to_ascii_uppercase().as_str(),
            "UTC" | "UCT" | "Z" | "GMT" | "ZULU" | "+00:00" | "ETC/UTC" | "ETC/GMT"
        )
    };
    server.eq_ignore_ascii_case(client) || (utc(server) && utc(client))
}

/// Does the server name the isolation variable `transaction_isolation`
/// (MySQL 8.0.3+ and 5.7.20+) rather than `tx_isolation`?
fn uses_transaction_isolation(version: &ServerVersion) -> bool {
    !version.is_mariadb()
        && (version.version_greater_or_equal(8, 0, 3)
            || (version.major() < 8 && version.version_greater_or_equal(5, 7, 20)))
}

/// A connection to a MariaDB or MySQL server.
pub struct MariaDbConnection {
    config: MariaDbConfig,
    host: Option<HostAddress>,
    reader: PacketReader,
    writer: PacketWriter,
    context: Context,
    exception_factory: ExceptionFactory,
    prepare_cache: Option<PrepareCache>,
    /// Statements evicted from the cache while still held by the caller.
    evicted: Vec<Arc<PrepareResult>>,
    pending: Option<PendingStream>,
    state: ConnectionState,
    socket: Option<Socket>,
    log_prefix: String,
}

impl std::fmt::Debug for MariaDbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MariaDbConnection")
            .field("state", &self.state)
            .field("thread_id", &self.context.thread_id())
            .field("host", &self.host)
            .field("database", &self.context.database())
            .field("server_version", &self.context.version().as_str())
            .finish_non_exhaustive()
    }
}

impl MariaDbConnection {
    /// Connect to the first reachable configured host.
    ///
    /// Performs the socket connection, the handshake, the authentication
    /// exchange and the session setup.
    pub fn connect(config: MariaDbConfig) -> Result<Self> {
        if config.ssl_mode != SslMode::Disable {
            return Err(connection_error(
                ConnectionErrorKind::Ssl,
                format!(
                    "SSL mode {:?} requested, but TLS is not supported by this connector",
                    config.ssl_mode
                ),
                None,
            ));
        }

        match config.transport.clone() {
            TransportKind::Tcp => {
                let mut last_error = None;
                for host in config.hosts.clone() {
                    match connect_tcp(&host, &config) {
                        Ok(stream) => {
                            let (input, output, socket) = tcp_streams(stream)?;
                            return Self::establish(config, Some(host), input, output, Some(socket));
                        }
                        Err(e) => {
                            tracing::debug!("connection to {} failed: {}", host, e);
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    connection_error(
                        ConnectionErrorKind::Connect,
                        "No host configured".to_string(),
                        None,
                    )
                }))
            }
            TransportKind::Unix(path) => {
                let (input, output, socket) = unix_streams(&path)?;
                let host = config.primary_host().cloned();
                Self::establish(config, host, input, output, Some(socket))
            }
            TransportKind::NamedPipe(name) => Err(connection_error(
                ConnectionErrorKind::Connect,
                format!("Named pipe '{name}' cannot be opened: named pipes are only available on Windows"),
                None,
            )),
        }
    }

    /// Run the connection protocol over already opened streams.
    pub fn connect_stream(
        config: MariaDbConfig,
        input: Box<dyn Read + Send>,
        output: Box<dyn Write + Send>,
    ) -> Result<Self> {
        let host = config.primary_host().cloned();
        Self::establish(config, host, input, output, None)
    }

    fn establish(
        config: MariaDbConfig,
        host: Option<HostAddress>,
        input: Box<dyn Read + Send>,
        output: Box<dyn Write + Send>,
        socket: Option<Socket>,
    ) -> Result<Self> {
        if let Some(socket) = &socket {
            if !config.connect_timeout.is_zero() {
                socket.set_read_timeout(Some(config.connect_timeout))?;
            }
        }

        let mut reader = PacketReader::new(input, config.max_query_size_to_log);
        let mut writer =
            PacketWriter::new(output, config.max_query_size_to_log, config.max_allowed_packet);
        let mut exception_factory = ExceptionFactory::new(
            config.dump_queries_on_exception,
            config.max_query_size_to_log,
            config.allow_local_infile,
        );

        let greeting = match reader.read_packet() {
            Ok(packet) => packet,
            Err(e) => {
                if let Some(socket) = &socket {
                    socket.shutdown();
                }
                return Err(e);
            }
        };
        if greeting.first() == Some(&ERROR) {
            if let Some(socket) = &socket {
                socket.shutdown();
            }
            let err = ErrorPacket::decode(&greeting)?;
            return Err(exception_factory.from_server(&err.message, &err.sqlstate, err.code));
        }
        let handshake = InitialHandshake::decode(&greeting)?;

        exception_factory.set_thread_id(handshake.thread_id);
        let log_prefix = thread_log_prefix(
            Some(handshake.thread_id),
            host.as_ref().map(|h| h.primary),
        );
        reader.set_server_thread_log(log_prefix.clone());
        writer.set_server_thread_log(log_prefix.clone());

        let client_capabilities = config.client_capabilities() & handshake.capabilities;
        let context = Context::new(
            &handshake,
            client_capabilities,
            config.database.clone(),
            config.isolation_level,
        );
        let prepare_cache = config
            .cache_prep_stmts
            .then(|| PrepareCache::new(config.prep_stmt_cache_size));

        tracing::debug!(
            "{} connected to {} server {}",
            log_prefix,
            if handshake.version.is_mariadb() { "MariaDB" } else { "MySQL" },
            handshake.version
        );

        let mut conn = Self {
            config,
            host,
            reader,
            writer,
            context,
            exception_factory,
            prepare_cache,
            evicted: Vec::new(),
            pending: None,
            state: ConnectionState::Connecting,
            socket,
            log_prefix,
        };

        if let Err(e) = conn.authenticate(&handshake) {
            return Err(conn.fail(e));
        }
        conn.state = ConnectionState::Ready;

        if let Some(socket) = &conn.socket {
            socket.set_read_timeout(conn.config.socket_timeout)?;
        }
        if let Err(e) = conn.post_connection() {
            return Err(conn.fail(e));
        }
        Ok(conn)
    }

    /// Send the handshake response, then follow authentication switches
    /// until the server accepts or rejects the credentials.
    fn authenticate(&mut self, handshake: &InitialHandshake) -> Result<()> {
        self.state = ConnectionState::Authenticating;
        let password = self.config.password.clone();
        let auth_data = native_password(password.as_deref().unwrap_or_default(), trim_seed(&handshake.seed));
        let host = self
            .host
            .as_ref()
            .map_or_else(|| "localhost".to_string(), |h| h.host.clone());

        let response = HandshakeResponse {
            client_capabilities: self.context.client_capabilities(),
            charset: charset::decide_language(handshake.default_collation),
            user: self.config.user.as_deref().unwrap_or_default(),
            auth_data: &auth_data,
            auth_plugin: plugins::MYSQL_NATIVE_PASSWORD,
            database: self.config.database.as_deref(),
            host: &host,
            connection_attributes: self.config.connection_attributes.as_deref(),
        };
        self.writer.set_sequence(self.reader.sequence());
        self.writer.permit_trace(false);
        let sent = response.encode(&mut self.writer);
        self.writer.permit_trace(true);
        sent?;

        let mut packet = self.reader.read_packet()?;
        loop {
            match packet.first().copied() {
                Some(EOF) => {
                    let switch = AuthSwitchPacket::decode(&packet)?;
                    tracing::debug!(
                        "{} authentication switch to {}",
                        self.log_prefix,
                        switch.plugin
                    );
                    let mut plugin = auth::plugin_for(
                        &switch.plugin,
                        self.config.restricted_auth.as_deref(),
                        &self.exception_factory,
                    )?;
                    if plugin.requires_ssl() {
                        return Err(self.exception_factory.create_with_state(
                            &format!(
                                "Cannot use authentication plugin {} if SSL is not enabled.",
                                plugin.name()
                            ),
                            "08000",
                        ));
                    }
                    plugin.initialize(password.as_deref(), &switch.seed, &self.config);
                    packet = plugin.process(&mut self.writer, &mut self.reader, &self.context)?;
                }
                Some(ERROR) => {
                    let err = ErrorPacket::decode(&packet)?;
                    return Err(self
                        .exception_factory
                        .from_server(&err.message, &err.sqlstate, err.code));
                }
                Some(OK) => {
                    OkPacket::decode(&packet, &mut self.context)?;
                    return Ok(());
                }
                other => {
                    return Err(protocol_error(format!(
                        "unexpected packet during authentication: header {other:?}"
                    )));
                }
            }
        }
    }

    /// Session setup, sent as one pipelined batch.
    fn post_connection(&mut self) -> Result<()> {
        let timezone = self.session_time_zone().map_err(|e| self.initialization_error(e, None))?;

        let mut assignments = Vec::new();
        if let Some(autocommit) = self.config.autocommit {
            assignments.push(format!("autocommit={}", u8::from(autocommit)));
        }
        if let Some(variables) = &self.config.session_variables {
            let variables = parse_session_variables(variables);
            if !variables.is_empty() {
                assignments.push(variables);
            }
        }
        if let Some(zone) = &timezone {
            assignments.push(format!("time_zone='{zone}'"));
        }
        if let Some(level) = self.config.isolation_level {
            let variable = if uses_transaction_isolation(self.context.version()) {
                "transaction_isolation"
            } else {
                "tx_isolation"
            };
            assignments.push(format!("@@session.{variable}='{}'", level.as_sql()));
        }

        let mut commands = Vec::new();
        if !assignments.is_empty() {
            commands.push(QueryPacket::new(format!("set {}", assignments.join(","))));
        }
        let replica = self.host.as_ref().is_some_and(|h| !h.primary);
        if replica && self.context.version().version_greater_or_equal(5, 6, 5) {
            commands.push(QueryPacket::new("SET SESSION TRANSACTION READ ONLY"));
        }
        if let Some(init_sql) = &self.config.init_sql {
            commands.extend(
                init_sql
                    .split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(QueryPacket::new),
            );
        }
        if commands.is_empty() {
            return Ok(());
        }

        let messages: Vec<&dyn ClientMessage> =
            commands.iter().map(|c| c as &dyn ClientMessage).collect();
        self.execute_pipeline_inner(&messages)
            .map(|_| ())
            .map_err(|e| self.initialization_error(e, timezone.as_deref()))
    }

    /// Time zone to set on the session, `None` when the server already
    /// uses it or time zone handling is disabled.
    fn session_time_zone(&mut self) -> Result<Option<String>> {
        let client_zone = match &self.config.timezone {
            TimeZoneSetting::Disable => return Ok(None),
            TimeZoneSetting::Auto => match std::env::var("TZ") {
                Ok(zone) if !zone.trim().is_empty() => zone.trim().trim_start_matches(':').to_string(),
                _ => return Ok(None),
            },
            TimeZoneSetting::Named(zone) => zone.clone(),
        };

        let server_zone = self.server_time_zone()?;
        tracing::debug!(
            "{} server time zone {:?}, client time zone {}",
            self.log_prefix,
            server_zone,
            client_zone
        );
        if server_zone.as_deref().is_some_and(|zone| same_time_zone(zone, &client_zone)) {
            return Ok(None);
        }
        Ok(Some(client_zone))
    }

    fn server_time_zone(&mut self) -> Result<Option<String>> {
        let message = QueryPacket::new("SELECT @@time_zone, @@system_time_zone");
        let (time_zone, system_time_zone) = match self.execute_inner(&message) {
            Ok(completions) => {
                let mut time_zone = None;
                let mut system_time_zone = None;
                if let Some(mut rs) = completions.into_iter().find_map(Completion::into_result_set) {
                    if rs.next_row() {
                        time_zone = rs.get_string(0)?;
                        system_time_zone = rs.get_string(1)?;
                    }
                }
                (time_zone, system_time_zone)
            }
            Err(e) if !is_fatal(&e) => {
                tracing::debug!(
                    "{} time zone query failed ({}), using SHOW VARIABLES",
                    self.log_prefix,
                    e
                );
                self.show_time_zone_variables()?
            }
            Err(e) => return Err(e),
        };

        Ok(match time_zone {
            Some(zone) if zone.eq_ignore_ascii_case("SYSTEM") => system_time_zone,
            other => other,
        })
    }

    fn show_time_zone_variables(&mut self) -> Result<(Option<String>, Option<String>)> {
        let message = QueryPacket::new(
            "SHOW VARIABLES WHERE Variable_name in ('system_time_zone','time_zone')",
        );
        let mut time_zone = None;
        let mut system_time_zone = None;
        for completion in self.execute_inner(&message)? {
            let Some(mut rs) = completion.into_result_set() else {
                continue;
            };
            while rs.next_row() {
                let name = rs.get_string(0)?.unwrap_or_default();
                let value = rs.get_string(1)?;
                if name.eq_ignore_ascii_case("time_zone") {
                    time_zone = value;
                } else if name.eq_ignore_ascii_case("system_time_zone") {
                    system_time_zone = value;
                }
            }
        }
        Ok((time_zone, system_time_zone))
    }

    fn initialization_error(&self, err: Error, timezone: Option<&str>) -> Error {
        if is_fatal(&err) {
            return err;
        }
        let message = match timezone {
            Some(zone) if err.code() == Some(ER_UNKNOWN_TIME_ZONE) => format!(
                "Setting configured timezone '{zone}' fail on server.\nLook at https://mariadb.com/kb/en/mysql_tzinfo_to_sql/ to load tz data on server, or set timezone=disable to disable setting client timezone."
            ),
            _ => format!("Initialization command fail: {err}"),
        };
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Initialization,
            message,
            sqlstate: err.sqlstate().map(str::to_string),
            code: err.code(),
            source: Some(Box::new(err)),
        })
    }

    // ==================== State ====================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Bound every socket read and write: by the configured socket timeout,
    /// or `timeout` when none is set. Returns the bound in force, `None` on
    /// a connection without socket.
    pub(crate) fn bound_socket_io(&self, timeout: Duration) -> Result<Option<Duration>> {
        let Some(socket) = &self.socket else {
            return Ok(None);
        };
        let bound = self.config.socket_timeout.unwrap_or(timeout);
        socket.set_read_timeout(Some(bound))?;
        socket.set_write_timeout(Some(bound))?;
        Ok(Some(bound))
    }

    /// Server thread id of this connection.
    pub fn thread_id(&self) -> u64 {
        self.context.thread_id()
    }

    pub fn server_version(&self) -> &ServerVersion {
        self.context.version()
    }

    /// Current database, tracked through session state changes.
    pub fn database(&self) -> Option<&str> {
        self.context.database()
    }

    pub fn server_status(&self) -> u16 {
        self.context.server_status()
    }

    /// Warnings of the last command.
    pub fn warnings(&self) -> u16 {
        self.context.warning()
    }

    pub fn in_transaction(&self) -> bool {
        self.context.server_status() & crate::protocol::server_status::IN_TRANSACTION != 0
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> &MariaDbConfig {
        &self.config
    }

    pub fn host(&self) -> Option<&HostAddress> {
        self.host.as_ref()
    }

    /// Number of statements in the prepared statement cache.
    pub fn cached_statements(&self) -> usize {
        self.prepare_cache.as_ref().map_or(0, PrepareCache::len)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(connection_error(
                ConnectionErrorKind::Closed,
                format!("(conn={}) Connection is closed", self.context.thread_id()),
                None,
            ));
        }
        Ok(())
    }

    /// Run `op`, closing the connection when it fails fatally.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        op(self).map_err(|e| {
            if is_fatal(&e) {
                self.fail(e)
            } else {
                e
            }
        })
    }

    /// Tear the connection down after `err`, reporting socket errors as a
    /// lost connection.
    fn fail(&mut self, err: Error) -> Error {
        self.destroy();
        match err {
            Error::Io(e) => connection_error(
                ConnectionErrorKind::Disconnected,
                format!("(conn={}) socket error: {}", self.context.thread_id(), e),
                Some(Box::new(e)),
            ),
            other => other,
        }
    }

    fn destroy(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::debug!("{} closing connection", self.log_prefix);
        self.state = ConnectionState::Closed;
        self.pending = None;
        if let Some(socket) = self.socket.take() {
            socket.shutdown();
        }
    }

    /// Send COM_QUIT and close the socket. Never fails.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Err(e) = QuitPacket.encode(&mut self.writer, &self.context) {
            tracing::debug!("{} error sending COM_QUIT: {}", self.log_prefix, e);
        }
        self.destroy();
    }

    // ==================== Execution engine ====================

    fn can_pipeline(&self) -> bool {
        !self.config.disable_pipeline
            && self
                .context
                .has_client_capability(capabilities::STMT_BULK_OPERATIONS)
    }

    fn factory_for(&self, message: &dyn ClientMessage) -> ExceptionFactory {
        match message.description() {
            Some(sql) => self.exception_factory.with_sql(sql),
            None => self.exception_factory.clone(),
        }
    }

    fn send(&mut self, message: &dyn ClientMessage) -> Result<usize> {
        if let Some(sql) = message.description() {
            tracing::debug!("{} execute query: {}", self.log_prefix, sql);
        }
        message.encode(&mut self.writer, &self.context)
    }

    fn execute_inner(&mut self, message: &dyn ClientMessage) -> Result<Vec<Completion>> {
        self.drain_pending()?;
        let factory = self.factory_for(message);
        let responses = self.send(message)?;
        self.read_results(message, &factory, responses)
    }

    /// Read `responses` response groups, each followed by its additional
    /// results while the server flags more.
    fn read_results(
        &mut self,
        message: &dyn ClientMessage,
        factory: &ExceptionFactory,
        responses: usize,
    ) -> Result<Vec<Completion>> {
        let mut completions = Vec::with_capacity(responses);
        for _ in 0..responses {
            completions.push(self.read_completion(message, factory)?);
            while self.context.has_more_results() {
                completions.push(self.read_completion(message, factory)?);
            }
        }
        Ok(completions)
    }

    fn read_completion(
        &mut self,
        message: &dyn ClientMessage,
        factory: &ExceptionFactory,
    ) -> Result<Completion> {
        Ok(match self.read_response(message, factory)? {
            Response::Ok(ok) => Completion::Ok(ok),
            Response::Prepare(prepare) => Completion::Prepare(Arc::new(prepare)),
            Response::Columns(columns) => {
                let encoding = if message.binary_protocol() {
                    Encoding::Binary
                } else {
                    Encoding::Text
                };
                Completion::ResultSet(ResultSet::read(
                    columns,
                    encoding,
                    &mut self.reader,
                    &mut self.context,
                    factory,
                )?)
            }
        })
    }

    fn read_response(
        &mut self,
        message: &dyn ClientMessage,
        factory: &ExceptionFactory,
    ) -> Result<Response> {
        let packet = self.reader.read_packet()?;
        match packet.first().copied() {
            Some(OK) if message.prepares_statement() => {
                let sql = message.description().unwrap_or_default();
                let prepare = PrepareResult::read(&packet, &mut self.reader, &self.context, sql)?;
                Ok(Response::Prepare(prepare))
            }
            Some(OK) => Ok(Response::Ok(OkPacket::decode(&packet, &mut self.context)?)),
            Some(ERROR) => Err(result::server_error(&packet, &mut self.context, factory)),
            Some(LOCAL_INFILE) => self.local_infile(&packet, message, factory),
            Some(_) => Ok(Response::Columns(self.read_columns(&packet, message)?)),
            None => Err(protocol_error("empty response packet")),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_columns(
        &mut self,
        header: &[u8],
        message: &dyn ClientMessage,
    ) -> Result<Arc<[ColumnDefinition]>> {
        let mut buf = ReadableBuf::new(header);
        let count = buf.read_length_not_null()? as usize;

        if self.context.can_skip_meta() && message.can_skip_meta() && buf.read_u8()? == 0 {
            return message
                .cached_columns()
                .ok_or_else(|| protocol_error("server skipped metadata the client does not have"));
        }

        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(ColumnDefinition::decode(
                self.reader.read_packet()?,
                self.context.is_extended_info(),
            )?);
        }
        if !self.context.is_eof_deprecated() {
            self.reader.skip_packet()?;
        }
        Ok(columns.into())
    }

    /// Answer a LOCAL INFILE request, then read the response it completes.
    ///
    /// A rejected or unreadable file is answered with an empty content so
    /// the exchange stays in sync; the error is raised once the server has
    /// answered.
    fn local_infile(
        &mut self,
        packet: &[u8],
        message: &dyn ClientMessage,
        factory: &ExceptionFactory,
    ) -> Result<Response> {
        let filename = String::from_utf8_lossy(&packet[1..]).into_owned();
        self.writer.set_sequence(self.reader.sequence());

        let deferred = if let Some(mut content) = message.local_infile_stream() {
            self.send_local_infile(&mut content, factory)?
        } else if !valid_local_infile(message, &filename) {
            self.writer.write_empty_packet()?;
            Some(factory.create_with_state(
                &format!(
                    "LOAD DATA LOCAL INFILE asked for file '{}' that doesn't correspond to initial query {}. Possible malicious proxy changing server answer ! Command interrupted",
                    filename,
                    message.description().unwrap_or_default()
                ),
                "HY000",
            ))
        } else {
            match File::open(&filename) {
                Ok(mut file) => self.send_local_infile(&mut file, factory)?,
                Err(e) => {
                    self.writer.write_empty_packet()?;
                    Some(factory.create_with_source(
                        &format!("Could not send file : {e}"),
                        "22000",
                        e,
                    ))
                }
            }
        };

        let next = self.read_response(message, factory);
        match (deferred, next) {
            (Some(_), Err(e)) if is_fatal(&e) => Err(e),
            (Some(err), _) => Err(err),
            (None, next) => next,
        }
    }

    fn send_local_infile(
        &mut self,
        content: &mut dyn Read,
        factory: &ExceptionFactory,
    ) -> Result<Option<Error>> {
        let mut chunk = [0u8; LOCAL_INFILE_CHUNK];
        loop {
            let read = match content.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.writer.write_empty_packet()?;
                    return Ok(Some(factory.create_with_source(
                        &format!("Could not send file : {e}"),
                        "22000",
                        e,
                    )));
                }
            };
            self.writer.write_bytes(&chunk[..read])?;
            self.writer.flush()?;
        }
        self.writer.write_empty_packet()?;
        Ok(None)
    }

    /// Send every message before reading any response when pipelining is
    /// possible, otherwise run them one after the other.
    fn execute_pipeline_inner(
        &mut self,
        messages: &[&dyn ClientMessage],
    ) -> Result<Vec<Vec<Completion>>> {
        self.drain_pending()?;
        if messages.len() < 2 || !self.can_pipeline() {
            return messages.iter().map(|m| self.execute_inner(*m)).collect();
        }

        let mut responses = Vec::with_capacity(messages.len());
        let mut send_error = None;
        for message in messages {
            match self.send(*message) {
                Ok(count) => responses.push(count),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    send_error = Some(e);
                    break;
                }
            }
        }

        let mut results = Vec::with_capacity(responses.len());
        let mut first_error = send_error;
        for (message, count) in messages.iter().zip(responses) {
            let factory = self.factory_for(*message);
            match self.read_results(*message, &factory, count) {
                Ok(completions) => results.push(completions),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    } else {
                        tracing::warn!(
                            "{} error while reading pipelined responses: {}",
                            self.log_prefix,
                            e
                        );
                    }
                }
            }
        }

        match first_error {
            None => Ok(results),
            Some(err) => {
                // statements prepared by a failed pipeline are not handed out
                for completion in results.into_iter().flatten() {
                    if let Completion::Prepare(prepare) = completion {
                        if let Err(e) = self.close_statement(prepare.statement_id()) {
                            tracing::debug!(
                                "{} error closing statement {} after failed pipeline: {}",
                                self.log_prefix,
                                prepare.statement_id(),
                                e
                            );
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Skip what a dropped row stream left unread.
    fn drain_pending(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        tracing::debug!("{} skipping unread results", self.log_prefix);
        if pending.rows_open {
            match self.skip_rows(&pending.factory) {
                Ok(()) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => tracing::warn!("{} error skipping rows: {}", self.log_prefix, e),
            }
        }
        while self.context.has_more_results() {
            match self.read_completion(&pending.message, &pending.factory) {
                Ok(_) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => tracing::warn!("{} error skipping results: {}", self.log_prefix, e),
            }
        }
        Ok(())
    }

    fn skip_rows(&mut self, factory: &ExceptionFactory) -> Result<()> {
        while result::read_row(&mut self.reader, &mut self.context, factory)?.is_some() {}
        Ok(())
    }

    pub(crate) fn read_stream_row(&mut self, factory: &ExceptionFactory) -> Result<Option<Vec<u8>>> {
        self.guarded(|conn| result::read_row(&mut conn.reader, &mut conn.context, factory))
    }

    pub(crate) fn read_more_results(
        &mut self,
        message: &QueryPacket,
        factory: &ExceptionFactory,
    ) -> Result<Vec<Completion>> {
        self.guarded(|conn| {
            let mut completions = Vec::new();
            while conn.context.has_more_results() {
                completions.push(conn.read_completion(message, factory)?);
            }
            Ok(completions)
        })
    }

    pub(crate) fn has_more_results(&self) -> bool {
        self.state != ConnectionState::Closed && self.context.has_more_results()
    }

    pub(crate) fn set_pending(
        &mut self,
        message: QueryPacket,
        factory: ExceptionFactory,
        rows_open: bool,
    ) {
        if self.state != ConnectionState::Closed {
            self.pending = Some(PendingStream {
                message,
                factory,
                rows_open,
            });
        }
    }

    fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        ClosePreparePacket::new(statement_id).encode(&mut self.writer, &self.context)?;
        Ok(())
    }

    /// Cache `prepare`, closing whatever statement the cache gives up.
    fn cache_prepare(&mut self, sql: &str, prepare: Arc<PrepareResult>) -> Result<Arc<PrepareResult>> {
        let Some(cache) = self.prepare_cache.as_mut() else {
            return Ok(prepare);
        };
        let (used, released) = cache.put(sql.to_string(), prepare);
        self.evicted.extend(released);
        self.close_evicted()?;
        Ok(used)
    }

    /// Close the evicted statements nobody holds anymore. The others wait for
    /// `close_prepared` or for their last handle to drop.
    fn close_evicted(&mut self) -> Result<()> {
        let (idle, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.evicted)
            .into_iter()
            .partition(|prepare| Arc::strong_count(prepare) == 1);
        self.evicted = held;
        for prepare in idle {
            self.close_statement(prepare.statement_id())?;
        }
        Ok(())
    }

    fn prepare_inner(&mut self, sql: &str) -> Result<Arc<PrepareResult>> {
        if let Some(cached) = self.prepare_cache.as_mut().and_then(|c| c.get(sql)) {
            return Ok(cached);
        }
        let prepare = self
            .execute_inner(&PreparePacket::new(sql))?
            .into_iter()
            .find_map(Completion::into_prepare)
            .ok_or_else(|| protocol_error("COM_STMT_PREPARE answered without a statement"))?;
        self.cache_prepare(sql, prepare)
    }

    fn execute_prepared_inner(&mut self, sql: &str, parameters: Vec<Value>) -> Result<Vec<Completion>> {
        if let Some(prepare) = self.prepare_cache.as_mut().and_then(|c| c.get(sql)) {
            return self.execute_inner(&ExecutePacket::new(&prepare, parameters));
        }

        // MariaDB accepts an execute of "the statement just prepared", so
        // both commands can go in one round trip
        if self.context.version().is_mariadb() && self.can_pipeline() {
            let prepare_message = PreparePacket::new(sql);
            let execute_message = ExecutePacket::for_last_prepared(sql, parameters);
            let mut results =
                self.execute_pipeline_inner(&[&prepare_message, &execute_message])?;
            let completions = results.pop().unwrap_or_default();
            let prepare = results
                .pop()
                .and_then(|c| c.into_iter().find_map(Completion::into_prepare))
                .ok_or_else(|| protocol_error("COM_STMT_PREPARE answered without a statement"))?;
            if self.prepare_cache.is_some() {
                self.cache_prepare(sql, prepare)?;
            } else {
                self.close_statement(prepare.statement_id())?;
            }
            return Ok(completions);
        }

        let prepare = self.prepare_inner(sql)?;
        let completions = self.execute_inner(&ExecutePacket::new(&prepare, parameters));
        if self.prepare_cache.is_none() {
            self.close_statement(prepare.statement_id())?;
        }
        completions
    }

    fn with_statement_timeout(&self, sql: &str) -> String {
        let version = self.context.version();
        match self.config.command_timeout {
            Some(timeout)
                if timeout.as_secs() > 0
                    && version.is_mariadb()
                    && version.version_greater_or_equal(10, 1, 2) =>
            {
                format!("SET STATEMENT max_statement_time={} FOR {}", timeout.as_secs(), sql)
            }
            _ => sql.to_string(),
        }
    }

    // ==================== Public commands ====================

    /// Send one command and read all of its completions.
    pub fn execute(&mut self, message: &dyn ClientMessage) -> Result<Vec<Completion>> {
        self.guarded(|conn| conn.execute_inner(message))
    }

    /// Send several commands, pipelined when the server allows it, and read
    /// their completions in order.
    ///
    /// When one command fails the responses of the others are still read;
    /// the first error is returned.
    pub fn execute_pipeline(
        &mut self,
        messages: &[&dyn ClientMessage],
    ) -> Result<Vec<Vec<Completion>>> {
        self.guarded(|conn| conn.execute_pipeline_inner(messages))
    }

    /// Run a text query and read every completion.
    pub fn query(&mut self, sql: &str) -> Result<Vec<Completion>> {
        let message = QueryPacket::new(self.with_statement_timeout(sql));
        self.execute(&message)
    }

    /// Rows of the first result set of `sql`.
    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.query(sql)?
            .into_iter()
            .find_map(Completion::into_result_set)
            .map_or_else(|| Ok(Vec::new()), ResultSet::into_rows)
    }

    /// Run a statement and return the total of affected rows.
    pub fn execute_sql(&mut self, sql: &str) -> Result<u64> {
        Ok(self.query(sql)?.iter().map(Completion::affected_rows).sum())
    }

    /// Run `sql` once per parameter set, the values escaped into the
    /// statement text by the client.
    ///
    /// With multi statements negotiated the statements travel joined in as
    /// few commands as the packet limits allow, otherwise each set is its
    /// own query. Returns the completions of every statement, in order.
    pub fn execute_batch(&mut self, sql: &str, parameters: &[Vec<Value>]) -> Result<Vec<Completion>> {
        let batch = BatchQueryPacket::new(sql, parameters.to_vec());
        let placeholders = batch.placeholders();
        if let Some(values) = parameters.iter().find(|v| v.len() != placeholders) {
            return Err(self.exception_factory.with_sql(sql).create_with_state(
                &format!(
                    "Parameter count mismatch: {} placeholders, {} values",
                    placeholders,
                    values.len()
                ),
                "HY000",
            ));
        }
        if parameters.is_empty() {
            return Ok(Vec::new());
        }
        if self.context.has_client_capability(capabilities::MULTI_STATEMENTS) {
            return self.execute(&batch);
        }

        let queries: Vec<BatchQueryPacket> = parameters
            .iter()
            .map(|values| BatchQueryPacket::new(sql, vec![values.clone()]))
            .collect();
        let messages: Vec<&dyn ClientMessage> =
            queries.iter().map(|q| q as &dyn ClientMessage).collect();
        Ok(self.execute_pipeline(&messages)?.into_iter().flatten().collect())
    }

    /// Run a text query and stream the rows of its first result set.
    ///
    /// OK completions received before the result set are available through
    /// [`RowStream::preceding`].
    pub fn query_stream(&mut self, sql: &str) -> Result<RowStream<'_>> {
        let message = QueryPacket::new(self.with_statement_timeout(sql));
        let factory = self.factory_for(&message);
        let (columns, preceding) = self.guarded(|conn| {
            conn.drain_pending()?;
            conn.send(&message)?;
            let mut preceding = Vec::new();
            loop {
                match conn.read_response(&message, &factory)? {
                    Response::Columns(columns) => return Ok((columns, preceding)),
                    Response::Ok(ok) => {
                        preceding.push(ok);
                        if !conn.context.has_more_results() {
                            return Ok((Arc::<[ColumnDefinition]>::from(Vec::new()), preceding));
                        }
                    }
                    Response::Prepare(_) => {
                        return Err(protocol_error("unexpected prepare response to a query"));
                    }
                }
            }
        })?;
        Ok(RowStream::new(self, message, factory, columns, preceding))
    }

    /// Prepare `sql` on the server, reusing the cached statement when there
    /// is one.
    ///
    /// Without a prepared statement cache, the caller owns the statement and
    /// releases it with [`close_prepared`](Self::close_prepared).
    pub fn prepare(&mut self, sql: &str) -> Result<Arc<PrepareResult>> {
        self.guarded(|conn| conn.prepare_inner(sql))
    }

    /// Execute `sql` as a prepared statement with binary parameters.
    pub fn execute_prepared(&mut self, sql: &str, parameters: &[Value]) -> Result<Vec<Completion>> {
        let parameters = parameters.to_vec();
        self.guarded(|conn| conn.execute_prepared_inner(sql, parameters))
    }

    /// Release a statement returned by [`prepare`](Self::prepare). Cached
    /// statements stay open until evicted.
    pub fn close_prepared(&mut self, prepare: &PrepareResult) -> Result<()> {
        self.guarded(|conn| {
            let cached = conn
                .prepare_cache
                .as_mut()
                .and_then(|c| c.get(prepare.sql()))
                .is_some_and(|c| c.statement_id() == prepare.statement_id());
            if cached {
                return Ok(());
            }
            conn.evicted
                .retain(|evicted| evicted.statement_id() != prepare.statement_id());
            conn.drain_pending()?;
            conn.close_statement(prepare.statement_id())
        })
    }

    pub fn ping(&mut self) -> Result<()> {
        self.execute(&PingPacket).map(|_| ())
    }

    /// Reset the session state (COM_RESET_CONNECTION): server side prepared
    /// statements, user variables, temporary tables.
    pub fn reset(&mut self) -> Result<()> {
        let version = self.context.version();
        let supported = if version.is_mariadb() {
            version.version_greater_or_equal(10, 2, 4)
        } else {
            version.version_greater_or_equal(5, 7, 3)
        };
        if !supported {
            return Err(self
                .exception_factory
                .not_supported("Reset connection is not supported by this server version"));
        }
        self.guarded(|conn| {
            conn.execute_inner(&ResetConnectionPacket)?;
            if let Some(cache) = conn.prepare_cache.as_mut() {
                cache.reset();
            }
            conn.evicted.clear();
            conn.context.set_warning(0);
            Ok(())
        })
    }
}

impl Drop for MariaDbConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_infile_validation() {
        let query = QueryPacket::new("LOAD DATA LOCAL INFILE '/tmp/data.csv' INTO TABLE t");
        assert!(valid_local_infile(&query, "/tmp/data.csv"));
        assert!(!valid_local_infile(&query, "/etc/passwd"));

        let commented = QueryPacket::new(
            "/* import */ load data concurrent local infile '/tmp/a+b.csv' into table t",
        );
        assert!(valid_local_infile(&commented, "/tmp/a+b.csv"));
        // regex metacharacters in the file name are literal
        assert!(!valid_local_infile(&commented, "/tmp/aab.csv"));

        let timed = QueryPacket::new(
            "SET STATEMENT max_statement_time=5 FOR LOAD DATA LOCAL INFILE 'x.csv' INTO TABLE t",
        );
        assert!(valid_local_infile(&timed, "x.csv"));

        assert!(!valid_local_infile(&QueryPacket::new("SELECT 1"), "x.csv"));
    }

    #[test]
    fn test_local_infile_parameter() {
        let execute = ExecutePacket::for_last_prepared(
            "LOAD DATA LOCAL INFILE ? INTO TABLE t",
            vec![Value::Text("/tmp/Data.csv".to_string())],
        );
        assert!(valid_local_infile(&execute, "/tmp/data.csv"));
        assert!(!valid_local_infile(&execute, "/tmp/other.csv"));
    }

    #[test]
    fn test_same_time_zone() {
        assert!(same_time_zone("UTC", "utc"));
        assert!(same_time_zone("+00:00", "Etc/UTC"));
        assert!(same_time_zone("Europe/Paris", "europe/paris"));
        assert!(!same_time_zone("Europe/Paris", "UTC"));
    }

    #[test]
    fn test_isolation_variable_name() {
        assert!(uses_transaction_isolation(&ServerVersion::new("8.0.36", false)));
        assert!(uses_transaction_isolation(&ServerVersion::new("5.7.22-log", false)));
        assert!(!uses_transaction_isolation(&ServerVersion::new("5.7.19", false)));
        assert!(!uses_transaction_isolation(&ServerVersion::new("10.6.12-MariaDB", true)));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(is_fatal(&Error::Io(io::Error::other("reset"))));
        assert!(is_fatal(&protocol_error("bad packet")));
        assert!(!is_fatal(&Error::Custom("x".to_string())));
        let server_side = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::NonTransient,
            message: "shutdown in progress".to_string(),
            sqlstate: Some("08S01".to_string()),
            code: Some(1053),
            source: None,
        });
        assert!(!is_fatal(&server_side));
    }
}
