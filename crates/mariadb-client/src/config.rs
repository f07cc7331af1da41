//! MariaDB connection configuration.
//!
//! Built either through the builder methods or parsed from a
//! `Key=Value;Key=Value` connection string. Keys are case-insensitive and
//! most of them accept several aliases.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mariadb_core::error::{ConfigError, Error};
use mariadb_core::Result;

use crate::host::{DEFAULT_PORT, HostAddress};
use crate::protocol::capabilities;

/// SSL mode.
///
/// Only `Disable` can currently connect: TLS negotiation is not implemented,
/// so any other mode fails the connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Trust,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disable" | "disabled" | "none" | "false" => Some(SslMode::Disable),
            "trust" | "preferred" | "required" | "true" => Some(SslMode::Trust),
            "verify-ca" | "verifyca" => Some(SslMode::VerifyCa),
            "verify-full" | "verifyfull" | "verify-identity" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }
}

/// How to reach the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// TCP to each configured host.
    #[default]
    Tcp,
    /// Unix domain socket at the given path.
    Unix(PathBuf),
    /// Windows named pipe with the given name.
    NamedPipe(String),
}

/// Session time zone handling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimeZoneSetting {
    /// Leave the server time zone alone.
    #[default]
    Disable,
    /// Use the client time zone (the `TZ` environment variable).
    Auto,
    /// Use this named time zone.
    Named(String),
}

impl TimeZoneSetting {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("disable") {
            TimeZoneSetting::Disable
        } else if value.eq_ignore_ascii_case("auto") {
            TimeZoneSetting::Auto
        } else {
            TimeZoneSetting::Named(value.to_string())
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, TimeZoneSetting::Disable)
    }
}

impl std::fmt::Display for TimeZoneSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeZoneSetting::Disable => f.write_str("disable"),
            TimeZoneSetting::Auto => f.write_str("auto"),
            TimeZoneSetting::Named(name) => f.write_str(name),
        }
    }
}

/// Transaction isolation level set at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Value used in `SET tx_isolation='…'`.
    pub const fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ-UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ-COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE-READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '_'], "-");
        match normalized.as_str() {
            "READ-UNCOMMITTED" | "READUNCOMMITTED" => Some(IsolationLevel::ReadUncommitted),
            "READ-COMMITTED" | "READCOMMITTED" => Some(IsolationLevel::ReadCommitted),
            "REPEATABLE-READ" | "REPEATABLEREAD" => Some(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Some(IsolationLevel::Serializable),
            _ => None,
        }
    }
}

/// MariaDB connection configuration.
#[derive(Debug, Clone)]
pub struct MariaDbConfig {
    /// Server endpoints. Only the first one is used; there is no failover.
    pub hosts: Vec<HostAddress>,
    pub transport: TransportKind,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: SslMode,
    pub connect_timeout: Duration,
    /// Socket read timeout, `None` to block indefinitely.
    pub socket_timeout: Option<Duration>,
    /// Server-side statement timeout (MariaDB 10.1.2+).
    pub command_timeout: Option<Duration>,
    /// Client-side `max_allowed_packet` guard.
    pub max_allowed_packet: Option<u64>,
    /// Accepted but not negotiated: the compressed protocol is not implemented.
    pub use_compression: bool,
    pub allow_multi_queries: bool,
    pub allow_local_infile: bool,
    pub cache_prep_stmts: bool,
    pub prep_stmt_cache_size: usize,
    pub disable_pipeline: bool,
    pub autocommit: Option<bool>,
    pub init_sql: Option<String>,
    pub session_variables: Option<String>,
    pub timezone: TimeZoneSetting,
    pub isolation_level: Option<IsolationLevel>,
    /// Comma separated list of permitted authentication plugins.
    pub restricted_auth: Option<String>,
    /// Extra `key:value,key:value` connection attributes.
    pub connection_attributes: Option<String>,
    pub dump_queries_on_exception: bool,
    pub max_query_size_to_log: usize,
}

impl Default for MariaDbConfig {
    fn default() -> Self {
        Self {
            hosts: vec![HostAddress::new("localhost", DEFAULT_PORT)],
            transport: TransportKind::Tcp,
            user: None,
            password: None,
            database: None,
            ssl_mode: SslMode::Disable,
            connect_timeout: Duration::from_secs(30),
            socket_timeout: None,
            command_timeout: None,
            max_allowed_packet: None,
            use_compression: false,
            allow_multi_queries: false,
            allow_local_infile: false,
            cache_prep_stmts: true,
            prep_stmt_cache_size: 250,
            disable_pipeline: false,
            autocommit: Some(true),
            init_sql: None,
            session_variables: None,
            timezone: TimeZoneSetting::Disable,
            isolation_level: None,
            restricted_auth: None,
            connection_attributes: None,
            dump_queries_on_exception: false,
            max_query_size_to_log: 1024,
        }
    }
}

impl MariaDbConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the host list with a single host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        let port = self.hosts.first().map_or(DEFAULT_PORT, |h| h.port);
        self.hosts = vec![HostAddress::new(host, port)];
        self
    }

    /// Set the port of every configured host.
    pub fn port(mut self, port: u16) -> Self {
        for host in &mut self.hosts {
            host.port = port;
        }
        self
    }

    /// Set the host list from a host specification (see [`HostAddress::parse`]).
    pub fn hosts(mut self, spec: &str) -> Result<Self> {
        self.hosts = HostAddress::parse(spec)?;
        Ok(self)
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn max_allowed_packet(mut self, size: u64) -> Self {
        self.max_allowed_packet = Some(size);
        self
    }

    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    pub fn allow_multi_queries(mut self, enabled: bool) -> Self {
        self.allow_multi_queries = enabled;
        self
    }

    /// Enable or disable `LOAD DATA LOCAL INFILE`.
    ///
    /// # Security Warning
    /// The server chooses which file to read. Requested file names are
    /// checked against the query, but only enable this for trusted servers.
    pub fn allow_local_infile(mut self, enabled: bool) -> Self {
        self.allow_local_infile = enabled;
        self
    }

    pub fn cache_prep_stmts(mut self, enabled: bool) -> Self {
        self.cache_prep_stmts = enabled;
        self
    }

    pub fn prep_stmt_cache_size(mut self, size: usize) -> Self {
        self.prep_stmt_cache_size = size;
        self
    }

    pub fn disable_pipeline(mut self, disabled: bool) -> Self {
        self.disable_pipeline = disabled;
        self
    }

    pub fn autocommit(mut self, autocommit: Option<bool>) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn init_sql(mut self, sql: impl Into<String>) -> Self {
        self.init_sql = Some(sql.into());
        self
    }

    pub fn session_variables(mut self, variables: impl Into<String>) -> Self {
        self.session_variables = Some(variables.into());
        self
    }

    pub fn timezone(mut self, timezone: TimeZoneSetting) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn restricted_auth(mut self, plugins: impl Into<String>) -> Self {
        self.restricted_auth = Some(plugins.into());
        self
    }

    pub fn connection_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.connection_attributes = Some(attributes.into());
        self
    }

    pub fn dump_queries_on_exception(mut self, enabled: bool) -> Self {
        self.dump_queries_on_exception = enabled;
        self
    }

    pub fn max_query_size_to_log(mut self, size: usize) -> Self {
        self.max_query_size_to_log = size;
        self
    }

    /// The endpoint to connect to.
    pub fn primary_host(&self) -> Option<&HostAddress> {
        self.hosts.first()
    }

    /// Capabilities requested from the server, before intersection with the
    /// server's advertised set.
    pub fn client_capabilities(&self) -> u64 {
        let mut flags = capabilities::BASE_CLIENT_FLAGS;
        if self.allow_multi_queries {
            flags |= capabilities::MULTI_STATEMENTS;
        }
        if self.allow_local_infile {
            flags |= capabilities::LOCAL_FILES;
        }
        if self.database.is_some() {
            flags |= capabilities::CONNECT_WITH_DB;
        }
        flags
    }

    /// Parse a `Key=Value;Key=Value` connection string.
    ///
    /// Values may be quoted with `'` or `"` to contain `;`.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let options = tokenize(connection_string)?;
        let parser = OptionParser { options };
        let mut config = MariaDbConfig::default();

        let port = parser.u16_option(&["Port"])?.unwrap_or(DEFAULT_PORT);
        if let Some(server) = parser.string_option(&[
            "Server",
            "Host",
            "Data Source",
            "DataSource",
            "Address",
            "Addr",
            "Network Address",
        ]) {
            config.hosts = HostAddress::parse(server)?;
            if parser.contains("Port") {
                for host in config.hosts.iter_mut().filter(|h| h.port == DEFAULT_PORT) {
                    host.port = port;
                }
            }
        } else {
            config.hosts = vec![HostAddress::new("localhost", port)];
        }

        config.user = parser
            .string_option(&["User", "User ID", "UserID", "Username", "Uid", "User name"])
            .map(str::to_string);
        config.password = parser.string_option(&["Password", "pwd"]).map(str::to_string);
        config.database = parser
            .string_option(&["Database", "Initial Catalog"])
            .map(str::to_string);

        if let Some(path) = parser.string_option(&["Socket", "UnixSocket", "Unix Socket"]) {
            config.transport = TransportKind::Unix(PathBuf::from(path));
        } else if let Some(pipe) = parser.string_option(&["Pipe", "PipeName", "Pipe Name"]) {
            config.transport = TransportKind::NamedPipe(pipe.to_string());
        }

        if let Some(mode) = parser.string_option(&["SslMode", "Ssl Mode"]) {
            config.ssl_mode = SslMode::parse(mode).ok_or_else(|| {
                config_error(format!("Parameter SslMode has wrong value '{mode}'."))
            })?;
        }

        if let Some(secs) =
            parser.u64_option(&["ConnectTimeout", "Connect Timeout", "Connection Timeout"])?
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parser.u64_option(&["SocketTimeout", "Socket Timeout"])? {
            config.socket_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parser.u64_option(&[
            "DefaultCommandTimeout",
            "Default Command Timeout",
            "Command Timeout",
        ])? {
            config.command_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(size) = parser.u64_option(&["MaxAllowedPacket", "Max Allowed Packet"])? {
            config.max_allowed_packet = Some(size);
        }

        if let Some(v) = parser.bool_option(&["UseCompression", "Compress", "Use Compression"])? {
            config.use_compression = v;
        }
        if let Some(v) = parser.bool_option(&["AllowMultiQueries", "Allow Multi Queries"])? {
            config.allow_multi_queries = v;
        }
        if let Some(v) = parser.bool_option(&["AllowLoadLocalInfile", "Allow Load Local Infile"])? {
            config.allow_local_infile = v;
        }
        if let Some(v) = parser.bool_option(&["CachePrepStmts", "Cache Prep Stmts"])? {
            config.cache_prep_stmts = v;
        }
        if let Some(size) = parser.u64_option(&["PrepStmtCacheSize", "Prep Stmt Cache Size"])? {
            config.prep_stmt_cache_size = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(v) = parser.bool_option(&["DisablePipeline", "Disable Pipeline"])? {
            config.disable_pipeline = v;
        }
        if let Some(v) = parser.bool_option(&["Autocommit", "Auto Commit"])? {
            config.autocommit = Some(v);
        }
        if let Some(v) = parser.bool_option(&["DumpQueriesOnException"])? {
            config.dump_queries_on_exception = v;
        }
        if let Some(size) = parser.u64_option(&["MaxQuerySizeToLog"])? {
            config.max_query_size_to_log = usize::try_from(size).unwrap_or(usize::MAX);
        }

        config.init_sql = parser
            .string_option(&["InitSql", "Init Sql"])
            .map(str::to_string);
        config.session_variables = parser
            .string_option(&["SessionVariables", "Session Variables"])
            .map(str::to_string);
        if let Some(tz) = parser.string_option(&["Timezone", "Time Zone"]) {
            config.timezone = TimeZoneSetting::parse(tz);
        }
        if let Some(level) = parser.string_option(&[
            "TransactionIsolation",
            "IsolationLevel",
            "Isolation Level",
        ]) {
            config.isolation_level = Some(IsolationLevel::parse(level).ok_or_else(|| {
                config_error(format!(
                    "Parameter TransactionIsolation has wrong value '{level}'."
                ))
            })?);
        }
        config.restricted_auth = parser
            .string_option(&["RestrictedAuth", "Restricted Auth"])
            .map(str::to_string);
        config.connection_attributes = parser
            .string_option(&["ConnectionAttributes", "Connection Attributes"])
            .map(str::to_string);

        Ok(config)
    }
}

/// Connection-string options keyed by lowercased name.
struct OptionParser {
    options: HashMap<String, String>,
}

impl OptionParser {
    fn contains(&self, key: &str) -> bool {
        self.options.contains_key(&key.to_ascii_lowercase())
    }

    fn lookup<'a>(&self, aliases: &[&'a str]) -> Option<(&'a str, &str)> {
        aliases.iter().find_map(|alias| {
            self.options
                .get(&alias.to_ascii_lowercase())
                .map(|v| (*alias, v.as_str()))
        })
    }

    fn string_option(&self, aliases: &[&str]) -> Option<&str> {
        self.lookup(aliases).map(|(_, v)| v)
    }

    fn u64_option(&self, aliases: &[&str]) -> Result<Option<u64>> {
        self.lookup(aliases)
            .map(|(key, value)| {
                value.trim().parse::<u64>().map_err(|_| {
                    config_error(format!("Parameter {key} has wrong int32 value '{value}'."))
                })
            })
            .transpose()
    }

    fn u16_option(&self, aliases: &[&str]) -> Result<Option<u16>> {
        self.lookup(aliases)
            .map(|(key, value)| {
                value.trim().parse::<u16>().map_err(|_| {
                    config_error(format!("Parameter {key} has wrong int32 value '{value}'."))
                })
            })
            .transpose()
    }

    fn bool_option(&self, aliases: &[&str]) -> Result<Option<bool>> {
        self.lookup(aliases)
            .map(|(key, value)| match value.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(config_error(format!(
                    "Parameter {key} has wrong boolean value '{value}'."
                ))),
            })
            .transpose()
    }
}

fn tokenize(connection_string: &str) -> Result<HashMap<String, String>> {
    let mut options = HashMap::new();
    let mut rest = connection_string.trim();

    while !rest.is_empty() {
        let Some((key, after_key)) = rest.split_once('=') else {
            if rest.trim_matches(';').trim().is_empty() {
                break;
            }
            return Err(config_error(format!(
                "Invalid connection string, expected key=value pairs, found '{rest}'."
            )));
        };
        let key = key.trim().trim_start_matches(';').trim();
        let after_key = after_key.trim_start();

        let (value, remaining) = match after_key.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let body = &after_key[1..];
                let Some(end) = body.find(quote) else {
                    return Err(config_error(format!(
                        "Invalid connection string, unterminated quoted value for '{key}'."
                    )));
                };
                let tail = body[end + 1..].trim_start();
                (&body[..end], tail.strip_prefix(';').unwrap_or(tail))
            }
            _ => match after_key.split_once(';') {
                Some((value, tail)) => (value.trim(), tail),
                None => (after_key.trim(), ""),
            },
        };

        if key.is_empty() {
            return Err(config_error(
                "Invalid connection string, empty option name.".to_string(),
            ));
        }
        options.insert(key.to_ascii_lowercase(), value.to_string());
        rest = remaining.trim_start();
    }
    Ok(options)
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}
