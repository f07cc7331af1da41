//! Per-connection protocol state.

use crate::config::IsolationLevel;
use crate::message::server::InitialHandshake;
use crate::protocol::{capabilities, server_status};
use crate::version::ServerVersion;

/// State negotiated at handshake time and updated by server responses.
///
/// Owned by the connection and only touched while a command is in flight,
/// which the connection's command lock serializes.
#[derive(Debug, Clone)]
pub struct Context {
    thread_id: u64,
    seed: Vec<u8>,
    server_capabilities: u64,
    client_capabilities: u64,
    server_status: u16,
    warning: u16,
    database: Option<String>,
    version: ServerVersion,
    transaction_isolation: Option<IsolationLevel>,
}

impl Context {
    /// `client_capabilities` is the negotiated set (already intersected
    /// with the server's).
    pub fn new(
        handshake: &InitialHandshake,
        client_capabilities: u64,
        database: Option<String>,
        transaction_isolation: Option<IsolationLevel>,
    ) -> Self {
        Self {
            thread_id: handshake.thread_id,
            seed: handshake.seed.clone(),
            server_capabilities: handshake.capabilities,
            client_capabilities,
            server_status: handshake.server_status,
            warning: 0,
            database,
            version: handshake.version.clone(),
            transaction_isolation,
        }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    pub fn server_capabilities(&self) -> u64 {
        self.server_capabilities
    }

    pub fn client_capabilities(&self) -> u64 {
        self.client_capabilities
    }

    /// Is `capability` part of the negotiated set?
    pub fn has_client_capability(&self, capability: u64) -> bool {
        self.client_capabilities & capability != 0
    }

    /// No intermediate EOF packets; result sets end with an OK packet.
    pub fn is_eof_deprecated(&self) -> bool {
        self.has_client_capability(capabilities::CLIENT_DEPRECATE_EOF)
    }

    /// Can execute responses omit column metadata?
    pub fn can_skip_meta(&self) -> bool {
        self.has_client_capability(capabilities::CACHE_METADATA)
    }

    /// Do column definitions carry the extended type info block?
    pub fn is_extended_info(&self) -> bool {
        self.has_client_capability(capabilities::EXTENDED_TYPE_INFO)
    }

    pub fn server_status(&self) -> u16 {
        self.server_status
    }

    pub fn set_server_status(&mut self, status: u16) {
        self.server_status = status;
    }

    pub fn has_more_results(&self) -> bool {
        self.server_status & server_status::MORE_RESULTS_EXISTS != 0
    }

    pub fn warning(&self) -> u16 {
        self.warning
    }

    pub fn set_warning(&mut self, warning: u16) {
        self.warning = warning;
    }

    /// Current default schema, as last reported by the server.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn set_database(&mut self, database: Option<String>) {
        self.database = database;
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    pub fn transaction_isolation(&self) -> Option<IsolationLevel> {
        self.transaction_isolation
    }
}
