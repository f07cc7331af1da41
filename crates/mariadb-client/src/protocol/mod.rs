//! MariaDB/MySQL wire protocol implementation.
//!
//! Packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets, the last one being shorter than the
//! maximum (possibly empty).

pub mod buf;
pub mod reader;
pub mod writer;

pub use buf::ReadableBuf;
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload size for a single packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Capability flags (client and server).
///
/// The low 32 bits are shared with MySQL; the high 32 bits are MariaDB
/// extended capabilities, exchanged in otherwise reserved handshake bytes.
#[allow(dead_code)]
pub mod capabilities {
    /// Set by MySQL servers, cleared by MariaDB (which then sends extended capabilities)
    pub const CLIENT_MYSQL: u64 = 1;
    pub const FOUND_ROWS: u64 = 1 << 1;
    pub const LONG_FLAG: u64 = 1 << 2;
    pub const CONNECT_WITH_DB: u64 = 1 << 3;
    pub const NO_SCHEMA: u64 = 1 << 4;
    pub const COMPRESS: u64 = 1 << 5;
    pub const ODBC: u64 = 1 << 6;
    pub const LOCAL_FILES: u64 = 1 << 7;
    pub const IGNORE_SPACE: u64 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u64 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u64 = 1 << 10;
    pub const SSL: u64 = 1 << 11;
    pub const IGNORE_SIGPIPE: u64 = 1 << 12;
    pub const TRANSACTIONS: u64 = 1 << 13;
    pub const RESERVED: u64 = 1 << 14;
    pub const SECURE_CONNECTION: u64 = 1 << 15;
    pub const MULTI_STATEMENTS: u64 = 1 << 16;
    pub const MULTI_RESULTS: u64 = 1 << 17;
    pub const PS_MULTI_RESULTS: u64 = 1 << 18;
    pub const PLUGIN_AUTH: u64 = 1 << 19;
    pub const CONNECT_ATTRS: u64 = 1 << 20;
    pub const PLUGIN_AUTH_LENENC_CLIENT_DATA: u64 = 1 << 21;
    pub const CLIENT_SESSION_TRACK: u64 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u64 = 1 << 24;
    pub const PROGRESS_OLD: u64 = 1 << 29;

    // MariaDB extended capabilities
    pub const PROGRESS: u64 = 1 << 32;
    pub const MARIADB_RESERVED: u64 = 1 << 33;
    pub const STMT_BULK_OPERATIONS: u64 = 1 << 34;
    pub const EXTENDED_TYPE_INFO: u64 = 1 << 35;
    pub const CACHE_METADATA: u64 = 1 << 36;

    /// Capabilities always requested by the client.
    pub const BASE_CLIENT_FLAGS: u64 = IGNORE_SPACE
        | CLIENT_PROTOCOL_41
        | TRANSACTIONS
        | SECURE_CONNECTION
        | MULTI_RESULTS
        | PS_MULTI_RESULTS
        | PLUGIN_AUTH
        | CONNECT_ATTRS
        | PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_SESSION_TRACK
        | EXTENDED_TYPE_INFO
        | CACHE_METADATA
        | STMT_BULK_OPERATIONS
        | FOUND_ROWS
        | CLIENT_DEPRECATE_EOF;
}

/// Command codes (COM_xxx) sent by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Ping server
    Ping = 0x0e,
    /// Prepare statement
    StmtPrepare = 0x16,
    /// Execute prepared statement
    StmtExecute = 0x17,
    /// Close prepared statement
    StmtClose = 0x19,
    /// Reset connection
    ResetConnection = 0x1f,
}

/// Server status flags.
#[allow(dead_code)]
pub mod server_status {
    pub const IN_TRANSACTION: u16 = 1;
    pub const AUTOCOMMIT: u16 = 2;
    pub const MORE_RESULTS_EXISTS: u16 = 8;
    pub const QUERY_NO_GOOD_INDEX_USED: u16 = 16;
    pub const QUERY_NO_INDEX_USED: u16 = 32;
    pub const CURSOR_EXISTS: u16 = 64;
    pub const LAST_ROW_SENT: u16 = 128;
    pub const DB_DROPPED: u16 = 256;
    pub const NO_BACKSLASH_ESCAPES: u16 = 512;
    pub const METADATA_CHANGED: u16 = 1024;
    pub const QUERY_WAS_SLOW: u16 = 2048;
    pub const PS_OUT_PARAMETERS: u16 = 4096;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 1 << 14;
}

/// Session state change types carried by OK packets.
#[allow(dead_code)]
pub mod state_change {
    pub const SESSION_TRACK_SYSTEM_VARIABLES: u8 = 0;
    pub const SESSION_TRACK_SCHEMA: u8 = 1;
    pub const SESSION_TRACK_STATE_CHANGE: u8 = 2;
    pub const SESSION_TRACK_GTIDS: u8 = 3;
    pub const SESSION_TRACK_TRANSACTION_CHARACTERISTICS: u8 = 4;
    pub const SESSION_TRACK_TRANSACTION_STATE: u8 = 5;
}

/// Column definition flags.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY_COLLATION: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE_FLAG: u16 = 4096;
}

/// Connection state change flags, used to know what to restore on reset.
pub mod connection_state {
    pub const STATE_NETWORK_TIMEOUT: u32 = 1;
    pub const STATE_DATABASE: u32 = 2;
    pub const STATE_READ_ONLY: u32 = 4;
    pub const STATE_AUTOCOMMIT: u32 = 8;
    pub const STATE_TRANSACTION_ISOLATION: u32 = 16;
}

/// Character set / collation ids.
#[allow(dead_code)]
pub mod charset {
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const UTF8MB4_BIN: u8 = 46;
    pub const BINARY: u16 = 63;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;

    /// Pick the handshake collation: keep the server default when it is a
    /// utf8mb4 collation, otherwise ask for `utf8mb4_unicode_ci`.
    pub fn decide_language(server_collation: u8) -> u8 {
        match server_collation {
            45 | 46 | 224..=247 => server_collation,
            _ => UTF8MB4_UNICODE_CI,
        }
    }

    /// Maximum bytes per character for a collation id, when known.
    pub fn max_width(collation: u16) -> Option<u32> {
        match collation {
            // binary, latin1, ascii
            5 | 8 | 11 | 15 | 31 | 47 | 48 | 49 | 63 | 65 | 94 => Some(1),
            // ucs2
            35 | 90 | 128..=151 | 159 => Some(2),
            // utf8mb3
            33 | 83 | 192..=215 | 223 => Some(3),
            // utf8mb4, utf16, utf32
            45 | 46 | 54..=62 | 101..=124 | 160..=183 | 224..=247 | 255..=323 => Some(4),
            _ => None,
        }
    }
}

/// A packet header.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// `conn=<id> (M|S)` prefix used by every log line of a connection.
pub fn thread_log_prefix(thread_id: Option<u64>, primary: Option<bool>) -> String {
    let id = thread_id.map_or_else(|| "-1".to_string(), |id| id.to_string());
    match primary {
        Some(true) => format!("conn={id} (M)"),
        Some(false) => format!("conn={id} (S)"),
        None => format!("conn={id}"),
    }
}

/// Hex dump for trace logs, truncated to `max_len` bytes.
pub fn hex_dump(data: &[u8], max_len: usize) -> String {
    use std::fmt::Write as _;

    let shown = &data[..data.len().min(max_len)];
    let mut out = String::with_capacity(shown.len() * 4 + 64);
    for (line, chunk) in shown.chunks(16).enumerate() {
        let _ = write!(out, "{:06X}  ", line * 16);
        for (i, byte) in chunk.iter().enumerate() {
            if i == 8 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02X} ");
        }
        for i in chunk.len()..16 {
            if i == 8 {
                out.push(' ');
            }
            out.push_str("   ");
        }
        out.push_str(" |");
        for byte in chunk {
            out.push(if (32..127).contains(byte) {
                char::from(*byte)
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    if data.len() > max_len {
        out.push_str("...truncated\n");
    }
    out
}
