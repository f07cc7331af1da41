//! Client commands and server response packets.

pub mod client;
pub mod server;

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use mariadb_core::Result;

use crate::column::ColumnDefinition;
use crate::context::Context;
use crate::protocol::PacketWriter;

pub use client::{
    BatchQueryPacket, ClosePreparePacket, ExecutePacket, HandshakeResponse, PingPacket,
    PreparePacket, QueryPacket, QuitPacket, ResetConnectionPacket,
};
pub use server::{
    AuthSwitchPacket, ErrorPacket, InitialHandshake, OkPacket, PrepareResult,
};

/// A command sent to the server.
///
/// `encode` writes the whole command and returns how many response groups
/// the server will send back for it.
pub trait ClientMessage: fmt::Debug + Send + Sync {
    fn encode(&self, writer: &mut PacketWriter, context: &Context) -> Result<usize>;

    /// SQL text, for error messages and LOCAL INFILE validation.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Are result rows sent in the binary protocol?
    fn binary_protocol(&self) -> bool {
        false
    }

    /// Can the server omit column metadata in the response?
    fn can_skip_meta(&self) -> bool {
        false
    }

    /// Columns to use when the server skipped the metadata.
    fn cached_columns(&self) -> Option<Arc<[ColumnDefinition]>> {
        None
    }

    /// Replaces the file a `LOAD DATA LOCAL INFILE` would read.
    fn local_infile_stream(&self) -> Option<Box<dyn Read + '_>> {
        None
    }

    /// Is a 0x00 response a COM_STMT_PREPARE result rather than an OK?
    fn prepares_statement(&self) -> bool {
        false
    }

    /// File name bound to the first placeholder of
    /// `LOAD DATA LOCAL INFILE ?`.
    fn infile_parameter(&self) -> Option<&str> {
        None
    }
}
