//! Packets sent by the server.

use std::io::Read;
use std::sync::Arc;

use mariadb_core::error::{Error, ProtocolError};
use mariadb_core::Result;

use crate::column::ColumnDefinition;
use crate::context::Context;
use crate::protocol::{PacketReader, ReadableBuf, capabilities, server_status, state_change};
use crate::version::ServerVersion;

fn protocol_error(message: String, raw: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message,
        raw_data: Some(raw.to_vec()),
        source: None,
    })
}

/// The server greeting, first packet of every connection.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub version: ServerVersion,
    pub thread_id: u64,
    /// Authentication scramble (both parts, without terminator).
    pub seed: Vec<u8>,
    /// Server capabilities, MariaDB extended bits included.
    pub capabilities: u64,
    pub default_collation: u8,
    pub server_status: u16,
    pub auth_plugin: Option<String>,
}

impl InitialHandshake {
    /// Decode the protocol v10 greeting.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut buf = ReadableBuf::new(packet);
        let protocol = buf.read_u8()?;
        if protocol != 0x0a {
            return Err(protocol_error(
                format!("Unexpected initial handshake protocol value [{protocol}]"),
                packet,
            ));
        }

        let mut version = buf.read_string_null_end();
        let thread_id = u64::from(buf.read_u32()?);
        let seed1 = buf.read_bytes(8)?;
        buf.skip(1)?;
        let capabilities_low = u64::from(buf.read_u16()?);
        let default_collation = buf.read_u8()?;
        let server_status = buf.read_u16()?;
        let capabilities_high = u64::from(buf.read_u16()?) << 16;
        let mut server_capabilities = capabilities_low | capabilities_high;

        let salt_length = if server_capabilities & capabilities::PLUGIN_AUTH != 0 {
            usize::from(buf.read_u8()?).saturating_sub(9).max(12)
        } else {
            buf.skip(1)?;
            0
        };
        buf.skip(6)?;
        let mariadb_capabilities = u64::from(buf.read_u32()?);

        let mut seed = seed1.to_vec();
        if server_capabilities & capabilities::SECURE_CONNECTION != 0 {
            if salt_length > 0 {
                seed.extend_from_slice(buf.read_bytes(salt_length)?);
                if buf.readable_bytes() > 0 {
                    buf.skip(1)?;
                }
            } else {
                seed.extend_from_slice(buf.read_bytes_null_end());
            }
        }

        let auth_plugin = if server_capabilities & capabilities::PLUGIN_AUTH != 0 {
            Some(buf.read_string_null_end())
        } else {
            None
        };

        // MariaDB 10+ used to prefix its version to get past old replication checks
        let mut mariadb = false;
        if let Some(stripped) = version.strip_prefix("5.5.5-") {
            version = stripped.to_string();
            mariadb = true;
        } else if version.contains("MariaDB") {
            mariadb = true;
        }
        if server_capabilities & capabilities::CLIENT_MYSQL == 0 {
            server_capabilities |= mariadb_capabilities << 32;
            mariadb = true;
        }

        Ok(Self {
            version: ServerVersion::new(version, mariadb),
            thread_id,
            seed,
            capabilities: server_capabilities,
            default_collation,
            server_status,
            auth_plugin,
        })
    }
}

/// OK packet, also used as result set terminator when EOF is deprecated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub server_status: u16,
    pub warnings: u16,
    pub info: Option<String>,
}

impl OkPacket {
    /// Decode an OK packet and apply its status, warnings and session state
    /// changes to the context.
    pub fn decode(packet: &[u8], context: &mut Context) -> Result<Self> {
        let mut buf = ReadableBuf::new(packet);
        buf.skip(1)?;
        let affected_rows = buf.read_length_not_null()?;
        let last_insert_id = buf.read_length_not_null()?;
        let server_status = buf.read_u16()?;
        let warnings = buf.read_u16()?;
        context.set_server_status(server_status);
        context.set_warning(warnings);

        let mut info = None;
        if buf.readable_bytes() > 0 {
            if context.has_client_capability(capabilities::CLIENT_SESSION_TRACK) {
                #[allow(clippy::cast_possible_truncation)]
                let len = buf.read_length_not_null()? as usize;
                info = Some(buf.read_string(len)?);
                if server_status & server_status::SERVER_SESSION_STATE_CHANGED != 0
                    && buf.readable_bytes() > 0
                {
                    read_session_state(&mut buf.read_length_buffer()?, context)?;
                }
            } else {
                info = Some(buf.read_string_eof());
            }
        }

        Ok(Self {
            affected_rows,
            last_insert_id,
            server_status,
            warnings,
            info: info.filter(|s| !s.is_empty()),
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn read_session_state(state: &mut ReadableBuf<'_>, context: &mut Context) -> Result<()> {
    while state.readable_bytes() > 0 {
        match state.read_u8()? {
            state_change::SESSION_TRACK_SYSTEM_VARIABLES => {
                let mut entry = state.read_length_buffer()?;
                let len = entry.read_length_not_null()? as usize;
                let variable = entry.read_string(len)?;
                let value = entry
                    .read_length_bytes()?
                    .map(|v| String::from_utf8_lossy(v).into_owned());
                tracing::debug!(
                    "System variable change: {} = {}",
                    variable,
                    value.as_deref().unwrap_or("NULL")
                );
            }
            state_change::SESSION_TRACK_SCHEMA => {
                let mut entry = state.read_length_buffer()?;
                let len = entry.read_length_not_null()? as usize;
                let database = entry.read_string(len)?;
                tracing::debug!("Database change: is '{}'", database);
                context.set_database(Some(database).filter(|db| !db.is_empty()));
            }
            _ => state.skip_length_encoded()?,
        }
    }
    Ok(())
}

/// Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: u16,
    pub sqlstate: String,
    pub message: String,
}

impl ErrorPacket {
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut buf = ReadableBuf::new(packet);
        buf.skip(1)?;
        let code = buf.read_u16()?;
        let (sqlstate, message) = if buf.peek() == Some(b'#') {
            buf.skip(1)?;
            let sqlstate = buf.read_string(5)?;
            (sqlstate, buf.read_string_eof())
        } else {
            // pre-4.1 format, no SQLSTATE
            ("HY000".to_string(), buf.read_string_eof())
        };
        Ok(Self {
            code,
            sqlstate,
            message,
        })
    }
}

/// Authentication method switch request (0xFE during authentication).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchPacket {
    pub plugin: String,
    pub seed: Vec<u8>,
}

impl AuthSwitchPacket {
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut buf = ReadableBuf::new(packet);
        buf.skip(1)?;
        let plugin = buf.read_string_null_end();
        let seed = buf.read_bytes_eof().to_vec();
        Ok(Self { plugin, seed })
    }
}

/// A statement prepared on the server (COM_STMT_PREPARE response).
#[derive(Debug)]
pub struct PrepareResult {
    statement_id: u32,
    sql: String,
    parameters: Vec<ColumnDefinition>,
    columns: Arc<[ColumnDefinition]>,
    warnings: u16,
}

impl PrepareResult {
    pub fn new(
        statement_id: u32,
        sql: impl Into<String>,
        parameters: Vec<ColumnDefinition>,
        columns: Vec<ColumnDefinition>,
        warnings: u16,
    ) -> Self {
        Self {
            statement_id,
            sql: sql.into(),
            parameters,
            columns: columns.into(),
            warnings,
        }
    }

    /// Decode the response whose first packet is `first`, reading the
    /// parameter and column definitions that follow it.
    pub fn read<R: Read>(
        first: &[u8],
        reader: &mut PacketReader<R>,
        context: &Context,
        sql: &str,
    ) -> Result<Self> {
        let mut buf = ReadableBuf::new(first);
        buf.skip(1)?;
        let statement_id = buf.read_u32()?;
        let column_count = usize::from(buf.read_u16()?);
        let parameter_count = usize::from(buf.read_u16()?);
        buf.skip(1)?;
        let warnings = if buf.readable_bytes() >= 2 { buf.read_u16()? } else { 0 };

        // the server describes parameters with placeholder definitions only
        let mut parameters = Vec::with_capacity(parameter_count);
        if parameter_count > 0 {
            for _ in 0..parameter_count {
                reader.skip_packet()?;
                parameters.push(ColumnDefinition::parameter());
            }
            if !context.is_eof_deprecated() {
                reader.skip_packet()?;
            }
        }

        let mut columns = Vec::with_capacity(column_count);
        if column_count > 0 {
            for _ in 0..column_count {
                columns.push(ColumnDefinition::decode(
                    reader.read_packet()?,
                    context.is_extended_info(),
                )?);
            }
            if !context.is_eof_deprecated() {
                reader.skip_packet()?;
            }
        }

        Ok(Self::new(statement_id, sql, parameters, columns, warnings))
    }

    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[ColumnDefinition] {
        &self.parameters
    }

    pub fn columns(&self) -> Arc<[ColumnDefinition]> {
        Arc::clone(&self.columns)
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::IsolationLevel;
    use crate::protocol::capabilities as caps;

    /// A MariaDB 10.6 greeting advertising `caps`.
    pub(crate) fn handshake_packet(version: &str, caps: u64, plugin: &str) -> Vec<u8> {
        let mut out = vec![0x0a];
        out.extend_from_slice(version.as_bytes());
        out.push(0);
        out.extend_from_slice(&77u32.to_le_bytes());
        out.extend_from_slice(b"abcdefgh");
        out.push(0);
        out.extend_from_slice(&((caps & 0xffff) as u16).to_le_bytes());
        out.push(45);
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&(((caps >> 16) & 0xffff) as u16).to_le_bytes());
        out.push(21);
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&((caps >> 32) as u32).to_le_bytes());
        out.extend_from_slice(b"ijklmnopqrst");
        out.push(0);
        out.extend_from_slice(plugin.as_bytes());
        out.push(0);
        out
    }

    pub(crate) fn test_context(client_caps: u64) -> Context {
        let handshake = InitialHandshake::decode(&handshake_packet(
            "5.5.5-10.6.12-MariaDB",
            u64::MAX & !caps::CLIENT_MYSQL,
            "mysql_native_password",
        ))
        .unwrap();
        Context::new(&handshake, client_caps, None, Some(IsolationLevel::ReadCommitted))
    }

    #[test]
    fn test_decode_mariadb_handshake() {
        let server_caps = caps::CLIENT_PROTOCOL_41
            | caps::SECURE_CONNECTION
            | caps::PLUGIN_AUTH
            | caps::STMT_BULK_OPERATIONS;
        let packet = handshake_packet("5.5.5-10.6.12-MariaDB-log", server_caps, "mysql_native_password");
        let handshake = InitialHandshake::decode(&packet).unwrap();
        assert_eq!(handshake.version.as_str(), "10.6.12-MariaDB-log");
        assert!(handshake.version.is_mariadb());
        assert_eq!(handshake.thread_id, 77);
        assert_eq!(handshake.seed, b"abcdefghijklmnopqrst");
        assert_eq!(handshake.default_collation, 45);
        assert_eq!(handshake.auth_plugin.as_deref(), Some("mysql_native_password"));
        // CLIENT_MYSQL clear: MariaDB extended capabilities are merged
        assert_ne!(handshake.capabilities & caps::STMT_BULK_OPERATIONS, 0);
    }

    #[test]
    fn test_decode_mysql_handshake_ignores_extended_bits() {
        let server_caps = caps::CLIENT_MYSQL
            | caps::CLIENT_PROTOCOL_41
            | caps::SECURE_CONNECTION
            | caps::PLUGIN_AUTH
            | caps::STMT_BULK_OPERATIONS;
        let packet = handshake_packet("8.0.36", server_caps, "caching_sha2_password");
        let handshake = InitialHandshake::decode(&packet).unwrap();
        assert!(!handshake.version.is_mariadb());
        assert_eq!(handshake.version.major(), 8);
        assert_eq!(handshake.capabilities & caps::STMT_BULK_OPERATIONS, 0);
        assert_eq!(handshake.auth_plugin.as_deref(), Some("caching_sha2_password"));
    }

    #[test]
    fn test_wrong_protocol_version() {
        let mut packet = handshake_packet("10.6.12-MariaDB", caps::PLUGIN_AUTH, "x");
        packet[0] = 9;
        let err = InitialHandshake::decode(&packet).unwrap_err();
        assert!(err.to_string().contains("Unexpected initial handshake protocol value [9]"));
    }

    #[test]
    fn test_ok_packet_with_schema_change() {
        let mut context = test_context(caps::CLIENT_SESSION_TRACK | caps::CLIENT_PROTOCOL_41);
        let mut packet = vec![0x00, 3, 9];
        packet.extend_from_slice(&(server_status::SERVER_SESSION_STATE_CHANGED | 2).to_le_bytes());
        packet.extend_from_slice(&1u16.to_le_bytes());
        packet.push(0); // empty info
        // session state: schema change to "shop" and an unknown entry
        let state = [
            state_change::SESSION_TRACK_SCHEMA, 5, 4, b's', b'h', b'o', b'p',
            state_change::SESSION_TRACK_GTIDS, 2, 0, 0,
        ];
        packet.push(state.len() as u8);
        packet.extend_from_slice(&state);

        let ok = OkPacket::decode(&packet, &mut context).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.last_insert_id, 9);
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, None);
        assert_eq!(context.database(), Some("shop"));
        assert_eq!(context.warning(), 1);
    }

    #[test]
    fn test_ok_packet_without_session_track() {
        let mut context = test_context(caps::CLIENT_PROTOCOL_41);
        let mut packet = vec![0x00, 0, 0, 2, 0, 0, 0];
        packet.extend_from_slice(b"Rows matched: 1");
        let ok = OkPacket::decode(&packet, &mut context).unwrap();
        assert_eq!(ok.info.as_deref(), Some("Rows matched: 1"));
        assert_eq!(context.server_status(), 2);
    }

    #[test]
    fn test_error_packet() {
        let mut packet = vec![0xff];
        packet.extend_from_slice(&1062u16.to_le_bytes());
        packet.extend_from_slice(b"#23000Duplicate entry '1' for key 'PRIMARY'");
        let err = ErrorPacket::decode(&packet).unwrap();
        assert_eq!(err.code, 1062);
        assert_eq!(err.sqlstate, "23000");
        assert_eq!(err.message, "Duplicate entry '1' for key 'PRIMARY'");

        let mut old = vec![0xff];
        old.extend_from_slice(&1045u16.to_le_bytes());
        old.extend_from_slice(b"Access denied");
        let err = ErrorPacket::decode(&old).unwrap();
        assert_eq!(err.sqlstate, "HY000");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn test_auth_switch_packet() {
        let mut packet = vec![0xfe];
        packet.extend_from_slice(b"mysql_native_password\0");
        packet.extend_from_slice(b"01234567890123456789\0");
        let switch = AuthSwitchPacket::decode(&packet).unwrap();
        assert_eq!(switch.plugin, "mysql_native_password");
        assert_eq!(switch.seed.len(), 21);
    }
}
