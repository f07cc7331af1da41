//! Commands sent by the client.

use std::io::Read;
use std::sync::Arc;

use mariadb_core::{Result, Value};

use super::ClientMessage;
use super::server::PrepareResult;
use crate::column::{ColumnDefinition, DataType};
use crate::context::Context;
use crate::protocol::{Command, MAX_PACKET_SIZE, PacketWriter, capabilities, server_status};
use crate::security::split_placeholders;

/// Maximum packet size announced in the handshake response (1 GiB).
const MAX_PACKET_ANNOUNCED: u32 = 1024 * 1024 * 1024;

fn write_null_terminated(writer: &mut PacketWriter, s: &str) -> Result<()> {
    writer.write_string(s)?;
    writer.write_byte(0)
}

fn write_length_string(writer: &mut PacketWriter, bytes: &[u8]) -> Result<()> {
    writer.write_length(bytes.len() as u64)?;
    writer.write_bytes(bytes)
}

/// Append a length-encoded string to an in-memory buffer.
fn put_length_string(out: &mut Vec<u8>, bytes: &[u8]) {
    let len = bytes.len() as u64;
    let le = len.to_le_bytes();
    if len < 251 {
        out.push(le[0]);
    } else if len < 65_536 {
        out.extend_from_slice(&[0xfc, le[0], le[1]]);
    } else if len < 16_777_216 {
        out.extend_from_slice(&[0xfd, le[0], le[1], le[2]]);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&le);
    }
    out.extend_from_slice(bytes);
}

/// Response to the initial handshake.
///
/// Not a regular command: it continues the sequence of the server greeting
/// instead of starting a new one.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub client_capabilities: u64,
    pub charset: u8,
    pub user: &'a str,
    pub auth_data: &'a [u8],
    pub auth_plugin: &'a str,
    pub database: Option<&'a str>,
    /// Host name sent in the `_server_host` attribute.
    pub host: &'a str,
    /// User `key:value,key:value` attributes.
    pub connection_attributes: Option<&'a str>,
}

impl HandshakeResponse<'_> {
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, writer: &mut PacketWriter) -> Result<()> {
        let caps = self.client_capabilities;
        writer.write_u32(caps as u32)?;
        writer.write_u32(MAX_PACKET_ANNOUNCED)?;
        writer.write_byte(self.charset)?;
        writer.write_bytes(&[0; 19])?;
        writer.write_u32((caps >> 32) as u32)?;
        write_null_terminated(writer, self.user)?;

        if caps & capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            write_length_string(writer, self.auth_data)?;
        } else if caps & capabilities::SECURE_CONNECTION != 0 {
            writer.write_byte(self.auth_data.len() as u8)?;
            writer.write_bytes(self.auth_data)?;
        } else {
            writer.write_bytes(self.auth_data)?;
            writer.write_byte(0)?;
        }

        if caps & capabilities::CONNECT_WITH_DB != 0 {
            write_null_terminated(writer, self.database.unwrap_or_default())?;
        }
        if caps & capabilities::PLUGIN_AUTH != 0 {
            write_null_terminated(writer, self.auth_plugin)?;
        }
        if caps & capabilities::CONNECT_ATTRS != 0 {
            write_length_string(writer, &self.connect_attributes())?;
        }
        writer.flush()
    }

    fn connect_attributes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        let mut put = |key: &str, value: &str| {
            put_length_string(&mut out, key.as_bytes());
            put_length_string(&mut out, value.as_bytes());
        };
        put("_client_name", env!("CARGO_PKG_NAME"));
        put("_client_version", env!("CARGO_PKG_VERSION"));
        put("_server_host", self.host);
        put("_os", std::env::consts::OS);
        put("_thread", &std::process::id().to_string());

        if let Some(attributes) = self.connection_attributes {
            for pair in attributes.split(',').filter(|p| !p.trim().is_empty()) {
                match pair.split_once(':') {
                    Some((key, value)) => put(key.trim(), value.trim()),
                    None => put(pair.trim(), ""),
                }
            }
        }
        out
    }
}

/// COM_QUERY.
#[derive(Debug, Clone)]
pub struct QueryPacket {
    sql: String,
    local_infile: Option<Vec<u8>>,
}

impl QueryPacket {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            local_infile: None,
        }
    }

    /// Answer a `LOAD DATA LOCAL INFILE` request with `content` instead of
    /// reading the named file.
    pub fn with_local_infile(sql: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            sql: sql.into(),
            local_infile: Some(content),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl ClientMessage for QueryPacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::Query as u8)?;
        writer.write_string(&self.sql)?;
        writer.flush()?;
        Ok(1)
    }

    fn description(&self) -> Option<&str> {
        Some(&self.sql)
    }

    fn local_infile_stream(&self) -> Option<Box<dyn Read + '_>> {
        self.local_infile
            .as_deref()
            .map(|content| Box::new(content) as Box<dyn Read + '_>)
    }
}

/// COM_QUIT. The server closes the socket without answering.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuitPacket;

impl ClientMessage for QuitPacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::Quit as u8)?;
        writer.flush()?;
        Ok(0)
    }
}

/// COM_PING.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingPacket;

impl ClientMessage for PingPacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::Ping as u8)?;
        writer.flush()?;
        Ok(1)
    }
}

/// COM_RESET_CONNECTION.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetConnectionPacket;

impl ClientMessage for ResetConnectionPacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::ResetConnection as u8)?;
        writer.flush()?;
        Ok(1)
    }
}

/// COM_STMT_PREPARE.
#[derive(Debug, Clone)]
pub struct PreparePacket {
    sql: String,
}

impl PreparePacket {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

impl ClientMessage for PreparePacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::StmtPrepare as u8)?;
        writer.write_string(&self.sql)?;
        writer.flush()?;
        Ok(1)
    }

    fn description(&self) -> Option<&str> {
        Some(&self.sql)
    }

    fn prepares_statement(&self) -> bool {
        true
    }
}

/// COM_STMT_CLOSE. No response.
#[derive(Debug, Clone, Copy)]
pub struct ClosePreparePacket {
    statement_id: u32,
}

impl ClosePreparePacket {
    pub fn new(statement_id: u32) -> Self {
        Self { statement_id }
    }
}

impl ClientMessage for ClosePreparePacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::StmtClose as u8)?;
        writer.write_u32(self.statement_id)?;
        writer.flush()?;
        Ok(0)
    }
}

/// Statement id meaning "the statement prepared just before", letting
/// MariaDB pipeline PREPARE and EXECUTE.
pub const LAST_PREPARED_STATEMENT: u32 = u32::MAX;

/// COM_STMT_EXECUTE with parameters in the binary protocol.
#[derive(Debug, Clone)]
pub struct ExecutePacket {
    statement_id: u32,
    sql: String,
    columns: Option<Arc<[ColumnDefinition]>>,
    parameters: Vec<Value>,
}

impl ExecutePacket {
    pub fn new(prepare: &PrepareResult, parameters: Vec<Value>) -> Self {
        Self {
            statement_id: prepare.statement_id(),
            sql: prepare.sql().to_string(),
            columns: Some(prepare.columns()),
            parameters,
        }
    }

    /// Execute the statement prepared by the previous command of a pipeline.
    pub fn for_last_prepared(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            statement_id: LAST_PREPARED_STATEMENT,
            sql: sql.into(),
            columns: None,
            parameters,
        }
    }

    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }
}

/// Wire type of a parameter value, and whether it is unsigned.
fn parameter_type(value: &Value) -> (DataType, bool) {
    match value {
        Value::Null => (DataType::Null, false),
        Value::Bool(_) | Value::TinyInt(_) => (DataType::TinyInt, false),
        Value::SmallInt(_) => (DataType::SmallInt, false),
        Value::Int(_) => (DataType::Integer, false),
        Value::BigInt(_) => (DataType::BigInt, false),
        Value::UnsignedBigInt(_) => (DataType::BigInt, true),
        Value::Float(_) => (DataType::Float, false),
        Value::Double(_) => (DataType::Double, false),
        Value::Decimal(_) => (DataType::Decimal, false),
        Value::Text(_) | Value::Uuid(_) | Value::Json(_) => (DataType::VarString, false),
        Value::Bytes(_) => (DataType::Blob, false),
        Value::Date(_) => (DataType::Date, false),
        Value::Time(_) => (DataType::Time, false),
        Value::DateTime(_) => (DataType::DateTime, false),
    }
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[allow(clippy::cast_possible_truncation)]
fn write_binary_value(writer: &mut PacketWriter, value: &Value) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Bool(v) => writer.write_byte(u8::from(*v)),
        Value::TinyInt(v) => writer.write_byte(*v as u8),
        Value::SmallInt(v) => writer.write_u16(*v as u16),
        Value::Int(v) => writer.write_u32(*v as u32),
        Value::BigInt(v) => writer.write_u64(*v as u64),
        Value::UnsignedBigInt(v) => writer.write_u64(*v),
        Value::Float(v) => writer.write_f32(*v),
        Value::Double(v) => writer.write_f64(*v),
        Value::Decimal(s) | Value::Text(s) => write_length_string(writer, s.as_bytes()),
        Value::Bytes(b) => write_length_string(writer, b),
        Value::Uuid(u) => write_length_string(writer, format_uuid(u).as_bytes()),
        Value::Json(j) => write_length_string(writer, j.to_string().as_bytes()),
        Value::Date(d) => {
            if d.is_zero() {
                return writer.write_byte(0);
            }
            writer.write_byte(4)?;
            writer.write_u16(d.year)?;
            writer.write_byte(d.month)?;
            writer.write_byte(d.day)
        }
        Value::Time(t) => {
            let days = t.hours / 24;
            let hours = (t.hours % 24) as u8;
            let with_micros = t.microseconds != 0;
            writer.write_byte(if with_micros { 12 } else { 8 })?;
            writer.write_byte(u8::from(t.negative))?;
            writer.write_u32(days)?;
            writer.write_byte(hours)?;
            writer.write_byte(t.minutes)?;
            writer.write_byte(t.seconds)?;
            if with_micros {
                writer.write_u32(t.microseconds)?;
            }
            Ok(())
        }
        Value::DateTime(dt) => {
            let with_micros = dt.microsecond != 0;
            writer.write_byte(if with_micros { 11 } else { 7 })?;
            writer.write_u16(dt.date.year)?;
            writer.write_byte(dt.date.month)?;
            writer.write_byte(dt.date.day)?;
            writer.write_byte(dt.hour)?;
            writer.write_byte(dt.minute)?;
            writer.write_byte(dt.second)?;
            if with_micros {
                writer.write_u32(dt.microsecond)?;
            }
            Ok(())
        }
    }
}

impl ClientMessage for ExecutePacket {
    fn encode(&self, writer: &mut PacketWriter, _context: &Context) -> Result<usize> {
        writer.init_packet();
        writer.write_byte(Command::StmtExecute as u8)?;
        writer.write_u32(self.statement_id)?;
        writer.write_byte(0)?; // CURSOR_TYPE_NO_CURSOR
        writer.write_u32(1)?; // iteration count

        if !self.parameters.is_empty() {
            let mut null_bitmap = vec![0u8; self.parameters.len().div_ceil(8)];
            for (i, value) in self.parameters.iter().enumerate() {
                if value.is_null() {
                    null_bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            writer.write_bytes(&null_bitmap)?;

            writer.write_byte(1)?; // types bound
            for value in &self.parameters {
                let (data_type, unsigned) = parameter_type(value);
                writer.write_byte(data_type as u8)?;
                writer.write_byte(if unsigned { 0x80 } else { 0 })?;
            }
            for value in &self.parameters {
                write_binary_value(writer, value)?;
            }
        }
        writer.flush()?;
        Ok(1)
    }

    fn description(&self) -> Option<&str> {
        Some(&self.sql)
    }

    fn binary_protocol(&self) -> bool {
        true
    }

    fn can_skip_meta(&self) -> bool {
        self.columns.is_some()
    }

    fn cached_columns(&self) -> Option<Arc<[ColumnDefinition]>> {
        self.columns.clone()
    }

    fn infile_parameter(&self) -> Option<&str> {
        match self.parameters.first() {
            Some(Value::Text(name)) => Some(name),
            _ => None,
        }
    }
}

fn write_quoted(writer: &mut PacketWriter, bytes: &[u8], no_backslash_escapes: bool) -> Result<()> {
    writer.write_byte(b'\'')?;
    writer.write_bytes_escaped(bytes, no_backslash_escapes)?;
    writer.write_byte(b'\'')
}

/// Write `value` as an SQL literal.
fn write_text_value(writer: &mut PacketWriter, value: &Value, no_backslash_escapes: bool) -> Result<()> {
    match value {
        Value::Null => writer.write_string("NULL"),
        Value::Bool(v) => writer.write_byte(if *v { b'1' } else { b'0' }),
        Value::TinyInt(v) => writer.write_string(&v.to_string()),
        Value::SmallInt(v) => writer.write_string(&v.to_string()),
        Value::Int(v) => writer.write_string(&v.to_string()),
        Value::BigInt(v) => writer.write_string(&v.to_string()),
        Value::UnsignedBigInt(v) => writer.write_string(&v.to_string()),
        Value::Float(v) => writer.write_string(&v.to_string()),
        Value::Double(v) => writer.write_string(&v.to_string()),
        Value::Decimal(s) | Value::Text(s) => write_quoted(writer, s.as_bytes(), no_backslash_escapes),
        Value::Bytes(b) => {
            writer.write_string("_binary")?;
            write_quoted(writer, b, no_backslash_escapes)
        }
        Value::Uuid(u) => write_quoted(writer, format_uuid(u).as_bytes(), no_backslash_escapes),
        Value::Json(j) => write_quoted(writer, j.to_string().as_bytes(), no_backslash_escapes),
        Value::Date(d) => write_quoted(writer, d.to_string().as_bytes(), false),
        Value::Time(t) => write_quoted(writer, t.to_string().as_bytes(), false),
        Value::DateTime(dt) => write_quoted(writer, dt.to_string().as_bytes(), false),
    }
}

/// Upper bound of the literal `write_text_value` produces.
fn text_value_max_len(value: &Value) -> usize {
    match value {
        Value::Decimal(s) | Value::Text(s) => 2 * s.len() + 2,
        Value::Bytes(b) => 2 * b.len() + 9,
        Value::Json(j) => 2 * j.to_string().len() + 2,
        Value::Float(v) => v.to_string().len(),
        Value::Double(v) => v.to_string().len(),
        _ => 48,
    }
}

/// COM_QUERY batch with parameters bound on the client.
///
/// Each parameter set becomes one statement, its values escaped into the
/// SQL text. Statements are joined with `;` into as few commands as the
/// packet limits allow; every command is answered with one result per
/// statement. Needs the multi statement capability.
#[derive(Debug, Clone)]
pub struct BatchQueryPacket {
    sql: String,
    parts: Vec<String>,
    parameters: Vec<Vec<Value>>,
}

impl BatchQueryPacket {
    /// `sql` holds one `?` per value of every parameter set.
    pub fn new(sql: impl Into<String>, parameters: Vec<Vec<Value>>) -> Self {
        let sql = sql.into();
        let parts = split_placeholders(&sql)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            sql,
            parts,
            parameters,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn placeholders(&self) -> usize {
        self.parts.len() - 1
    }

    pub fn parameters(&self) -> &[Vec<Value>] {
        &self.parameters
    }

    fn statement_max_len(&self, values: &[Value]) -> usize {
        self.parts.iter().map(String::len).sum::<usize>()
            + values.iter().map(text_value_max_len).sum::<usize>()
    }

    fn write_statement(
        &self,
        writer: &mut PacketWriter,
        values: &[Value],
        no_backslash_escapes: bool,
    ) -> Result<()> {
        for (part, value) in self.parts.iter().zip(values) {
            writer.write_string(part)?;
            write_text_value(writer, value, no_backslash_escapes)?;
        }
        writer.write_string(&self.parts[self.placeholders()])
    }

    /// Largest payload of one command: below `max_allowed_packet` and
    /// within a single packet.
    fn command_limit(writer: &PacketWriter) -> usize {
        let max_allowed = writer.max_allowed_packet().map_or(usize::MAX, |max| {
            usize::try_from(max).unwrap_or(usize::MAX).saturating_sub(1)
        });
        max_allowed.min(MAX_PACKET_SIZE - 1)
    }

    fn start_command(writer: &mut PacketWriter) -> Result<()> {
        writer.init_packet();
        writer.write_byte(Command::Query as u8)
    }
}

impl ClientMessage for BatchQueryPacket {
    fn encode(&self, writer: &mut PacketWriter, context: &Context) -> Result<usize> {
        if self.parameters.is_empty() {
            return Ok(0);
        }
        let no_backslash_escapes =
            context.server_status() & server_status::NO_BACKSLASH_ESCAPES != 0;
        let limit = Self::command_limit(writer);
        let mut commands = 0;
        let mut statements = 0;

        Self::start_command(writer)?;
        for values in &self.parameters {
            if statements > 0 && self.statement_max_len(values) >= limit {
                // cannot share a command
                writer.flush()?;
                commands += 1;
                statements = 0;
                Self::start_command(writer)?;
            }
            if statements == 0 {
                self.write_statement(writer, values, no_backslash_escapes)?;
                statements = 1;
                continue;
            }

            writer.mark();
            writer.write_byte(b';')?;
            self.write_statement(writer, values, no_backslash_escapes)?;

            if writer.buf_is_data_after_mark() {
                // the statements before the mark already went out as a command
                commands += 1;
                let carried = writer.reset_mark().unwrap_or_default();
                Self::start_command(writer)?;
                writer.write_bytes(carried.get(1..).unwrap_or_default())?;
                statements = 1;
            } else if writer.pos() - 4 > limit {
                writer.reset_mark();
                writer.flush()?;
                commands += 1;
                Self::start_command(writer)?;
                self.write_statement(writer, values, no_backslash_escapes)?;
                statements = 1;
            } else {
                writer.clear_mark();
                statements += 1;
            }
        }
        writer.flush()?;
        Ok(commands + 1)
    }

    fn description(&self) -> Option<&str> {
        Some(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::server::tests::test_context;
    use crate::protocol::capabilities as caps;

    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn writer() -> (PacketWriter, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let sink = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let out: Box<dyn std::io::Write + Send> = Box::new(SharedBuf(sink.clone()));
        (PacketWriter::new(out, 1024, None), sink)
    }

    #[test]
    fn test_query_packet() {
        let (mut w, sink) = writer();
        let context = test_context(caps::BASE_CLIENT_FLAGS);
        let count = QueryPacket::new("SELECT 1").encode(&mut w, &context).unwrap();
        assert_eq!(count, 1);
        let sent = sink.lock().unwrap().clone();
        assert_eq!(&sent[..4], &[9, 0, 0, 0]);
        assert_eq!(sent[4], 0x03);
        assert_eq!(&sent[5..], b"SELECT 1");
    }

    #[test]
    fn test_commands_restart_sequence() {
        let (mut w, sink) = writer();
        let context = test_context(caps::BASE_CLIENT_FLAGS);
        assert_eq!(PingPacket.encode(&mut w, &context).unwrap(), 1);
        assert_eq!(ClosePreparePacket::new(7).encode(&mut w, &context).unwrap(), 0);
        assert_eq!(QuitPacket.encode(&mut w, &context).unwrap(), 0);
        let sent = sink.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                1, 0, 0, 0, 0x0e, //
                5, 0, 0, 0, 0x19, 7, 0, 0, 0, //
                1, 0, 0, 0, 0x01,
            ]
        );
    }

    #[test]
    fn test_local_infile_override() {
        let packet = QueryPacket::with_local_infile(
            "LOAD DATA LOCAL INFILE 'x' INTO TABLE t",
            b"1\n2\n".to_vec(),
        );
        let mut content = String::new();
        packet.local_infile_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "1\n2\n");
        assert!(QueryPacket::new("SELECT 1").local_infile_stream().is_none());
    }

    #[test]
    fn test_handshake_response_layout() {
        let (mut w, sink) = writer();
        w.set_sequence(0);
        let caps = caps::CLIENT_PROTOCOL_41
            | caps::SECURE_CONNECTION
            | caps::PLUGIN_AUTH
            | caps::CONNECT_WITH_DB
            | caps::PLUGIN_AUTH_LENENC_CLIENT_DATA;
        let response = HandshakeResponse {
            client_capabilities: caps,
            charset: 224,
            user: "root",
            auth_data: &[1, 2, 3],
            auth_plugin: "mysql_native_password",
            database: Some("test"),
            host: "localhost",
            connection_attributes: None,
        };
        response.encode(&mut w).unwrap();
        let sent = sink.lock().unwrap().clone();
        assert_eq!(sent[3], 1, "continues the greeting sequence");
        let body = &sent[4..];
        assert_eq!(&body[0..4], &(caps as u32).to_le_bytes());
        assert_eq!(&body[4..8], &MAX_PACKET_ANNOUNCED.to_le_bytes());
        assert_eq!(body[8], 224);
        assert_eq!(&body[32..37], b"root\0");
        assert_eq!(&body[37..41], &[3, 1, 2, 3]);
        assert_eq!(&body[41..46], b"test\0");
        assert_eq!(&body[46..], b"mysql_native_password\0");
    }

    #[test]
    fn test_connect_attributes() {
        let response = HandshakeResponse {
            client_capabilities: 0,
            charset: 224,
            user: "u",
            auth_data: &[],
            auth_plugin: "",
            database: None,
            host: "db1",
            connection_attributes: Some("app:billing,flag"),
        };
        let attrs = response.connect_attributes();
        let text = String::from_utf8_lossy(&attrs);
        assert!(text.contains("_client_name"));
        assert!(text.contains("_server_host"));
        assert!(text.contains("db1"));
        // "app" -> "billing", "flag" -> ""
        assert!(attrs.windows(12).any(|w| w == b"\x03app\x07billing"));
        assert!(attrs.ends_with(b"\x04flag\x00"));
    }

    #[test]
    fn test_binary_parameter_encoding() {
        let (mut w, sink) = writer();
        w.init_packet();
        write_binary_value(&mut w, &Value::Int(-2)).unwrap();
        write_binary_value(&mut w, &Value::Text("ab".into())).unwrap();
        write_binary_value(
            &mut w,
            &Value::DateTime(mariadb_core::DateTime::new(
                mariadb_core::Date::new(2024, 1, 2),
                3,
                4,
                5,
                0,
            )),
        )
        .unwrap();
        w.flush().unwrap();
        let sent = sink.lock().unwrap().clone();
        let body = &sent[4..];
        assert_eq!(&body[..4], &(-2i32).to_le_bytes());
        assert_eq!(&body[4..7], &[2, b'a', b'b']);
        assert_eq!(&body[7..], &[7, 0xe8, 0x07, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_execute_packet_layout() {
        let (mut w, sink) = writer();
        let context = test_context(caps::BASE_CLIENT_FLAGS);
        let prepare = PrepareResult::new(5, "SELECT ?, ?", Vec::new(), Vec::new(), 0);
        let execute = ExecutePacket::new(&prepare, vec![Value::Null, Value::UnsignedBigInt(7)]);
        assert!(execute.can_skip_meta());
        assert_eq!(execute.encode(&mut w, &context).unwrap(), 1);

        let sent = sink.lock().unwrap().clone();
        let body = &sent[4..];
        assert_eq!(body[0], 0x17);
        assert_eq!(&body[1..5], &5u32.to_le_bytes());
        assert_eq!(body[5], 0);
        assert_eq!(&body[6..10], &1u32.to_le_bytes());
        assert_eq!(body[10], 0b01, "null bitmap");
        assert_eq!(body[11], 1, "types bound");
        assert_eq!(&body[12..16], &[DataType::Null as u8, 0, DataType::BigInt as u8, 0x80]);
        assert_eq!(&body[16..], &7u64.to_le_bytes());

        let pipelined = ExecutePacket::for_last_prepared("SELECT 1", Vec::new());
        assert_eq!(pipelined.statement_id(), LAST_PREPARED_STATEMENT);
        assert!(!pipelined.can_skip_meta());
        assert!(pipelined.cached_columns().is_none());
    }

    #[test]
    fn test_parameter_types() {
        assert_eq!(parameter_type(&Value::UnsignedBigInt(1)), (DataType::BigInt, true));
        assert_eq!(parameter_type(&Value::Null), (DataType::Null, false));
        assert_eq!(
            format_uuid(&[
                0x12, 0x3e, 0x45, 0x67, 0xe8, 0x9b, 0x12, 0xd3, 0xa4, 0x56, 0x42, 0x66, 0x14, 0x17,
                0x40, 0x00
            ]),
            "123e4567-e89b-12d3-a456-426614174000"
        );
    }

    fn payloads(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos + 4 <= bytes.len() {
            let len = usize::from(bytes[pos])
                | usize::from(bytes[pos + 1]) << 8
                | usize::from(bytes[pos + 2]) << 16;
            out.push(bytes[pos + 4..pos + 4 + len].to_vec());
            pos += 4 + len;
        }
        out
    }

    #[test]
    fn test_batch_writes_escaped_literals() {
        let (mut w, sink) = writer();
        let mut context = test_context(caps::BASE_CLIENT_FLAGS);
        let batch = BatchQueryPacket::new(
            "SELECT ?, ?, ?, ?, ?, ? /* ? */",
            vec![vec![
                Value::Null,
                Value::Bool(true),
                Value::BigInt(-3),
                Value::Text("a'b\\".into()),
                Value::Bytes(vec![0, b'x']),
                Value::Date(mariadb_core::Date::new(2024, 1, 2)),
            ]],
        );
        assert_eq!(batch.placeholders(), 6);
        assert_eq!(batch.encode(&mut w, &context).unwrap(), 1);

        context.set_server_status(server_status::NO_BACKSLASH_ESCAPES);
        assert_eq!(batch.encode(&mut w, &context).unwrap(), 1);

        let sent = payloads(&sink.lock().unwrap());
        assert_eq!(
            sent[0],
            b"\x03SELECT NULL, 1, -3, 'a\\'b\\\\', _binary'\\\0x', '2024-01-02' /* ? */".to_vec()
        );
        assert_eq!(
            sent[1],
            b"\x03SELECT NULL, 1, -3, 'a''b\\', _binary'\0x', '2024-01-02' /* ? */".to_vec()
        );
    }

    #[test]
    fn test_batch_joins_statements() {
        let (mut w, sink) = writer();
        let context = test_context(caps::BASE_CLIENT_FLAGS);
        let batch = BatchQueryPacket::new(
            "DELETE FROM t WHERE id = ?",
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
        );
        assert_eq!(batch.encode(&mut w, &context).unwrap(), 1);
        let sent = payloads(&sink.lock().unwrap());
        assert_eq!(
            sent,
            vec![b"\x03DELETE FROM t WHERE id = 1;DELETE FROM t WHERE id = 2".to_vec()]
        );
        assert_eq!(
            BatchQueryPacket::new("SELECT 1", Vec::new()).encode(&mut w, &context).unwrap(),
            0
        );
    }

    #[test]
    fn test_batch_splits_when_packet_fills_past_mark() {
        let (mut w, sink) = writer();
        let context = test_context(caps::BASE_CLIENT_FLAGS);
        let text = |c: char| Value::Text(c.to_string().repeat(5_000_000));
        let batch = BatchQueryPacket::new(
            "INSERT INTO t VALUES (?)",
            vec![vec![text('a')], vec![text('b')], vec![text('c')]],
        );
        assert_eq!(batch.encode(&mut w, &context).unwrap(), 2);

        let statement = |c: char| format!("INSERT INTO t VALUES ('{}')", c.to_string().repeat(5_000_000));
        let sent = payloads(&sink.lock().unwrap());
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], format!("\x03{};{}", statement('a'), statement('b')).into_bytes());
        assert_eq!(sent[1], format!("\x03{}", statement('c')).into_bytes());
    }
}
