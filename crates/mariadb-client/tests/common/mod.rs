//! Scripted server byte streams for driving a connection without a server.
//!
//! The connection reads from a prebuilt sequence of response packets and
//! writes into a shared buffer the test inspects afterwards.

#![allow(dead_code)]

use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex};

use mariadb_client::protocol::capabilities as caps;
use mariadb_client::protocol::server_status;

pub const VARCHAR: u8 = 253;
pub const INT: u8 = 3;
pub const BIGINT: u8 = 8;

/// Capabilities of a MariaDB 10.6 server, without pipelining or
/// deprecated EOF.
pub const MARIADB_BASE: u64 = caps::LONG_FLAG
    | caps::CONNECT_WITH_DB
    | caps::LOCAL_FILES
    | caps::CLIENT_PROTOCOL_41
    | caps::TRANSACTIONS
    | caps::SECURE_CONNECTION
    | caps::MULTI_STATEMENTS
    | caps::MULTI_RESULTS
    | caps::PS_MULTI_RESULTS
    | caps::PLUGIN_AUTH
    | caps::CONNECT_ATTRS
    | caps::PLUGIN_AUTH_LENENC_CLIENT_DATA;

/// Capabilities of a MariaDB server accepting pipelined commands and
/// terminating result sets with OK packets.
pub const MARIADB_PIPELINE: u64 =
    MARIADB_BASE | caps::CLIENT_DEPRECATE_EOF | caps::STMT_BULK_OPERATIONS;

pub const MARIADB_VERSION: &str = "5.5.5-10.6.12-MariaDB-log";

pub fn lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < 65_536 {
        out.push(0xfc);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 16_777_216 {
        out.push(0xfd);
        out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        out.push(0xfe);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn lenenc_str(out: &mut Vec<u8>, value: &str) {
    lenenc(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Server responses, framed with consecutive sequence numbers.
#[derive(Debug, Default)]
pub struct Script {
    bytes: Vec<u8>,
    sequence: u8,
    eof_deprecated: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a server greeting. Responses to the handshake continue its
    /// sequence; later responses restart at 1.
    pub fn greeting(version: &str, capabilities: u64, plugin: &str) -> Self {
        let mut script = Self {
            eof_deprecated: capabilities & caps::CLIENT_DEPRECATE_EOF != 0,
            ..Self::default()
        };
        let mut p = vec![0x0a];
        p.extend_from_slice(version.as_bytes());
        p.push(0);
        p.extend_from_slice(&42u32.to_le_bytes());
        p.extend_from_slice(b"abcdefgh");
        p.push(0);
        p.extend_from_slice(&((capabilities & 0xffff) as u16).to_le_bytes());
        p.push(45);
        p.extend_from_slice(&server_status::AUTOCOMMIT.to_le_bytes());
        p.extend_from_slice(&(((capabilities >> 16) & 0xffff) as u16).to_le_bytes());
        p.push(21);
        p.extend_from_slice(&[0; 6]);
        p.extend_from_slice(&((capabilities >> 32) as u32).to_le_bytes());
        p.extend_from_slice(b"ijklmnopqrst");
        p.push(0);
        p.extend_from_slice(plugin.as_bytes());
        p.push(0);
        script.sequence = 0;
        script.push(&p);
        // the client handshake response takes sequence 1
        script.sequence = 2;
        script
    }

    /// Greeting of a MariaDB server, authentication accepted.
    pub fn connected(capabilities: u64) -> Self {
        let mut script = Self::greeting(MARIADB_VERSION, capabilities, "mysql_native_password");
        script.ok(0, 0, server_status::AUTOCOMMIT);
        script
    }

    /// Responses to the next command start at sequence 1.
    pub fn command(&mut self) -> &mut Self {
        self.sequence = 1;
        self
    }

    pub fn push(&mut self, payload: &[u8]) -> &mut Self {
        let len = payload.len() as u32;
        self.bytes.extend_from_slice(&len.to_le_bytes()[..3]);
        self.bytes.push(self.sequence);
        self.bytes.extend_from_slice(payload);
        self.sequence = self.sequence.wrapping_add(1);
        self
    }

    pub fn ok(&mut self, affected_rows: u64, last_insert_id: u64, status: u16) -> &mut Self {
        let mut p = vec![0x00];
        lenenc(&mut p, affected_rows);
        lenenc(&mut p, last_insert_id);
        p.extend_from_slice(&status.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        self.push(&p)
    }

    pub fn error(&mut self, code: u16, sqlstate: &str, message: &str) -> &mut Self {
        let mut p = vec![0xff];
        p.extend_from_slice(&code.to_le_bytes());
        p.push(b'#');
        p.extend_from_slice(sqlstate.as_bytes());
        p.extend_from_slice(message.as_bytes());
        self.push(&p)
    }

    pub fn auth_switch(&mut self, plugin: &str, seed: &[u8]) -> &mut Self {
        let mut p = vec![0xfe];
        p.extend_from_slice(plugin.as_bytes());
        p.push(0);
        p.extend_from_slice(seed);
        p.push(0);
        self.push(&p)
    }

    pub fn column_count(&mut self, count: u64) -> &mut Self {
        let mut p = Vec::new();
        lenenc(&mut p, count);
        self.push(&p)
    }

    pub fn column(&mut self, name: &str, data_type: u8) -> &mut Self {
        let mut p = Vec::new();
        for s in ["def", "test", "t", "t", name, name] {
            lenenc_str(&mut p, s);
        }
        p.push(0x0c);
        p.extend_from_slice(&45u16.to_le_bytes());
        p.extend_from_slice(&255u32.to_le_bytes());
        p.push(data_type);
        p.extend_from_slice(&0u16.to_le_bytes());
        p.push(0);
        p.extend_from_slice(&[0, 0]);
        self.push(&p)
    }

    /// Column count and definitions of a result set, with the EOF that
    /// follows them on servers still sending it.
    pub fn columns(&mut self, columns: &[(&str, u8)]) -> &mut Self {
        self.column_count(columns.len() as u64);
        for (name, data_type) in columns {
            self.column(name, *data_type);
        }
        if !self.eof_deprecated {
            self.eof(server_status::AUTOCOMMIT);
        }
        self
    }

    pub fn text_row(&mut self, values: &[Option<&str>]) -> &mut Self {
        let mut p = Vec::new();
        for value in values {
            match value {
                Some(v) => lenenc_str(&mut p, v),
                None => p.push(0xfb),
            }
        }
        self.push(&p)
    }

    pub fn eof(&mut self, status: u16) -> &mut Self {
        let mut p = vec![0xfe];
        p.extend_from_slice(&0u16.to_le_bytes());
        p.extend_from_slice(&status.to_le_bytes());
        self.push(&p)
    }

    /// Result set terminator: an EOF, or an OK with a 0xFE header.
    pub fn end_of_rows(&mut self, status: u16) -> &mut Self {
        if !self.eof_deprecated {
            return self.eof(status);
        }
        let mut p = vec![0xfe, 0, 0];
        p.extend_from_slice(&status.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        self.push(&p)
    }

    /// COM_STMT_PREPARE response without parameter or column definitions
    /// beyond the ones given.
    pub fn prepare_ok(&mut self, statement_id: u32, params: u16, columns: &[(&str, u8)]) -> &mut Self {
        let mut p = vec![0x00];
        p.extend_from_slice(&statement_id.to_le_bytes());
        p.extend_from_slice(&(columns.len() as u16).to_le_bytes());
        p.extend_from_slice(&params.to_le_bytes());
        p.push(0);
        p.extend_from_slice(&0u16.to_le_bytes());
        self.push(&p);
        if params > 0 {
            for i in 0..params {
                self.column(&format!("?{i}"), VARCHAR);
            }
            if !self.eof_deprecated {
                self.eof(server_status::AUTOCOMMIT);
            }
        }
        if !columns.is_empty() {
            for (name, data_type) in columns {
                self.column(name, *data_type);
            }
            if !self.eof_deprecated {
                self.eof(server_status::AUTOCOMMIT);
            }
        }
        self
    }

    pub fn local_infile_request(&mut self, filename: &str) -> &mut Self {
        let mut p = vec![0xfb];
        p.extend_from_slice(filename.as_bytes());
        self.push(&p)
    }

    pub fn into_reader(self) -> Box<dyn io::Read + Send> {
        Box::new(Cursor::new(self.bytes))
    }
}

/// Writer shared with the test, recording what the client sent.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> Box<dyn Write + Send> {
        Box::new(self.clone())
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Payloads of the packets written so far.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        let bytes = self.bytes();
        let mut packets = Vec::new();
        let mut pos = 0;
        while pos + 4 <= bytes.len() {
            let len = usize::from(bytes[pos])
                | usize::from(bytes[pos + 1]) << 8
                | usize::from(bytes[pos + 2]) << 16;
            packets.push(bytes[pos + 4..pos + 4 + len].to_vec());
            pos += 4 + len;
        }
        packets
    }

    /// Packets written after the handshake response.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.packets().into_iter().skip(1).collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
