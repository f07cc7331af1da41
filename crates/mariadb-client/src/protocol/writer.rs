//! Packet framing on the send side.
//!
//! Commands are built directly in an output buffer whose first 4 bytes are
//! reserved for the packet header. The buffer grows through fixed tiers
//! (8KB, 128KB, 1MB, max packet); once a full packet worth of data is
//! buffered it is sent and the buffer restarts after the header.
//!
//! A mark can be set while building a command. When the buffer has to be
//! flushed past a mark, only the bytes before the mark are sent and the bytes
//! after it are moved to the start of a new packet.

#![allow(clippy::cast_possible_truncation)]

use std::io::Write;

use mariadb_core::error::{Error, PacketTooLargeError};
use mariadb_core::Result;

use super::{MAX_PACKET_SIZE, hex_dump};

/// Initial buffer size.
pub const SMALL_BUFFER_SIZE: usize = 8192;
const MEDIUM_BUFFER_SIZE: usize = 128 * 1024;
const LARGE_BUFFER_SIZE: usize = 1024 * 1024;
/// Largest buffer holding one packet: header plus maximal payload.
pub const MAX_PACKET_LENGTH: usize = MAX_PACKET_SIZE + 4;

const QUOTE: u8 = b'\'';
const DBL_QUOTE: u8 = b'"';
const ZERO_BYTE: u8 = 0;
const BACKSLASH: u8 = b'\\';

/// Sequence value meaning "no packet sent yet for the current command".
pub const INITIAL_SEQUENCE: u8 = 0xff;

/// Builds and sends framed packets.
///
/// Owns the connection's packet sequence counter. Access is serialized by the
/// connection's command lock, so the counter is a plain byte.
pub struct PacketWriter<W = Box<dyn Write + Send>> {
    out: W,
    buf: Vec<u8>,
    pos: usize,
    max_packet_length: usize,
    max_allowed_packet: Option<u64>,
    cmd_length: u64,
    permit_trace: bool,
    server_thread_log: String,
    max_query_size_to_log: usize,
    mark: Option<usize>,
    data_after_mark: bool,
    sequence: u8,
}

impl<W> std::fmt::Debug for PacketWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("pos", &self.pos)
            .field("buf_len", &self.buf.len())
            .field("cmd_length", &self.cmd_length)
            .field("mark", &self.mark)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl<W: Write> PacketWriter<W> {
    /// Create a writer. `max_allowed_packet` is the server limit, when known.
    pub fn new(out: W, max_query_size_to_log: usize, max_allowed_packet: Option<u64>) -> Self {
        Self {
            out,
            buf: vec![0; SMALL_BUFFER_SIZE],
            pos: 4,
            max_packet_length: MAX_PACKET_LENGTH,
            max_allowed_packet,
            cmd_length: 0,
            permit_trace: true,
            server_thread_log: String::new(),
            max_query_size_to_log,
            mark: None,
            data_after_mark: false,
            sequence: INITIAL_SEQUENCE,
        }
    }

    /// Current write position in the buffer (header included).
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the write position, growing the buffer if needed.
    pub fn set_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            self.grow_buffer(pos - self.pos)?;
        }
        self.pos = pos;
        Ok(())
    }

    /// Current buffer capacity.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Bytes already sent for the current command.
    pub fn cmd_length(&self) -> u64 {
        self.cmd_length
    }

    /// Current sequence number.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Align the counter with the sequence of the last received packet.
    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    /// Server `max_allowed_packet`, when known.
    pub fn max_allowed_packet(&self) -> Option<u64> {
        self.max_allowed_packet
    }

    /// Hide packet content from trace logs (authentication data).
    pub fn permit_trace(&mut self, permit: bool) {
        self.permit_trace = permit;
    }

    /// Set the `conn=<id> (M|S)` log prefix.
    pub fn set_server_thread_log(&mut self, prefix: String) {
        self.server_thread_log = prefix;
    }

    /// Write a single byte.
    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        if self.pos >= self.buf.len() {
            if self.pos >= self.max_packet_length {
                // a full packet is buffered
                self.write_socket(false)?;
            } else {
                self.grow_buffer(1)?;
            }
        }
        self.buf[self.pos] = value;
        self.pos += 1;
        Ok(())
    }

    /// Write a u16 (little-endian).
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a u32 (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write a u64 (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write an f32 (little-endian).
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write an f64 (little-endian).
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Write raw bytes, sending full packets as the buffer fills.
    pub fn write_bytes(&mut self, arr: &[u8]) -> Result<()> {
        let len = arr.len();
        if len > self.buf.len().saturating_sub(self.pos) {
            if self.buf.len() != self.max_packet_length {
                self.grow_buffer(len)?;
            }

            if len > self.buf.len().saturating_sub(self.pos) {
                if self.mark.is_some() {
                    self.grow_buffer(len)?;
                    if self.mark.is_some() {
                        self.flush_buffer_stop_at_mark()?;
                    }
                }

                if len > self.buf.len().saturating_sub(self.pos) {
                    // stream: fill the buffer, send it, repeat
                    if self.buf.len() < self.max_packet_length {
                        self.buf.resize(self.max_packet_length, 0);
                    }
                    let mut off = 0;
                    loop {
                        let room = self.max_packet_length.saturating_sub(self.pos);
                        let fill = room.min(len - off);
                        self.buf[self.pos..self.pos + fill].copy_from_slice(&arr[off..off + fill]);
                        off += fill;
                        self.pos += fill;
                        if off < len {
                            self.write_socket(false)?;
                        } else {
                            return Ok(());
                        }
                    }
                }
            }
        }

        self.buf[self.pos..self.pos + len].copy_from_slice(arr);
        self.pos += len;
        Ok(())
    }

    /// Write a length-encoded integer using the minimal width.
    pub fn write_length(&mut self, length: u64) -> Result<()> {
        if length < 251 {
            self.write_byte(length as u8)
        } else if length < 65_536 {
            let b = length.to_le_bytes();
            self.write_bytes(&[0xfc, b[0], b[1]])
        } else if length < 16_777_216 {
            let b = length.to_le_bytes();
            self.write_bytes(&[0xfd, b[0], b[1], b[2]])
        } else {
            let b = length.to_le_bytes();
            self.write_bytes(&[0xfe, b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }
    }

    /// Write a UTF-8 string without terminator.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Write a string for inline embedding in a quoted SQL literal.
    pub fn write_string_escaped(&mut self, s: &str, no_backslash_escapes: bool) -> Result<()> {
        self.write_bytes_escaped(s.as_bytes(), no_backslash_escapes)
    }

    /// Write bytes for inline embedding in a quoted SQL literal.
    ///
    /// With `no_backslash_escapes` only `'` is doubled; otherwise `\`, `'`,
    /// `"` and NUL are prefixed with a backslash.
    pub fn write_bytes_escaped(&mut self, bytes: &[u8], no_backslash_escapes: bool) -> Result<()> {
        let needed = bytes.len() * 2;
        if needed > self.buf.len().saturating_sub(self.pos) {
            if self.buf.len() != self.max_packet_length {
                self.grow_buffer(needed)?;
            }

            if needed > self.buf.len().saturating_sub(self.pos) && self.mark.is_some() {
                self.grow_buffer(needed)?;
                if self.mark.is_some() {
                    self.flush_buffer_stop_at_mark()?;
                }
            }

            if needed > self.buf.len().saturating_sub(self.pos) {
                // not enough room: byte by byte, sending full packets
                for &b in bytes {
                    if escape_needed(b, no_backslash_escapes) {
                        let prefix = if no_backslash_escapes { QUOTE } else { BACKSLASH };
                        self.write_byte(prefix)?;
                    }
                    self.write_byte(b)?;
                }
                return Ok(());
            }
        }

        for &b in bytes {
            if escape_needed(b, no_backslash_escapes) {
                self.buf[self.pos] = if no_backslash_escapes { QUOTE } else { BACKSLASH };
                self.pos += 1;
            }
            self.buf[self.pos] = b;
            self.pos += 1;
        }
        Ok(())
    }

    fn grow_buffer(&mut self, len: usize) -> Result<()> {
        let buf_length = self.buf.len();
        let mut new_capacity = if buf_length == SMALL_BUFFER_SIZE {
            if len + self.pos <= MEDIUM_BUFFER_SIZE {
                MEDIUM_BUFFER_SIZE
            } else if len + self.pos <= LARGE_BUFFER_SIZE {
                LARGE_BUFFER_SIZE
            } else {
                self.max_packet_length
            }
        } else if buf_length == MEDIUM_BUFFER_SIZE {
            if len + self.pos < LARGE_BUFFER_SIZE {
                LARGE_BUFFER_SIZE
            } else {
                self.max_packet_length
            }
        } else {
            self.max_packet_length
        };

        if len + self.pos > new_capacity && self.mark.is_some() {
            // over a full packet with a mark: send up to the mark
            self.flush_buffer_stop_at_mark()?;
            if len + self.pos <= buf_length || buf_length == self.max_packet_length {
                return Ok(());
            }
            if len + self.pos > new_capacity {
                new_capacity = self.max_packet_length.min(len + self.pos);
            }
        }

        if new_capacity > buf_length {
            self.buf.resize(new_capacity, 0);
        }
        Ok(())
    }

    /// Send an empty packet, terminating a command whose last packet was full.
    pub fn write_empty_packet(&mut self) -> Result<()> {
        self.sequence = self.sequence.wrapping_add(1);
        let header = [0, 0, 0, self.sequence];
        self.out.write_all(&header)?;
        tracing::trace!(
            "send com : content length=0 {}\n{}",
            self.server_thread_log,
            hex_dump(&header, 4)
        );
        self.out.flush()?;
        self.cmd_length = 0;
        Ok(())
    }

    /// Send the buffered command.
    pub fn flush(&mut self) -> Result<()> {
        self.write_socket(true)?;
        self.finish_command();
        Ok(())
    }

    fn finish_command(&mut self) {
        // shrink back if the last command used less than half of a big buffer
        if self.buf.len() > SMALL_BUFFER_SIZE && self.cmd_length * 2 < self.buf.len() as u64 {
            self.buf = vec![0; SMALL_BUFFER_SIZE];
        }
        self.pos = 4;
        self.cmd_length = 0;
        self.mark = None;
        self.data_after_mark = false;
    }

    fn check_max_allowed_length(&self, length: usize) -> Result<()> {
        if let Some(max) = self.max_allowed_packet {
            let total = self.cmd_length + length as u64;
            if total >= max {
                return Err(Error::PacketTooLarge(PacketTooLargeError {
                    message: format!(
                        "query size ({}) is >= to max_allowed_packet ({})",
                        total, max
                    ),
                    must_reconnect: self.cmd_length != 0,
                }));
            }
        }
        Ok(())
    }

    /// Remember the current position.
    pub fn mark(&mut self) {
        self.mark = Some(self.pos);
    }

    /// Forget the mark, keeping what was written after it.
    pub fn clear_mark(&mut self) {
        self.mark = None;
    }

    /// Is a mark set?
    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }

    /// Has any packet of the current command been sent?
    pub fn has_flushed(&self) -> bool {
        self.sequence != INITIAL_SEQUENCE
    }

    /// Does the buffer start with bytes that were after a mark?
    pub fn buf_is_data_after_mark(&self) -> bool {
        self.data_after_mark
    }

    /// Send the bytes before the mark as a complete command, then move the
    /// bytes after the mark to the start of a new packet.
    pub fn flush_buffer_stop_at_mark(&mut self) -> Result<()> {
        let Some(mark) = self.mark else {
            return Ok(());
        };
        let end = self.pos;
        self.pos = mark;
        self.write_socket(true)?;
        self.init_packet();

        self.buf.copy_within(mark..end, self.pos);
        self.pos += end - mark;
        self.mark = None;
        self.data_after_mark = true;
        Ok(())
    }

    /// Drop the mark, discarding what was written after it.
    ///
    /// When earlier data was already sent up to the mark, returns the pending
    /// bytes that were carried over and restarts a fresh packet.
    pub fn reset_mark(&mut self) -> Option<Vec<u8>> {
        if let Some(mark) = self.mark.take() {
            self.pos = mark;
        }
        if self.data_after_mark {
            let data = self.buf[4..self.pos].to_vec();
            self.init_packet();
            self.data_after_mark = false;
            return Some(data);
        }
        None
    }

    /// Start a new command: sequence restarts and the buffer is emptied.
    pub fn init_packet(&mut self) {
        self.sequence = INITIAL_SEQUENCE;
        self.pos = 4;
        self.cmd_length = 0;
        self.mark = None;
        self.data_after_mark = false;
    }

    fn write_socket(&mut self, command_end: bool) -> Result<()> {
        if self.pos > 4 {
            let len = self.pos - 4;
            self.buf[0] = len as u8;
            self.buf[1] = (len >> 8) as u8;
            self.buf[2] = (len >> 16) as u8;
            self.sequence = self.sequence.wrapping_add(1);
            self.buf[3] = self.sequence;
            self.check_max_allowed_length(len)?;
            self.out.write_all(&self.buf[..self.pos])?;
            if command_end {
                self.out.flush()?;
            }
            self.cmd_length += len as u64;

            if self.permit_trace {
                tracing::trace!(
                    "send: {}\n{}",
                    self.server_thread_log,
                    hex_dump(&self.buf[..self.pos], self.max_query_size_to_log)
                );
            } else {
                tracing::trace!(
                    "send: content length={} {} com=<hidden>",
                    len,
                    self.server_thread_log
                );
            }

            // a command ending on a full packet needs an empty packet after it
            if command_end && self.pos == self.max_packet_length {
                self.write_empty_packet()?;
            }

            self.pos = 4;
        }
        Ok(())
    }

    /// Consume the writer, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.out
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        &self.out
    }
}

fn escape_needed(b: u8, no_backslash_escapes: bool) -> bool {
    if no_backslash_escapes {
        b == QUOTE
    } else {
        matches!(b, QUOTE | BACKSLASH | DBL_QUOTE | ZERO_BYTE)
    }
}
