//! Cursor over a received packet payload.
//!
//! Every read advances the cursor. Reads past the end of the payload fail with
//! a protocol error instead of panicking, so a malformed server response can
//! never bring the process down.

#![allow(clippy::cast_possible_truncation)]

use mariadb_core::error::{Error, ProtocolError};
use mariadb_core::Result;

/// Sentinel length byte meaning SQL NULL.
pub const NULL_LENGTH: u8 = 0xFB;

/// A reader over one packet payload.
#[derive(Debug, Clone)]
pub struct ReadableBuf<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ReadableBuf<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The underlying payload.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor to an absolute position.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Remaining bytes after the cursor.
    pub fn readable_bytes(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Protocol(ProtocolError {
            message: format!(
                "truncated packet: needed {} bytes at position {} but only {} available",
                needed,
                self.pos,
                self.readable_bytes()
            ),
            raw_data: Some(self.data.to_vec()),
            source: None,
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.readable_bytes() < len {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Skip one length-encoded field (a NULL sentinel skips nothing more).
    pub fn skip_length_encoded(&mut self) -> Result<()> {
        match self.read_u8()? {
            NULL_LENGTH => Ok(()),
            0xFC => {
                let len = self.read_u16()?;
                self.skip(usize::from(len))
            }
            0xFD => {
                let len = self.read_u24()?;
                self.skip(len as usize)
            }
            0xFE => {
                let len = self.read_u64()?;
                self.skip(len as usize)
            }
            len => self.skip(usize::from(len)),
        }
    }

    /// Skip a length-encoded identifier and return the new cursor position.
    pub fn skip_identifier(&mut self) -> Result<usize> {
        let len = self.read_length_not_null()?;
        self.skip(len as usize)?;
        Ok(self.pos)
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Read an i16 (little-endian).
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    /// Read a sign-extended 24-bit integer.
    pub fn read_i24(&mut self) -> Result<i32> {
        let value = self.read_u24()?;
        if value & 0x80_0000 != 0 {
            Ok((value | 0xFF00_0000) as i32)
        } else {
            Ok(value as i32)
        }
    }

    /// Read a u32 (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read an i32 (little-endian).
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a u64 (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Read an i64 (little-endian).
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read an f32 (little-endian).
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read an f64 (little-endian).
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read a length-encoded integer, `None` for the NULL sentinel.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFB: NULL
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    pub fn read_length(&mut self) -> Result<Option<u64>> {
        match self.read_u8()? {
            NULL_LENGTH => Ok(None),
            0xFC => Ok(Some(u64::from(self.read_u16()?))),
            0xFD => Ok(Some(u64::from(self.read_u24()?))),
            0xFE => Ok(Some(self.read_u64()?)),
            len => Ok(Some(u64::from(len))),
        }
    }

    /// Read a length-encoded integer that cannot be NULL.
    pub fn read_length_not_null(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xFC => Ok(u64::from(self.read_u16()?)),
            0xFD => Ok(u64::from(self.read_u24()?)),
            0xFE => Ok(self.read_u64()?),
            len => Ok(u64::from(len)),
        }
    }

    /// Parse `len` ASCII digits (with an optional leading minus) as an i64.
    pub fn atoll(&mut self, len: usize) -> Result<i64> {
        let digits = self.take(len)?;
        let (negate, digits) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        let magnitude = parse_digits(digits)?;
        let value = magnitude as i64;
        Ok(if negate { 0i64.wrapping_sub(value) } else { value })
    }

    /// Parse `len` ASCII digits as a u64.
    pub fn atoull(&mut self, len: usize) -> Result<u64> {
        let digits = self.take(len)?;
        parse_digits(digits)
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Read bytes up to (not including) a NUL terminator, consuming the terminator.
    pub fn read_bytes_null_end(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                self.pos += idx + 1;
                &rest[..idx]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }

    /// Read a length-encoded sub-buffer.
    pub fn read_length_buffer(&mut self) -> Result<ReadableBuf<'a>> {
        let len = self.read_length_not_null()? as usize;
        Ok(ReadableBuf::new(self.take(len)?))
    }

    /// Read a length-encoded byte slice, `None` for NULL.
    pub fn read_length_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_length()? {
            Some(len) => self.take(len as usize).map(Some),
            None => Ok(None),
        }
    }

    /// Read a fixed-length UTF-8 string.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// Read a NUL-terminated UTF-8 string.
    pub fn read_string_null_end(&mut self) -> String {
        String::from_utf8_lossy(self.read_bytes_null_end()).into_owned()
    }

    /// Read the rest of the payload as UTF-8.
    pub fn read_string_eof(&mut self) -> String {
        String::from_utf8_lossy(self.read_bytes_eof()).into_owned()
    }

    /// Read the rest of the payload.
    pub fn read_bytes_eof(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }
}

fn parse_digits(digits: &[u8]) -> Result<u64> {
    let mut result: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol(ProtocolError {
                message: format!("invalid digit 0x{b:02x} in numeric text"),
                raw_data: Some(digits.to_vec()),
                source: None,
            }));
        }
        result = result.wrapping_mul(10).wrapping_add(u64::from(b - b'0'));
    }
    Ok(result)
}
