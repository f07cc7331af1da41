//! Packet framing on the receive side.
//!
//! A logical packet whose first segment has the maximal length (0xFFFFFF) is
//! continued by further segments until one is shorter; the payload is the
//! concatenation of all segments.

use std::io::{self, Read};

use mariadb_core::Result;

use super::{MAX_PACKET_SIZE, PacketHeader, hex_dump};

/// Packets shorter than this are read into the reusable scratch buffer.
pub const REUSABLE_BUFFER_LENGTH: usize = 1024;

/// Reads framed packets from a byte stream.
///
/// The reader records the sequence number of the last received header; the
/// connection hands it to the writer so that both sides share one counter.
pub struct PacketReader<R = Box<dyn Read + Send>> {
    stream: R,
    header: [u8; 4],
    scratch: Vec<u8>,
    sequence: u8,
    max_query_size_to_log: usize,
    server_thread_log: String,
}

impl<R> std::fmt::Debug for PacketReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("sequence", &self.sequence)
            .field("server_thread_log", &self.server_thread_log)
            .finish_non_exhaustive()
    }
}

impl<R: Read> PacketReader<R> {
    /// Create a reader over `stream`.
    pub fn new(stream: R, max_query_size_to_log: usize) -> Self {
        Self {
            stream,
            header: [0; 4],
            scratch: Vec::with_capacity(REUSABLE_BUFFER_LENGTH),
            sequence: 0,
            max_query_size_to_log,
            server_thread_log: String::new(),
        }
    }

    /// Sequence number of the last received packet header.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Set the `conn=<id> (M|S)` log prefix once the thread id is known.
    pub fn set_server_thread_log(&mut self, prefix: String) {
        self.server_thread_log = prefix;
    }

    /// Read one logical packet into a freshly allocated buffer.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        self.read_segments(&mut payload)?;
        Ok(payload)
    }

    /// Read one logical packet into the reusable scratch buffer.
    ///
    /// The returned slice is valid until the next read.
    pub fn read_reusable_packet(&mut self) -> Result<&[u8]> {
        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.capacity() > REUSABLE_BUFFER_LENGTH * 64 {
            scratch = Vec::with_capacity(REUSABLE_BUFFER_LENGTH);
        }
        scratch.clear();
        let outcome = self.read_segments(&mut scratch);
        self.scratch = scratch;
        outcome?;
        Ok(&self.scratch)
    }

    /// Discard one logical packet without keeping its content.
    pub fn skip_packet(&mut self) -> Result<()> {
        if tracing::enabled!(tracing::Level::TRACE) {
            self.read_reusable_packet()?;
            return Ok(());
        }
        loop {
            let len = self.read_header()?;
            let mut sink = (&mut self.stream).take(len as u64);
            let skipped = io::copy(&mut sink, &mut io::sink())?;
            if skipped < len as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream, skipping bytes (socket was closed by server)",
                )
                .into());
            }
            if len < MAX_PACKET_SIZE {
                return Ok(());
            }
        }
    }

    fn read_segments(&mut self, payload: &mut Vec<u8>) -> Result<()> {
        loop {
            let len = self.read_header()?;
            let start = payload.len();
            payload.resize(start + len, 0);
            read_fully(&mut self.stream, &mut payload[start..])?;
            tracing::trace!(
                "read: {}\n{}",
                self.server_thread_log,
                hex_dump(&payload[start..], self.max_query_size_to_log)
            );
            if len < MAX_PACKET_SIZE {
                return Ok(());
            }
        }
    }

    fn read_header(&mut self) -> Result<usize> {
        read_fully(&mut self.stream, &mut self.header)?;
        let header = PacketHeader::from_bytes(&self.header);
        self.sequence = header.sequence_id;
        Ok(header.payload_length as usize)
    }

    /// Consume the reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
    }
}

/// Fill `buf` entirely, failing with an "unexpected end of stream" error when
/// the peer closes the stream first.
fn read_fully<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut off = 0;
    while off < buf.len() {
        match stream.read(&mut buf[off..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "unexpected end of stream, read {} bytes from {} (socket was closed by server)",
                        off,
                        buf.len()
                    ),
                ));
            }
            Ok(n) => off += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame(payload: &[u8], seq: u8) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let header = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id: seq,
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_single_packet() {
        let mut stream = frame(b"\x00\x01\x02", 1);
        stream.extend(frame(b"abc", 2));
        let mut reader = PacketReader::new(Cursor::new(stream), 1024);
        assert_eq!(reader.read_packet().unwrap(), vec![0, 1, 2]);
        assert_eq!(reader.sequence(), 1);
        assert_eq!(reader.read_reusable_packet().unwrap(), b"abc");
        assert_eq!(reader.sequence(), 2);
    }

    #[test]
    fn test_read_split_packet() {
        let first = vec![7u8; MAX_PACKET_SIZE];
        let mut stream = frame(&first, 0);
        stream.extend(frame(b"tail", 1));
        let mut reader = PacketReader::new(Cursor::new(stream), 16);
        let payload = reader.read_packet().unwrap();
        assert_eq!(payload.len(), MAX_PACKET_SIZE + 4);
        assert_eq!(&payload[MAX_PACKET_SIZE..], b"tail");
        assert_eq!(reader.sequence(), 1);
    }

    #[test]
    fn test_skip_packet_follows_continuation() {
        let first = vec![1u8; MAX_PACKET_SIZE];
        let mut stream = frame(&first, 0);
        stream.extend(frame(b"", 1));
        stream.extend(frame(b"next", 2));
        let mut reader = PacketReader::new(Cursor::new(stream), 16);
        reader.skip_packet().unwrap();
        assert_eq!(reader.read_packet().unwrap(), b"next");
    }

    #[test]
    fn test_unexpected_end_of_stream() {
        let mut stream = frame(b"abcdef", 0);
        stream.truncate(6);
        let mut reader = PacketReader::new(Cursor::new(stream), 16);
        let err = reader.read_packet().unwrap_err();
        assert_eq!(
            err.to_string(),
            "I/O error: unexpected end of stream, read 2 bytes from 6 (socket was closed by server)"
        );
    }
}
