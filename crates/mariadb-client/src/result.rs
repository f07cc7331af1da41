//! Command completions and result set readers.
//!
//! A command answers with one completion per statement: an OK packet, a
//! result set, or (for COM_STMT_PREPARE) a prepared statement. Result sets
//! are either read entirely ([`ResultSet`]) or fetched one row at a time
//! ([`RowStream`]) while the connection stays borrowed.

use std::io::Read;
use std::sync::{Arc, OnceLock};

use mariadb_core::error::{Error, ProtocolError};
use mariadb_core::{ColumnInfo, Date, DateTime, Result, Row, Time, Value};

use crate::column::ColumnDefinition;
use crate::connection::MariaDbConnection;
use crate::context::Context;
use crate::decode::Encoding;
use crate::error_mapping::ExceptionFactory;
use crate::message::{ErrorPacket, OkPacket, PrepareResult, QueryPacket};
use crate::protocol::{MAX_PACKET_SIZE, PacketReader, ReadableBuf, server_status};
use crate::row::{RowCursor, RowDecoder};

/// Header byte of OK packets.
pub(crate) const OK: u8 = 0x00;
/// Header byte of LOCAL INFILE requests.
pub(crate) const LOCAL_INFILE: u8 = 0xFB;
/// Header byte of EOF packets and of result set terminating OK packets.
pub(crate) const EOF: u8 = 0xFE;
/// Header byte of error packets.
pub(crate) const ERROR: u8 = 0xFF;

/// One server response to a command.
#[derive(Debug)]
pub enum Completion {
    Ok(OkPacket),
    ResultSet(ResultSet),
    Prepare(Arc<PrepareResult>),
}

impl Completion {
    /// Rows affected by a DML statement, zero for other completions.
    pub fn affected_rows(&self) -> u64 {
        match self {
            Completion::Ok(ok) => ok.affected_rows,
            _ => 0,
        }
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        match self {
            Completion::Ok(ok) => Some(ok.last_insert_id),
            _ => None,
        }
    }

    pub fn as_result_set(&mut self) -> Option<&mut ResultSet> {
        match self {
            Completion::ResultSet(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        match self {
            Completion::ResultSet(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn into_prepare(self) -> Option<Arc<PrepareResult>> {
        match self {
            Completion::Prepare(prepare) => Some(prepare),
            _ => None,
        }
    }
}

/// Does `packet` end a result set?
///
/// With EOF deprecated the terminator is an OK packet with a 0xFE header,
/// which a row can only be confused with when it holds a 16MB+ field.
/// Otherwise it is a short EOF packet.
pub(crate) fn is_end_of_result(packet: &[u8], eof_deprecated: bool) -> bool {
    if packet.first() != Some(&EOF) {
        return false;
    }
    if eof_deprecated {
        packet.len() < MAX_PACKET_SIZE
    } else {
        packet.len() < 8
    }
}

/// Apply the status of a result set terminator to the context.
pub(crate) fn read_end_of_result(packet: &[u8], context: &mut Context) -> Result<()> {
    if context.is_eof_deprecated() {
        OkPacket::decode(packet, context)?;
    } else {
        let mut buf = ReadableBuf::new(packet);
        buf.skip(1)?;
        let warnings = buf.read_u16()?;
        let status = buf.read_u16()?;
        context.set_warning(warnings);
        context.set_server_status(status);
    }
    Ok(())
}

/// Turn an error packet into the error to raise.
///
/// The server no longer sends the rest of the response, and the transaction
/// state is unknown until the next OK packet.
pub(crate) fn server_error(
    packet: &[u8],
    context: &mut Context,
    factory: &ExceptionFactory,
) -> Error {
    let status = (context.server_status() | server_status::IN_TRANSACTION)
        & !server_status::MORE_RESULTS_EXISTS;
    context.set_server_status(status);
    match ErrorPacket::decode(packet) {
        Ok(err) => factory.from_server(&err.message, &err.sqlstate, err.code),
        Err(e) => e,
    }
}

/// Read the next row of the current result set, `None` once it has ended.
pub(crate) fn read_row<R: Read>(
    reader: &mut PacketReader<R>,
    context: &mut Context,
    factory: &ExceptionFactory,
) -> Result<Option<Vec<u8>>> {
    let packet = reader.read_packet()?;
    match packet.first() {
        Some(&ERROR) => Err(server_error(&packet, context, factory)),
        Some(_) if is_end_of_result(&packet, context.is_eof_deprecated()) => {
            read_end_of_result(&packet, context)?;
            Ok(None)
        }
        Some(_) => Ok(Some(packet)),
        None => Err(Error::Protocol(ProtocolError {
            message: "empty row packet".to_string(),
            raw_data: None,
            source: None,
        })),
    }
}

/// Labels of a column set: the alias, and `table.alias` when the table is
/// known.
fn column_labels(columns: &[ColumnDefinition]) -> Arc<ColumnInfo> {
    let names = columns.iter().map(ColumnDefinition::name).collect();
    let tables = columns
        .iter()
        .map(|column| {
            let table = column.table();
            let table = if table.is_empty() { column.org_table() } else { table };
            Some(table).filter(|t| !t.is_empty())
        })
        .collect();
    Arc::new(ColumnInfo::with_tables(names, tables))
}

/// Column labels, built on the first lookup by name.
#[derive(Debug, Default)]
struct Labels(OnceLock<Arc<ColumnInfo>>);

impl Labels {
    fn get(&self, columns: &[ColumnDefinition]) -> Arc<ColumnInfo> {
        Arc::clone(self.0.get_or_init(|| column_labels(columns)))
    }

    #[cfg(test)]
    fn is_built(&self) -> bool {
        self.0.get().is_some()
    }
}

fn no_current_row() -> Error {
    Error::Custom("no current row: call next_row() first".to_string())
}

/// A fully read result set.
///
/// Rows stay in their wire form and are decoded on access, like a server
/// side cursor over a local buffer.
#[derive(Debug)]
pub struct ResultSet {
    columns: Arc<[ColumnDefinition]>,
    labels: Labels,
    encoding: Encoding,
    rows: Vec<Vec<u8>>,
    next: usize,
    current: Option<usize>,
    cursor: RowCursor,
}

impl ResultSet {
    pub fn new(columns: Arc<[ColumnDefinition]>, encoding: Encoding, rows: Vec<Vec<u8>>) -> Self {
        Self {
            columns,
            labels: Labels::default(),
            encoding,
            rows,
            next: 0,
            current: None,
            cursor: RowCursor::default(),
        }
    }

    /// Read every row up to the terminator.
    pub(crate) fn read<R: Read>(
        columns: Arc<[ColumnDefinition]>,
        encoding: Encoding,
        reader: &mut PacketReader<R>,
        context: &mut Context,
        factory: &ExceptionFactory,
    ) -> Result<Self> {
        let mut rows = Vec::new();
        while let Some(row) = read_row(reader, context, factory)? {
            rows.push(row);
        }
        Ok(Self::new(columns, encoding, rows))
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        self.labels.get(&self.columns)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Move to the next row. Returns `false` past the last row.
    pub fn next_row(&mut self) -> bool {
        self.cursor = RowCursor::default();
        if self.next < self.rows.len() {
            self.current = Some(self.next);
            self.next += 1;
            true
        } else {
            self.current = None;
            false
        }
    }

    /// Index of the column labelled `label` (alias or `table.alias`,
    /// case-insensitive).
    pub fn find_column(&self, label: &str) -> Result<usize> {
        self.labels.get(&self.columns).find(label)
    }

    fn with_current<T>(&mut self, f: impl FnOnce(&mut RowDecoder<'_>) -> Result<T>) -> Result<T> {
        let Some(index) = self.current else {
            return Err(no_current_row());
        };
        let mut row =
            RowDecoder::with_cursor(&self.columns, &self.rows[index], self.encoding, self.cursor);
        let out = f(&mut row);
        self.cursor = row.cursor();
        out
    }

    pub fn is_null(&mut self, index: usize) -> Result<bool> {
        self.with_current(|row| row.is_null(index))
    }

    pub fn get_value(&mut self, index: usize) -> Result<Value> {
        self.with_current(|row| row.get_value(index))
    }

    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        self.with_current(|row| row.get_bytes(index))
    }

    /// Every field of the current row as a `Value`.
    pub fn row_values(&mut self) -> Result<Vec<Value>> {
        self.with_current(|row| row.values())
    }

    /// Decode the remaining rows.
    pub fn into_rows(mut self) -> Result<Vec<Row>> {
        let labels = self.column_info();
        let mut rows = Vec::with_capacity(self.rows.len() - self.next);
        while self.next_row() {
            rows.push(Row::with_columns(Arc::clone(&labels), self.row_values()?));
        }
        Ok(rows)
    }
}

/// Streaming reader over a result set still arriving on the connection.
///
/// The connection stays borrowed until the stream is dropped. Dropping it
/// early leaves the remaining rows on the socket; the connection skips them
/// before its next command.
#[derive(Debug)]
pub struct RowStream<'c> {
    conn: &'c mut MariaDbConnection,
    message: QueryPacket,
    factory: ExceptionFactory,
    columns: Arc<[ColumnDefinition]>,
    labels: Labels,
    encoding: Encoding,
    current: Option<Vec<u8>>,
    cursor: RowCursor,
    done: bool,
    preceding: Vec<OkPacket>,
}

impl<'c> RowStream<'c> {
    pub(crate) fn new(
        conn: &'c mut MariaDbConnection,
        message: QueryPacket,
        factory: ExceptionFactory,
        columns: Arc<[ColumnDefinition]>,
        preceding: Vec<OkPacket>,
    ) -> Self {
        let done = columns.is_empty();
        Self {
            conn,
            message,
            factory,
            columns,
            labels: Labels::default(),
            encoding: Encoding::Text,
            current: None,
            cursor: RowCursor::default(),
            done,
            preceding,
        }
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        self.labels.get(&self.columns)
    }

    /// OK completions the server sent before this result set, for
    /// multi-statement queries.
    pub fn preceding(&self) -> &[OkPacket] {
        &self.preceding
    }

    pub fn find_column(&self, label: &str) -> Result<usize> {
        self.labels.get(&self.columns).find(label)
    }

    /// Fetch the next row from the server. Returns `false` once the result
    /// set has ended.
    pub fn next_row(&mut self) -> Result<bool> {
        self.cursor = RowCursor::default();
        if self.done {
            self.current = None;
            return Ok(false);
        }
        match self.conn.read_stream_row(&self.factory) {
            Ok(Some(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Ok(None) => {
                self.done = true;
                self.current = None;
                Ok(false)
            }
            Err(e) => {
                self.done = true;
                self.current = None;
                Err(e)
            }
        }
    }

    fn with_current<T>(&mut self, f: impl FnOnce(&mut RowDecoder<'_>) -> Result<T>) -> Result<T> {
        let Some(data) = self.current.as_deref() else {
            return Err(no_current_row());
        };
        let mut row = RowDecoder::with_cursor(&self.columns, data, self.encoding, self.cursor);
        let out = f(&mut row);
        self.cursor = row.cursor();
        out
    }

    pub fn is_null(&mut self, index: usize) -> Result<bool> {
        self.with_current(|row| row.is_null(index))
    }

    pub fn get_value(&mut self, index: usize) -> Result<Value> {
        self.with_current(|row| row.get_value(index))
    }

    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        self.with_current(|row| row.get_bytes(index))
    }

    pub fn row_values(&mut self) -> Result<Vec<Value>> {
        self.with_current(|row| row.values())
    }

    /// Current row, materialized.
    pub fn row(&mut self) -> Result<Row> {
        let values = self.row_values()?;
        Ok(Row::with_columns(self.column_info(), values))
    }

    /// Read the rest of this result set and the completions following it.
    pub fn finish(mut self) -> Result<Vec<Completion>> {
        while self.next_row()? {}
        self.conn.read_more_results(&self.message, &self.factory)
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        if !self.done || self.conn.has_more_results() {
            self.conn
                .set_pending(self.message.clone(), self.factory.clone(), !self.done);
        }
    }
}

macro_rules! row_getters {
    ($($name:ident: $ty:ty;)*) => {
        impl ResultSet {
            $(
                pub fn $name(&mut self, index: usize) -> Result<Option<$ty>> {
                    self.with_current(|row| row.$name(index))
                }
            )*
        }

        impl RowStream<'_> {
            $(
                pub fn $name(&mut self, index: usize) -> Result<Option<$ty>> {
                    self.with_current(|row| row.$name(index))
                }
            )*
        }
    };
}

row_getters! {
    get_i64: i64;
    get_u64: u64;
    get_i32: i32;
    get_i16: i16;
    get_i8: i8;
    get_f64: f64;
    get_f32: f32;
    get_bool: bool;
    get_string: String;
    get_date: Date;
    get_time: Time;
    get_datetime: DateTime;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::DataType;
    use crate::message::server::tests::test_context;
    use crate::protocol::capabilities as caps;
    use std::io::Cursor;

    #[allow(clippy::cast_possible_truncation)]
    fn framed(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for (seq, p) in packets.iter().enumerate() {
            out.extend_from_slice(&(p.len() as u32).to_le_bytes()[..3]);
            out.push(seq as u8);
            out.extend_from_slice(p);
        }
        out
    }

    fn text_row(id: &str, name: &str) -> Vec<u8> {
        let mut row = vec![u8::try_from(id.len()).unwrap()];
        row.extend_from_slice(id.as_bytes());
        row.push(u8::try_from(name.len()).unwrap());
        row.extend_from_slice(name.as_bytes());
        row
    }

    fn columns() -> Arc<[ColumnDefinition]> {
        vec![
            ColumnDefinition::create("id", DataType::Integer, 0),
            ColumnDefinition::create("name", DataType::VarString, 0),
        ]
        .into()
    }

    #[test]
    fn test_end_of_result_detection() {
        assert!(is_end_of_result(&[0xFE, 0, 0, 2, 0], false));
        assert!(!is_end_of_result(&[0xFE, 0, 0, 0, 0, 0, 0, 0, 0], false));
        assert!(is_end_of_result(&[0xFE, 0, 0, 0, 0, 0, 0, 0, 0], true));
        assert!(!is_end_of_result(&[0x01, b'1'], true));
    }

    #[test]
    fn test_read_complete_result_set_with_eof() {
        let mut context = test_context(caps::CLIENT_PROTOCOL_41);
        let stream = framed(&[
            text_row("1", "alice"),
            text_row("2", "bob"),
            vec![0xFE, 0, 0, 0x22, 0],
        ]);
        let mut reader = PacketReader::new(Cursor::new(stream), 1024);
        let mut rs = ResultSet::read(
            columns(),
            Encoding::Text,
            &mut reader,
            &mut context,
            &ExceptionFactory::default(),
        )
        .unwrap();

        assert_eq!(rs.len(), 2);
        assert_eq!(context.server_status(), 0x22);
        assert!(rs.next_row());
        assert_eq!(rs.get_i32(0).unwrap(), Some(1));
        assert_eq!(rs.get_string(1).unwrap().as_deref(), Some("alice"));
        assert!(rs.next_row());
        let name = rs.find_column("NAME").unwrap();
        assert_eq!(rs.get_string(name).unwrap().as_deref(), Some("bob"));
        assert!(!rs.next_row());
        assert!(rs.get_value(0).is_err());
    }

    #[test]
    fn test_read_result_set_deprecated_eof() {
        let mut context =
            test_context(caps::CLIENT_PROTOCOL_41 | caps::CLIENT_DEPRECATE_EOF);
        let stream = framed(&[text_row("7", "x"), vec![0xFE, 0, 0, 0x02, 0, 1, 0]]);
        let mut reader = PacketReader::new(Cursor::new(stream), 1024);
        let rs = ResultSet::read(
            columns(),
            Encoding::Text,
            &mut reader,
            &mut context,
            &ExceptionFactory::default(),
        )
        .unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(context.warning(), 1);
        assert!(!context.has_more_results());
    }

    #[test]
    fn test_error_inside_result_set() {
        let mut context = test_context(caps::CLIENT_PROTOCOL_41);
        context.set_server_status(server_status::MORE_RESULTS_EXISTS);
        let mut err = vec![0xFF];
        err.extend_from_slice(&1317u16.to_le_bytes());
        err.extend_from_slice(b"#70100Query execution was interrupted");
        let stream = framed(&[text_row("1", "a"), err]);
        let mut reader = PacketReader::new(Cursor::new(stream), 1024);

        let result = ResultSet::read(
            columns(),
            Encoding::Text,
            &mut reader,
            &mut context,
            &ExceptionFactory::default(),
        );
        let err = result.unwrap_err();
        assert_eq!(err.sqlstate(), Some("70100"));
        assert!(!context.has_more_results());
        assert_ne!(context.server_status() & server_status::IN_TRANSACTION, 0);
    }

    #[test]
    fn test_into_rows_with_labels() {
        let rs = ResultSet::new(
            columns(),
            Encoding::Text,
            vec![text_row("1", "a"), text_row("2", "b")],
        );
        let rows = rs.into_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_named::<String>("name").unwrap(), "b");
        assert_eq!(rows[0].get_as::<i32>(0).unwrap(), 1);
    }

    #[test]
    fn test_labels_are_built_on_first_lookup() {
        let mut rs = ResultSet::new(columns(), Encoding::Text, vec![text_row("1", "a")]);
        assert!(!rs.labels.is_built());
        assert!(rs.next_row());
        assert_eq!(rs.get_i64(0).unwrap(), Some(1));
        assert!(!rs.labels.is_built());

        assert_eq!(rs.find_column("name").unwrap(), 1);
        assert!(rs.labels.is_built());
        assert!(Arc::ptr_eq(&rs.column_info(), &rs.column_info()));
    }

    #[test]
    fn test_completion_accessors() {
        let ok = Completion::Ok(OkPacket {
            affected_rows: 3,
            last_insert_id: 10,
            ..OkPacket::default()
        });
        assert_eq!(ok.affected_rows(), 3);
        assert_eq!(ok.last_insert_id(), Some(10));
        assert!(ok.into_result_set().is_none());

        let rs = Completion::ResultSet(ResultSet::new(columns(), Encoding::Text, Vec::new()));
        assert_eq!(rs.affected_rows(), 0);
        assert!(rs.into_result_set().unwrap().is_empty());
    }
}
