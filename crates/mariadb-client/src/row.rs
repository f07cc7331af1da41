//! Lazy field access over one raw row packet.
//!
//! Fields are located on demand. Moving forward resumes from the last
//! visited field; asking for an earlier column rewinds to the row start.

use mariadb_core::error::{Error, ProtocolError, TypeError};
use mariadb_core::{Date, DateTime, Result, Time, Value};

use crate::column::ColumnDefinition;
use crate::decode::{self, Encoding};
use crate::protocol::ReadableBuf;

/// Position of the last visited field in a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCursor {
    index: Option<usize>,
    field_start: usize,
    /// `None` when the field is NULL.
    field_len: Option<usize>,
    next_pos: usize,
}

impl RowCursor {
    /// Index of the last visited field.
    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

/// Typed access to the fields of one row.
#[derive(Debug)]
pub struct RowDecoder<'r> {
    columns: &'r [ColumnDefinition],
    data: &'r [u8],
    encoding: Encoding,
    cursor: RowCursor,
}

impl<'r> RowDecoder<'r> {
    pub fn new(columns: &'r [ColumnDefinition], data: &'r [u8], encoding: Encoding) -> Self {
        Self::with_cursor(columns, data, encoding, RowCursor::default())
    }

    /// Resume from a cursor kept by the caller for this same row.
    pub fn with_cursor(
        columns: &'r [ColumnDefinition],
        data: &'r [u8],
        encoding: Encoding,
        cursor: RowCursor,
    ) -> Self {
        Self {
            columns,
            data,
            encoding,
            cursor,
        }
    }

    pub fn cursor(&self) -> RowCursor {
        self.cursor
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn null_bitmap_len(&self) -> usize {
        (self.columns.len() + 9) / 8
    }

    fn row_start(&self) -> usize {
        match self.encoding {
            Encoding::Text => 0,
            // 0x00 header, then the NULL bitmap
            Encoding::Binary => 1 + self.null_bitmap_len(),
        }
    }

    fn is_null_in_bitmap(&self, index: usize) -> bool {
        let bit = index + 2;
        self.data
            .get(1 + bit / 8)
            .is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }

    /// Start and length of the field at `pos`, `None` length for NULL.
    #[allow(clippy::cast_possible_truncation)]
    fn field_header(&self, index: usize, pos: usize) -> Result<(usize, Option<usize>)> {
        let mut buf = ReadableBuf::new(self.data);
        buf.set_pos(pos);
        match self.encoding {
            Encoding::Text => {
                let len = buf.read_length()?;
                Ok((buf.pos(), len.map(|l| l as usize)))
            }
            Encoding::Binary => {
                if self.is_null_in_bitmap(index) {
                    return Ok((pos, None));
                }
                if let Some(width) = self.columns[index].data_type().binary_width() {
                    return Ok((pos, Some(width)));
                }
                let len = buf.read_length_not_null()? as usize;
                Ok((buf.pos(), Some(len)))
            }
        }
    }

    fn set_position(&mut self, index: usize) -> Result<()> {
        if index >= self.columns.len() {
            return Err(Error::Type(TypeError {
                expected: "column index",
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.columns.len()
                ),
                column: None,
            }));
        }

        let (mut i, mut pos) = match self.cursor.index {
            Some(current) if current == index => return Ok(()),
            Some(current) if current < index => (current + 1, self.cursor.next_pos),
            _ => (0, self.row_start()),
        };

        loop {
            let (start, len) = self.field_header(i, pos)?;
            let end = start + len.unwrap_or(0);
            if end > self.data.len() {
                return Err(Error::Protocol(ProtocolError {
                    message: format!(
                        "row truncated: field {} needs {} bytes, row has {}",
                        i,
                        end,
                        self.data.len()
                    ),
                    raw_data: None,
                    source: None,
                }));
            }
            if i == index {
                self.cursor = RowCursor {
                    index: Some(i),
                    field_start: start,
                    field_len: len,
                    next_pos: end,
                };
                return Ok(());
            }
            pos = end;
            i += 1;
        }
    }

    fn field(&mut self, index: usize) -> Result<Option<(&'r ColumnDefinition, &'r [u8])>> {
        self.set_position(index)?;
        let columns = self.columns;
        let data = self.data;
        Ok(self.cursor.field_len.map(|len| {
            let start = self.cursor.field_start;
            (&columns[index], &data[start..start + len])
        }))
    }

    pub fn is_null(&mut self, index: usize) -> Result<bool> {
        Ok(self.field(index)?.is_none())
    }

    /// Decode a field to its default `Value`; NULL decodes to `Value::Null`.
    pub fn get_value(&mut self, index: usize) -> Result<Value> {
        let encoding = self.encoding;
        match self.field(index)? {
            Some((column, data)) => decode::decode_value(column, data, encoding),
            None => Ok(Value::Null),
        }
    }

    /// Decode every field of the row.
    pub fn values(&mut self) -> Result<Vec<Value>> {
        (0..self.columns.len()).map(|i| self.get_value(i)).collect()
    }

    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        Ok(self.field(index)?.map(|(_, data)| decode::decode_bytes(data)))
    }
}

macro_rules! typed_getters {
    ($($(#[$doc:meta])* $name:ident => $decode:path : $ty:ty;)*) => {
        impl<'r> RowDecoder<'r> {
            $(
                $(#[$doc])*
                pub fn $name(&mut self, index: usize) -> Result<Option<$ty>> {
                    let encoding = self.encoding;
                    self.field(index)?
                        .map(|(column, data)| $decode(column, data, encoding))
                        .transpose()
                }
            )*
        }
    };
}

typed_getters! {
    /// Integer value; NULL gives `None`.
    get_i64 => decode::decode_i64: i64;
    get_u64 => decode::decode_u64: u64;
    get_i32 => decode::decode_i32: i32;
    get_i16 => decode::decode_i16: i16;
    get_i8 => decode::decode_i8: i8;
    get_f64 => decode::decode_f64: f64;
    get_f32 => decode::decode_f32: f32;
    get_bool => decode::decode_bool: bool;
    get_string => decode::decode_string: String;
    /// Temporal getters fail on non temporal, non string columns.
    get_date => decode::decode_date: Date;
    get_time => decode::decode_time: Time;
    get_datetime => decode::decode_datetime: DateTime;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::DataType;

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::create("id", DataType::Integer, 0),
            ColumnDefinition::create("name", DataType::VarString, 0),
            ColumnDefinition::create("score", DataType::Double, 0),
        ]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn text_row(fields: &[Option<&str>]) -> Vec<u8> {
        let mut out = Vec::new();
        for field in fields {
            match field {
                Some(s) => {
                    out.push(s.len() as u8);
                    out.extend_from_slice(s.as_bytes());
                }
                None => out.push(0xFB),
            }
        }
        out
    }

    #[test]
    fn test_text_row_forward_and_rewind() {
        let cols = columns();
        let data = text_row(&[Some("42"), Some("alice"), Some("1.5")]);
        let mut row = RowDecoder::new(&cols, &data, Encoding::Text);

        assert_eq!(row.get_string(1).unwrap().as_deref(), Some("alice"));
        assert_eq!(row.cursor().index(), Some(1));
        assert_eq!(row.get_f64(2).unwrap(), Some(1.5));
        // going back re-walks from the start and gives the same value
        assert_eq!(row.get_i64(0).unwrap(), Some(42));
        assert_eq!(row.get_string(1).unwrap().as_deref(), Some("alice"));

        let mut fresh = RowDecoder::new(&cols, &data, Encoding::Text);
        assert_eq!(fresh.get_string(1).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_text_null() {
        let cols = columns();
        let data = text_row(&[None, Some("bob"), None]);
        let mut row = RowDecoder::new(&cols, &data, Encoding::Text);
        assert_eq!(row.get_i64(0).unwrap(), None);
        assert_eq!(row.get_bool(0).unwrap(), None);
        assert_eq!(row.get_string(1).unwrap().as_deref(), Some("bob"));
        assert_eq!(row.get_f64(2).unwrap(), None);
        assert_eq!(row.get_value(2).unwrap(), Value::Null);
        assert!(row.is_null(0).unwrap());
    }

    #[test]
    fn test_binary_row_with_null_bitmap() {
        let cols = columns();
        // header, bitmap ((3 + 9) / 8 = 1 byte) with column 1 NULL: bit 1 + 2 = 3
        let mut data = vec![0x00, 0b0000_1000];
        data.extend_from_slice(&(-7i32).to_le_bytes());
        data.extend_from_slice(&2.25f64.to_le_bytes());

        let mut row = RowDecoder::new(&cols, &data, Encoding::Binary);
        assert_eq!(row.get_f64(2).unwrap(), Some(2.25));
        assert_eq!(row.get_string(1).unwrap(), None);
        assert_eq!(row.get_i32(0).unwrap(), Some(-7));
        assert_eq!(
            row.values().unwrap(),
            vec![Value::Int(-7), Value::Null, Value::Double(2.25)]
        );
    }

    #[test]
    fn test_binary_length_encoded_field() {
        let cols = columns();
        let mut data = vec![0x00, 0x00];
        data.extend_from_slice(&1i32.to_le_bytes());
        data.push(3);
        data.extend_from_slice(b"eve");
        data.extend_from_slice(&0.5f64.to_le_bytes());
        let mut row = RowDecoder::new(&cols, &data, Encoding::Binary);
        assert_eq!(row.get_string(1).unwrap().as_deref(), Some("eve"));
        assert_eq!(row.get_f64(2).unwrap(), Some(0.5));
    }

    #[test]
    fn test_index_out_of_bounds() {
        let cols = columns();
        let data = text_row(&[Some("1"), Some("x"), Some("2")]);
        let mut row = RowDecoder::new(&cols, &data, Encoding::Text);
        assert!(matches!(row.get_i64(3), Err(Error::Type(_))));
    }

    #[test]
    fn test_truncated_row() {
        let cols = columns();
        let data = vec![2, b'4', b'2', 10, b'a'];
        let mut row = RowDecoder::new(&cols, &data, Encoding::Text);
        assert_eq!(row.get_i64(0).unwrap(), Some(42));
        assert!(matches!(row.get_string(1), Err(Error::Protocol(_))));
    }
}
