//! Column definitions sent ahead of result set rows.
//!
//! Identifier strings are not decoded when the packet is read: their offsets
//! are recorded and the raw packet is kept, so names are only materialized
//! when asked for.

use std::fmt;

use mariadb_core::Result;

use crate::decode::ColumnDecoder;
use crate::protocol::{ReadableBuf, charset, column_flags};

/// Server data type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL), pre-5.0 servers
    OldDecimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    TinyInt = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    SmallInt = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Integer = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    BigInt = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    MediumInt = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    /// DECIMAL (MYSQL_TYPE_NEWDECIMAL)
    Decimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    Geometry = 0xFF,
}

impl DataType {
    /// Parse a data type code. Unknown codes are handled as strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => DataType::OldDecimal,
            0x01 => DataType::TinyInt,
            0x02 => DataType::SmallInt,
            0x03 => DataType::Integer,
            0x04 => DataType::Float,
            0x05 => DataType::Double,
            0x06 => DataType::Null,
            0x07 => DataType::Timestamp,
            0x08 => DataType::BigInt,
            0x09 => DataType::MediumInt,
            0x0A => DataType::Date,
            0x0B => DataType::Time,
            0x0C => DataType::DateTime,
            0x0D => DataType::Year,
            0x0E => DataType::NewDate,
            0x0F => DataType::VarChar,
            0x10 => DataType::Bit,
            0xF5 => DataType::Json,
            0xF6 => DataType::Decimal,
            0xF7 => DataType::Enum,
            0xF8 => DataType::Set,
            0xF9 => DataType::TinyBlob,
            0xFA => DataType::MediumBlob,
            0xFB => DataType::LongBlob,
            0xFC => DataType::Blob,
            0xFD => DataType::VarString,
            0xFF => DataType::Geometry,
            _ => DataType::String,
        }
    }

    /// Width of the value in the binary protocol, when fixed.
    pub const fn binary_width(self) -> Option<usize> {
        match self {
            DataType::BigInt | DataType::Double => Some(8),
            DataType::Integer | DataType::MediumInt | DataType::Float => Some(4),
            DataType::SmallInt | DataType::Year => Some(2),
            DataType::TinyInt => Some(1),
            _ => None,
        }
    }

    /// Is this one of the character or blob types whose length is in bytes?
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            DataType::VarChar
                | DataType::Json
                | DataType::Enum
                | DataType::Set
                | DataType::VarString
                | DataType::String
                | DataType::Blob
                | DataType::TinyBlob
                | DataType::MediumBlob
                | DataType::LongBlob
        )
    }

    /// SQL name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::OldDecimal | DataType::Decimal => "DECIMAL",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Null => "NULL",
            DataType::Timestamp => "TIMESTAMP",
            DataType::BigInt => "BIGINT",
            DataType::MediumInt => "MEDIUMINT",
            DataType::Date | DataType::NewDate => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
            DataType::Year => "YEAR",
            DataType::VarChar | DataType::VarString => "VARCHAR",
            DataType::Bit => "BIT",
            DataType::Json => "JSON",
            DataType::Enum => "ENUM",
            DataType::Set => "SET",
            DataType::TinyBlob => "TINYBLOB",
            DataType::MediumBlob => "MEDIUMBLOB",
            DataType::LongBlob => "LONGBLOB",
            DataType::Blob => "BLOB",
            DataType::String => "CHAR",
            DataType::Geometry => "GEOMETRY",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One column of a result set.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    raw: Vec<u8>,
    // schema, table, org_table, name, org_name
    string_pos: [usize; 5],
    charset: u16,
    column_length: u32,
    data_type: DataType,
    flags: u16,
    decimals: u8,
    ext_type_name: Option<String>,
    ext_type_format: Option<String>,
    decoder: ColumnDecoder,
}

impl ColumnDefinition {
    /// Decode a column definition packet.
    ///
    /// `extended_info` tells whether the MariaDB extended type info block is
    /// present (negotiated `EXTENDED_TYPE_INFO`).
    pub fn decode(raw: Vec<u8>, extended_info: bool) -> Result<Self> {
        let mut buf = ReadableBuf::new(&raw);
        let mut string_pos = [0usize; 5];
        // the catalog ("def") comes first, each position is the start of the next string
        for pos in &mut string_pos {
            *pos = buf.skip_identifier()?;
        }
        buf.skip_identifier()?;

        let mut ext_type_name = None;
        let mut ext_type_format = None;
        if extended_info {
            if buf.peek() == Some(0) {
                buf.skip(1)?;
            } else {
                let mut sub = buf.read_length_buffer()?;
                while sub.readable_bytes() > 0 {
                    let key = sub.read_u8()?;
                    let len = sub.read_length_not_null()? as usize;
                    match key {
                        0 => ext_type_name = Some(sub.read_string(len)?),
                        1 => ext_type_format = Some(sub.read_string(len)?),
                        _ => sub.skip(len)?,
                    }
                }
            }
        }

        buf.skip(1)?; // length of fixed fields, always 0x0c
        let charset = buf.read_u16()?;
        let column_length = buf.read_u32()?;
        let data_type = DataType::from_u8(buf.read_u8()?);
        let flags = buf.read_u16()?;
        let decimals = buf.read_u8()?;

        let decoder = ColumnDecoder::select(
            data_type,
            flags & column_flags::UNSIGNED != 0,
            ext_type_name.as_deref(),
        );

        Ok(Self {
            raw,
            string_pos,
            charset,
            column_length,
            data_type,
            flags,
            decimals,
            ext_type_name,
            ext_type_format,
            decoder,
        })
    }

    /// Build a column definition for a column the server did not describe.
    pub fn create(name: &str, data_type: DataType, flags: u16) -> Self {
        let length = match data_type {
            // most generated columns are 64 characters of utf8
            DataType::VarChar | DataType::VarString => 64 * 3,
            DataType::SmallInt => 5,
            DataType::Null => 0,
            _ => 1,
        };
        Self::fake(name, data_type, flags, u16::from(charset::UTF8_GENERAL_CI), length)
    }

    /// Placeholder used for every prepared statement parameter: the server
    /// does not describe parameters.
    pub fn parameter() -> Self {
        Self::fake(
            "?",
            DataType::Null,
            column_flags::BINARY_COLLATION,
            charset::BINARY,
            0,
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fake(name: &str, data_type: DataType, flags: u16, charset_id: u16, length: u32) -> Self {
        let name = name.as_bytes();
        let mut raw = Vec::with_capacity(20 + 2 * name.len());
        raw.extend_from_slice(&[3, b'D', b'E', b'F', 0, 0, 0]);
        for _ in 0..2 {
            raw.push(name.len() as u8);
            raw.extend_from_slice(name);
        }
        let name_end = 7 + 1 + name.len();
        let decoder = ColumnDecoder::select(data_type, flags & column_flags::UNSIGNED != 0, None);
        Self {
            raw,
            string_pos: [4, 5, 6, 7, name_end],
            charset: charset_id,
            column_length: length,
            data_type,
            flags,
            decimals: 0,
            ext_type_name: None,
            ext_type_format: None,
            decoder,
        }
    }

    fn string_at(&self, index: usize) -> String {
        let mut buf = ReadableBuf::new(&self.raw);
        buf.set_pos(self.string_pos[index]);
        buf.read_length_not_null()
            .and_then(|len| buf.read_string(len as usize))
            .unwrap_or_default()
    }

    pub fn schema(&self) -> String {
        self.string_at(0)
    }

    /// Table alias, as written in the query.
    pub fn table(&self) -> String {
        self.string_at(1)
    }

    /// Physical table name.
    pub fn org_table(&self) -> String {
        self.string_at(2)
    }

    /// Column label (the alias when the query gives one).
    pub fn name(&self) -> String {
        self.string_at(3)
    }

    /// Physical column name.
    pub fn org_name(&self) -> String {
        self.string_at(4)
    }

    pub fn charset(&self) -> u16 {
        self.charset
    }

    pub fn column_length(&self) -> u32 {
        self.column_length
    }

    pub fn precision(&self) -> u32 {
        self.column_length
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn ext_type_name(&self) -> Option<&str> {
        self.ext_type_name.as_deref()
    }

    pub fn ext_type_format(&self) -> Option<&str> {
        self.ext_type_format.as_deref()
    }

    pub fn decoder(&self) -> ColumnDecoder {
        self.decoder
    }

    pub fn is_signed(&self) -> bool {
        self.flags & column_flags::UNSIGNED == 0
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    pub fn has_default(&self) -> bool {
        self.flags & column_flags::NO_DEFAULT_VALUE_FLAG == 0
    }

    pub fn is_nullable(&self) -> bool {
        self.flags & column_flags::NOT_NULL == 0
    }

    /// Binary means the `binary` character set, not the BINARY flag: CHAR
    /// BINARY columns carry the flag but hold text.
    pub fn is_binary(&self) -> bool {
        self.charset == charset::BINARY
    }

    /// Length in characters for character columns, in bytes otherwise.
    pub fn display_size(&self) -> u32 {
        if !self.is_binary() && self.data_type.is_string() {
            if let Some(width) = charset::max_width(self.charset) {
                return self.column_length / width;
            }
        }
        self.column_length
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decode::ColumnDecoder;

    /// Encode a column definition packet as a server would.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn column_packet(
        table: &str,
        name: &str,
        data_type: DataType,
        flags: u16,
        charset_id: u16,
        length: u32,
        ext_type_name: Option<&str>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        for s in ["def", "shop", table, table, name, name] {
            out.push(s.len() as u8);
            out.extend_from_slice(s.as_bytes());
        }
        match ext_type_name {
            Some(ext) => {
                out.push((ext.len() + 2) as u8);
                out.push(0);
                out.push(ext.len() as u8);
                out.extend_from_slice(ext.as_bytes());
            }
            None => out.push(0),
        }
        out.push(0x0c);
        out.extend_from_slice(&charset_id.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.push(data_type as u8);
        out.extend_from_slice(&flags.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&[0, 0]);
        out
    }

    #[test]
    fn test_decode_column_definition() {
        let raw = column_packet("users", "id", DataType::BigInt, column_flags::PRIMARY_KEY, 63, 20, None);
        let column = ColumnDefinition::decode(raw, true).unwrap();
        assert_eq!(column.schema(), "shop");
        assert_eq!(column.table(), "users");
        assert_eq!(column.name(), "id");
        assert_eq!(column.org_name(), "id");
        assert_eq!(column.data_type(), DataType::BigInt);
        assert!(column.is_primary_key());
        assert!(column.is_signed());
        assert!(column.is_binary());
        assert_eq!(column.decoder(), ColumnDecoder::BigInt { unsigned: false });
    }

    #[test]
    fn test_uuid_extended_type_selects_uuid_decoder() {
        let raw = column_packet("t", "u", DataType::String, 0, 45, 144, Some("uuid"));
        let column = ColumnDefinition::decode(raw, true).unwrap();
        assert_eq!(column.ext_type_name(), Some("uuid"));
        assert_eq!(column.decoder(), ColumnDecoder::Uuid);
        assert_eq!(column.display_size(), 36);
    }

    #[test]
    fn test_unsigned_flag_selects_unsigned_decoder() {
        let raw = column_packet("t", "n", DataType::Integer, column_flags::UNSIGNED, 63, 10, None);
        let column = ColumnDefinition::decode(raw, true).unwrap();
        assert!(!column.is_signed());
        assert_eq!(column.decoder(), ColumnDecoder::Int { unsigned: true });
    }

    #[test]
    fn test_without_extended_info() {
        let mut raw = column_packet("t", "name", DataType::VarChar, 0, 33, 300, None);
        // drop the extended info byte
        let ext_pos = raw.len() - 14;
        raw.remove(ext_pos);
        let column = ColumnDefinition::decode(raw, false).unwrap();
        assert_eq!(column.name(), "name");
        assert_eq!(column.display_size(), 100);
        assert_eq!(column.decoder(), ColumnDecoder::Text);
    }

    #[test]
    fn test_fake_columns() {
        let column = ColumnDefinition::create("Variable_name", DataType::VarString, 0);
        assert_eq!(column.name(), "Variable_name");
        assert_eq!(column.org_name(), "Variable_name");
        assert_eq!(column.schema(), "");
        assert_eq!(column.column_length(), 192);

        let param = ColumnDefinition::parameter();
        assert_eq!(param.name(), "?");
        assert_eq!(param.data_type(), DataType::Null);
        assert!(param.is_binary());
    }

    #[test]
    fn test_truncated_packet_is_an_error() {
        let raw = column_packet("t", "id", DataType::Integer, 0, 63, 11, None);
        assert!(ColumnDefinition::decode(raw[..raw.len() - 8].to_vec(), true).is_err());
    }
}
