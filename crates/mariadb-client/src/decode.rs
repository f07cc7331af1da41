//! Field decoding for text and binary protocol rows.
//!
//! A field arrives as the exact bytes of one column of one row, already cut
//! out of the row by the row decoder: ASCII text for the text protocol, the
//! native little-endian layout for fixed width binary types, and the payload
//! of the length-encoded value otherwise.

use mariadb_core::error::{Error, ProtocolError, TypeError};
use mariadb_core::{Date, DateTime, Result, Time, Value};

use crate::column::{ColumnDefinition, DataType};
use crate::protocol::ReadableBuf;

/// Row wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// COM_QUERY results: every field is a length-encoded string.
    Text,
    /// COM_STMT_EXECUTE results: NULL bitmap and native field layouts.
    Binary,
}

/// Decoding strategy of a column, picked once from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDecoder {
    TinyInt { unsigned: bool },
    SmallInt { unsigned: bool },
    MediumInt { unsigned: bool },
    Int { unsigned: bool },
    BigInt { unsigned: bool },
    Year,
    Float,
    Double,
    Decimal,
    Bit,
    Date,
    Time,
    DateTime,
    Json,
    Uuid,
    /// Character types, ENUM, SET and the NULL type.
    Text,
    /// BLOB/TEXT types: binary when the charset is `binary`.
    Blob,
    Geometry,
}

impl ColumnDecoder {
    /// Select the decoder for a column.
    ///
    /// A MariaDB `uuid` extended type wins over the declared type, otherwise
    /// the choice depends on the type and the UNSIGNED flag.
    pub fn select(data_type: DataType, unsigned: bool, ext_type_name: Option<&str>) -> Self {
        if ext_type_name == Some("uuid") {
            return ColumnDecoder::Uuid;
        }
        match data_type {
            DataType::TinyInt => ColumnDecoder::TinyInt { unsigned },
            DataType::SmallInt => ColumnDecoder::SmallInt { unsigned },
            DataType::MediumInt => ColumnDecoder::MediumInt { unsigned },
            DataType::Integer => ColumnDecoder::Int { unsigned },
            DataType::BigInt => ColumnDecoder::BigInt { unsigned },
            DataType::Year => ColumnDecoder::Year,
            DataType::Float => ColumnDecoder::Float,
            DataType::Double => ColumnDecoder::Double,
            DataType::OldDecimal | DataType::Decimal => ColumnDecoder::Decimal,
            DataType::Bit => ColumnDecoder::Bit,
            DataType::Date | DataType::NewDate => ColumnDecoder::Date,
            DataType::Time => ColumnDecoder::Time,
            DataType::DateTime | DataType::Timestamp => ColumnDecoder::DateTime,
            DataType::Json => ColumnDecoder::Json,
            DataType::TinyBlob | DataType::MediumBlob | DataType::LongBlob | DataType::Blob => {
                ColumnDecoder::Blob
            }
            DataType::Geometry => ColumnDecoder::Geometry,
            DataType::VarChar
            | DataType::VarString
            | DataType::String
            | DataType::Enum
            | DataType::Set
            | DataType::Null => ColumnDecoder::Text,
        }
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnDecoder::TinyInt { .. }
                | ColumnDecoder::SmallInt { .. }
                | ColumnDecoder::MediumInt { .. }
                | ColumnDecoder::Int { .. }
                | ColumnDecoder::BigInt { .. }
                | ColumnDecoder::Year
        )
    }

    fn is_textual(self) -> bool {
        matches!(
            self,
            ColumnDecoder::Text | ColumnDecoder::Blob | ColumnDecoder::Json | ColumnDecoder::Uuid
        )
    }
}

fn unsupported(column: &ColumnDefinition, expected: &'static str) -> Error {
    let mut err = TypeError::unsupported(column.data_type(), expected);
    err.column = Some(column.name());
    Error::Type(err)
}

fn bad_value(column: &ColumnDefinition, expected: &'static str, data: &[u8]) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("value '{}'", String::from_utf8_lossy(data)),
        column: Some(column.name()),
    })
}

fn text(data: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(data)
}

/// BIT values are big-endian, up to 8 bytes.
fn bit_value(data: &[u8]) -> u64 {
    data.iter()
        .rev()
        .take(8)
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn binary_integer(column: &ColumnDefinition, data: &[u8]) -> Result<i128> {
    let mut buf = ReadableBuf::new(data);
    let value = match column.decoder() {
        ColumnDecoder::TinyInt { unsigned: false } => i128::from(buf.read_i8()?),
        ColumnDecoder::TinyInt { unsigned: true } => i128::from(buf.read_u8()?),
        ColumnDecoder::SmallInt { unsigned: false } => i128::from(buf.read_i16()?),
        ColumnDecoder::SmallInt { unsigned: true } | ColumnDecoder::Year => {
            i128::from(buf.read_u16()?)
        }
        ColumnDecoder::MediumInt { unsigned: false } | ColumnDecoder::Int { unsigned: false } => {
            i128::from(buf.read_i32()?)
        }
        ColumnDecoder::MediumInt { unsigned: true } | ColumnDecoder::Int { unsigned: true } => {
            i128::from(buf.read_u32()?)
        }
        ColumnDecoder::BigInt { unsigned: false } => i128::from(buf.read_i64()?),
        ColumnDecoder::BigInt { unsigned: true } => i128::from(buf.read_u64()?),
        _ => return Err(unsupported(column, "integer")),
    };
    Ok(value)
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_integer(column: &ColumnDefinition, value: f64, expected: &'static str) -> Result<i128> {
    if !value.is_finite() {
        return Err(Error::Type(TypeError {
            expected,
            actual: format!("value {value}"),
            column: Some(column.name()),
        }));
    }
    Ok(value.trunc() as i128)
}

/// Text protocol integer column: plain ASCII digits, signed unless the
/// column is unsigned.
fn text_integer(column: &ColumnDefinition, data: &[u8], expected: &'static str) -> Result<i128> {
    let mut buf = ReadableBuf::new(data);
    let value = match column.decoder() {
        ColumnDecoder::TinyInt { unsigned: true }
        | ColumnDecoder::SmallInt { unsigned: true }
        | ColumnDecoder::MediumInt { unsigned: true }
        | ColumnDecoder::Int { unsigned: true }
        | ColumnDecoder::BigInt { unsigned: true }
        | ColumnDecoder::Year => buf.atoull(data.len()).map(i128::from),
        _ => buf.atoll(data.len()).map(i128::from),
    };
    value.map_err(|_| bad_value(column, expected, data))
}

/// Integer part of a numeric string (`12`, `-3.75`, `1e3`).
fn parse_numeric_integer(column: &ColumnDefinition, data: &[u8], expected: &'static str) -> Result<i128> {
    let s = text(data);
    let s = s.trim();
    if let Ok(value) = s.parse::<i128>() {
        return Ok(value);
    }
    match s.parse::<f64>() {
        Ok(value) => float_to_integer(column, value, expected),
        Err(_) => Err(bad_value(column, expected, data)),
    }
}

fn integer_value(
    column: &ColumnDefinition,
    data: &[u8],
    encoding: Encoding,
    expected: &'static str,
) -> Result<i128> {
    let decoder = column.decoder();
    match decoder {
        d if d.is_integer() => match encoding {
            Encoding::Text => text_integer(column, data, expected),
            Encoding::Binary => binary_integer(column, data),
        },
        ColumnDecoder::Float | ColumnDecoder::Double => {
            float_to_integer(column, float_value(column, data, encoding)?, expected)
        }
        ColumnDecoder::Decimal | ColumnDecoder::Text | ColumnDecoder::Blob | ColumnDecoder::Json => {
            parse_numeric_integer(column, data, expected)
        }
        ColumnDecoder::Bit => Ok(i128::from(bit_value(data))),
        _ => Err(unsupported(column, expected)),
    }
}

/// Decode as i64. Values outside the i64 range are an overflow error.
pub fn decode_i64(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<i64> {
    let value = integer_value(column, data, encoding, "i64")?;
    i64::try_from(value).map_err(|_| Error::Type(TypeError::overflow(value, "i64")))
}

pub fn decode_u64(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<u64> {
    let value = integer_value(column, data, encoding, "u64")?;
    u64::try_from(value).map_err(|_| Error::Type(TypeError::overflow(value, "u64")))
}

pub fn decode_i32(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<i32> {
    let value = integer_value(column, data, encoding, "i32")?;
    i32::try_from(value).map_err(|_| Error::Type(TypeError::overflow(value, "i32")))
}

pub fn decode_i16(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<i16> {
    let value = integer_value(column, data, encoding, "i16")?;
    i16::try_from(value).map_err(|_| Error::Type(TypeError::overflow(value, "i16")))
}

pub fn decode_i8(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<i8> {
    let value = integer_value(column, data, encoding, "i8")?;
    i8::try_from(value).map_err(|_| Error::Type(TypeError::overflow(value, "i8")))
}

#[allow(clippy::cast_precision_loss)]
fn float_value(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<f64> {
    let decoder = column.decoder();
    match (decoder, encoding) {
        (ColumnDecoder::Float, Encoding::Binary) => Ok(f64::from(ReadableBuf::new(data).read_f32()?)),
        (ColumnDecoder::Double, Encoding::Binary) => ReadableBuf::new(data).read_f64(),
        (d, Encoding::Binary) if d.is_integer() => Ok(binary_integer(column, data)? as f64),
        (ColumnDecoder::Bit, _) => Ok(bit_value(data) as f64),
        (
            ColumnDecoder::Float
            | ColumnDecoder::Double
            | ColumnDecoder::Decimal
            | ColumnDecoder::Text
            | ColumnDecoder::Blob
            | ColumnDecoder::Json,
            _,
        ) => text(data)
            .trim()
            .parse::<f64>()
            .map_err(|_| bad_value(column, "f64", data)),
        (d, Encoding::Text) if d.is_integer() => text(data)
            .trim()
            .parse::<f64>()
            .map_err(|_| bad_value(column, "f64", data)),
        _ => Err(unsupported(column, "f64")),
    }
}

pub fn decode_f64(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<f64> {
    float_value(column, data, encoding)
}

#[allow(clippy::cast_possible_truncation)]
pub fn decode_f32(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<f32> {
    if column.decoder() == ColumnDecoder::Float && encoding == Encoding::Binary {
        return ReadableBuf::new(data).read_f32();
    }
    float_value(column, data, encoding).map(|v| v as f32)
}

/// Integers are true when non zero; strings are false when empty, `0` or `false`.
#[allow(clippy::float_cmp)]
pub fn decode_bool(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<bool> {
    let decoder = column.decoder();
    match decoder {
        d if d.is_integer() => Ok(integer_value(column, data, encoding, "bool")? != 0),
        ColumnDecoder::Float | ColumnDecoder::Double | ColumnDecoder::Decimal => {
            Ok(float_value(column, data, encoding)? != 0.0)
        }
        ColumnDecoder::Bit => Ok(data.iter().any(|b| *b != 0)),
        d if d.is_textual() => {
            let s = text(data);
            let s = s.trim();
            Ok(!(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")))
        }
        _ => Err(unsupported(column, "bool")),
    }
}

/// Decode as a string. Binary temporal and numeric values are formatted the
/// way the server formats them in the text protocol.
pub fn decode_string(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<String> {
    if encoding == Encoding::Text {
        return Ok(text(data).into_owned());
    }
    let decoder = column.decoder();
    match decoder {
        d if d.is_integer() => Ok(binary_integer(column, data)?.to_string()),
        ColumnDecoder::Float => Ok(ReadableBuf::new(data).read_f32()?.to_string()),
        ColumnDecoder::Double => Ok(ReadableBuf::new(data).read_f64()?.to_string()),
        ColumnDecoder::Date => Ok(binary_datetime(data)?.date.to_string()),
        ColumnDecoder::Time => Ok(binary_time(data)?.to_string()),
        ColumnDecoder::DateTime => Ok(binary_datetime(data)?.to_string()),
        _ => Ok(text(data).into_owned()),
    }
}

/// Raw field bytes.
pub fn decode_bytes(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

/// Binary DATE / DATETIME / TIMESTAMP payload of 0, 4, 7 or 11 bytes.
pub(crate) fn binary_datetime(data: &[u8]) -> Result<DateTime> {
    let mut value = DateTime::default();
    if data.is_empty() {
        return Ok(value);
    }
    let mut buf = ReadableBuf::new(data);
    value.date = Date::new(buf.read_u16()?, buf.read_u8()?, buf.read_u8()?);
    if data.len() >= 7 {
        value.hour = buf.read_u8()?;
        value.minute = buf.read_u8()?;
        value.second = buf.read_u8()?;
    }
    if data.len() >= 11 {
        value.microsecond = buf.read_u32()?;
    }
    Ok(value)
}

/// Binary TIME payload of 0, 8 or 12 bytes.
pub(crate) fn binary_time(data: &[u8]) -> Result<Time> {
    let mut value = Time::default();
    if data.is_empty() {
        return Ok(value);
    }
    let mut buf = ReadableBuf::new(data);
    value.negative = buf.read_u8()? == 1;
    let days = buf.read_u32()?;
    let hour = buf.read_u8()?;
    value.hours = days
        .checked_mul(24)
        .and_then(|hours| hours.checked_add(u32::from(hour)))
        .ok_or_else(|| {
            Error::Protocol(ProtocolError {
                message: format!("binary TIME of {days} days is out of range"),
                raw_data: Some(data.to_vec()),
                source: None,
            })
        })?;
    value.minutes = buf.read_u8()?;
    value.seconds = buf.read_u8()?;
    if data.len() >= 12 {
        value.microseconds = buf.read_u32()?;
    }
    Ok(value)
}

pub fn decode_date(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<Date> {
    match (column.decoder(), encoding) {
        (ColumnDecoder::Date | ColumnDecoder::DateTime, Encoding::Binary) => {
            Ok(binary_datetime(data)?.date)
        }
        (ColumnDecoder::Date | ColumnDecoder::DateTime | ColumnDecoder::Text | ColumnDecoder::Blob, _) => {
            DateTime::parse(&text(data))
                .map(|dt| dt.date)
                .ok_or_else(|| bad_value(column, "Date", data))
        }
        _ => Err(unsupported(column, "Date")),
    }
}

pub fn decode_time(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<Time> {
    let from_datetime = |dt: DateTime| {
        Time::new(false, u32::from(dt.hour), dt.minute, dt.second, dt.microsecond)
    };
    match (column.decoder(), encoding) {
        (ColumnDecoder::Time, Encoding::Binary) => binary_time(data),
        (ColumnDecoder::DateTime, Encoding::Binary) => Ok(from_datetime(binary_datetime(data)?)),
        (ColumnDecoder::DateTime, Encoding::Text) => DateTime::parse(&text(data))
            .map(from_datetime)
            .ok_or_else(|| bad_value(column, "Time", data)),
        (ColumnDecoder::Time | ColumnDecoder::Text | ColumnDecoder::Blob, _) => {
            Time::parse(&text(data)).ok_or_else(|| bad_value(column, "Time", data))
        }
        _ => Err(unsupported(column, "Time")),
    }
}

pub fn decode_datetime(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<DateTime> {
    match (column.decoder(), encoding) {
        (ColumnDecoder::Date | ColumnDecoder::DateTime, Encoding::Binary) => binary_datetime(data),
        (ColumnDecoder::Date | ColumnDecoder::DateTime | ColumnDecoder::Text | ColumnDecoder::Blob, _) => {
            DateTime::parse(&text(data)).ok_or_else(|| bad_value(column, "DateTime", data))
        }
        _ => Err(unsupported(column, "DateTime")),
    }
}

/// Parse the canonical `8-4-4-4-12` form (hyphens optional).
fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks(2).enumerate() {
        let pair = std::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(out)
}

/// Decode a field to the `Value` matching its column type.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_value(column: &ColumnDefinition, data: &[u8], encoding: Encoding) -> Result<Value> {
    let value = match column.decoder() {
        ColumnDecoder::TinyInt { .. } if column.column_length() == 1 => {
            Value::Bool(integer_value(column, data, encoding, "bool")? != 0)
        }
        ColumnDecoder::TinyInt { unsigned: false } => Value::TinyInt(decode_i8(column, data, encoding)?),
        ColumnDecoder::TinyInt { unsigned: true } | ColumnDecoder::SmallInt { unsigned: false } | ColumnDecoder::Year => {
            Value::SmallInt(decode_i16(column, data, encoding)?)
        }
        ColumnDecoder::SmallInt { unsigned: true } | ColumnDecoder::MediumInt { .. } | ColumnDecoder::Int { unsigned: false } => {
            Value::Int(decode_i32(column, data, encoding)?)
        }
        ColumnDecoder::Int { unsigned: true } | ColumnDecoder::BigInt { unsigned: false } => {
            Value::BigInt(decode_i64(column, data, encoding)?)
        }
        ColumnDecoder::BigInt { unsigned: true } => Value::UnsignedBigInt(decode_u64(column, data, encoding)?),
        ColumnDecoder::Float => Value::Float(decode_f32(column, data, encoding)?),
        ColumnDecoder::Double => Value::Double(decode_f64(column, data, encoding)?),
        ColumnDecoder::Decimal => Value::Decimal(text(data).into_owned()),
        ColumnDecoder::Bit | ColumnDecoder::Geometry => Value::Bytes(data.to_vec()),
        ColumnDecoder::Date => Value::Date(decode_date(column, data, encoding)?),
        ColumnDecoder::Time => Value::Time(decode_time(column, data, encoding)?),
        ColumnDecoder::DateTime => Value::DateTime(decode_datetime(column, data, encoding)?),
        ColumnDecoder::Json => {
            let s = text(data);
            serde_json::from_str(&s).map_or_else(|_| Value::Text(s.into_owned()), Value::Json)
        }
        ColumnDecoder::Uuid => {
            let s = text(data);
            parse_uuid(s.trim()).map_or_else(|| Value::Text(s.into_owned()), Value::Uuid)
        }
        ColumnDecoder::Text if column.data_type() == DataType::Null => Value::Null,
        ColumnDecoder::Text | ColumnDecoder::Blob => {
            if column.is_binary() {
                Value::Bytes(data.to_vec())
            } else {
                Value::Text(text(data).into_owned())
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::column_flags;

    fn column(data_type: DataType, flags: u16) -> ColumnDefinition {
        ColumnDefinition::create("c", data_type, flags)
    }

    #[test]
    fn test_select_decoder() {
        assert_eq!(
            ColumnDecoder::select(DataType::BigInt, true, None),
            ColumnDecoder::BigInt { unsigned: true }
        );
        assert_eq!(
            ColumnDecoder::select(DataType::VarChar, false, Some("uuid")),
            ColumnDecoder::Uuid
        );
        assert_eq!(ColumnDecoder::select(DataType::NewDate, false, None), ColumnDecoder::Date);
        assert_eq!(ColumnDecoder::select(DataType::Timestamp, false, None), ColumnDecoder::DateTime);
        assert_eq!(ColumnDecoder::select(DataType::OldDecimal, false, None), ColumnDecoder::Decimal);
    }

    #[test]
    fn test_text_integers() {
        let col = column(DataType::Integer, 0);
        assert_eq!(decode_i64(&col, b"-42", Encoding::Text).unwrap(), -42);
        assert_eq!(decode_i32(&col, b"7", Encoding::Text).unwrap(), 7);
        assert!(decode_i64(&col, b"abc", Encoding::Text).is_err());
    }

    #[test]
    fn test_text_bigint_bounds() {
        let signed = column(DataType::BigInt, 0);
        assert_eq!(
            decode_value(&signed, b"-9223372036854775808", Encoding::Text).unwrap(),
            Value::BigInt(i64::MIN)
        );
        assert_eq!(decode_i64(&signed, b"-17", Encoding::Text).unwrap(), -17);

        let unsigned = column(DataType::BigInt, column_flags::UNSIGNED);
        assert_eq!(
            decode_value(&unsigned, b"18446744073709551615", Encoding::Text).unwrap(),
            Value::UnsignedBigInt(u64::MAX)
        );
        assert!(decode_i64(&unsigned, b"18446744073709551615", Encoding::Text).is_err());
        assert!(matches!(
            decode_u64(&unsigned, b"12x", Encoding::Text).unwrap_err(),
            Error::Type(_)
        ));
    }

    #[test]
    fn test_binary_time_day_overflow() {
        let mut data = vec![0u8];
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(binary_time(&data).unwrap_err(), Error::Protocol(_)));

        let mut data = vec![1u8];
        data.extend_from_slice(&34u32.to_le_bytes());
        data.extend_from_slice(&[22, 59, 59]);
        let time = binary_time(&data).unwrap();
        assert!(time.negative);
        assert_eq!(time.hours, 838);
    }

    #[test]
    fn test_narrowing_overflow_is_an_error() {
        let col = column(DataType::Integer, 0);
        let err = decode_i8(&col, b"300", Encoding::Text).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert!(err.to_string().contains("out of range value 300"));

        let binary = 70_000i32.to_le_bytes();
        assert!(decode_i16(&col, &binary, Encoding::Binary).is_err());
        assert_eq!(decode_i32(&col, &binary, Encoding::Binary).unwrap(), 70_000);
    }

    #[test]
    fn test_binary_unsigned_widening() {
        let col = column(DataType::BigInt, column_flags::UNSIGNED);
        let data = u64::MAX.to_le_bytes();
        assert_eq!(decode_u64(&col, &data, Encoding::Binary).unwrap(), u64::MAX);
        assert!(decode_i64(&col, &data, Encoding::Binary).is_err());
        assert_eq!(
            decode_value(&col, &data, Encoding::Binary).unwrap(),
            Value::UnsignedBigInt(u64::MAX)
        );

        let col = column(DataType::SmallInt, column_flags::UNSIGNED);
        assert_eq!(
            decode_value(&col, &65_535u16.to_le_bytes(), Encoding::Binary).unwrap(),
            Value::Int(65_535)
        );
    }

    #[test]
    fn test_decimal_is_text_in_both_protocols() {
        let col = column(DataType::Decimal, 0);
        assert_eq!(
            decode_value(&col, b"12.50", Encoding::Binary).unwrap(),
            Value::Decimal("12.50".to_string())
        );
        assert_eq!(decode_i64(&col, b"-12.75", Encoding::Binary).unwrap(), -12);
        assert!((decode_f64(&col, b"12.50", Encoding::Text).unwrap() - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bool_decoding() {
        let int = column(DataType::Integer, 0);
        assert!(decode_bool(&int, b"2", Encoding::Text).unwrap());
        assert!(!decode_bool(&int, b"0", Encoding::Text).unwrap());

        let s = column(DataType::VarChar, 0);
        assert!(!decode_bool(&s, b"", Encoding::Text).unwrap());
        assert!(!decode_bool(&s, b"0", Encoding::Text).unwrap());
        assert!(decode_bool(&s, b"yes", Encoding::Text).unwrap());

        let date = column(DataType::Date, 0);
        assert!(decode_bool(&date, b"2024-01-01", Encoding::Text).is_err());
    }

    #[test]
    fn test_binary_temporal() {
        let col = column(DataType::DateTime, 0);
        let mut data = Vec::new();
        data.extend_from_slice(&2024u16.to_le_bytes());
        data.extend_from_slice(&[2, 29, 13, 4, 9]);
        data.extend_from_slice(&123u32.to_le_bytes());
        let dt = decode_datetime(&col, &data, Encoding::Binary).unwrap();
        assert_eq!(dt.to_string(), "2024-02-29 13:04:09.000123");
        assert_eq!(
            decode_string(&col, &data, Encoding::Binary).unwrap(),
            "2024-02-29 13:04:09.000123"
        );
        assert_eq!(decode_date(&col, &data[..4], Encoding::Binary).unwrap(), Date::new(2024, 2, 29));
        assert!(decode_datetime(&col, &[], Encoding::Binary).unwrap().date.is_zero());

        let time = column(DataType::Time, 0);
        let mut data = vec![1];
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[2, 3, 4]);
        let t = decode_time(&time, &data, Encoding::Binary).unwrap();
        assert!(t.negative);
        assert_eq!(t.hours, 26);
        assert_eq!(t.to_string(), "-26:03:04");
    }

    #[test]
    fn test_temporal_on_numeric_names_source_type() {
        let col = column(DataType::Integer, 0);
        let err = decode_date(&col, b"20240101", Encoding::Text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type error: expected Date for column 'c', found data type INTEGER"
        );
    }

    #[test]
    fn test_string_columns_parse_temporals() {
        let col = column(DataType::VarChar, 0);
        assert_eq!(
            decode_date(&col, b"2023-11-05", Encoding::Text).unwrap(),
            Date::new(2023, 11, 5)
        );
        assert!(decode_date(&col, b"not a date", Encoding::Text).is_err());
    }

    #[test]
    fn test_default_values() {
        let flag = ColumnDefinition::create("f", DataType::TinyInt, 0);
        assert_eq!(decode_value(&flag, b"1", Encoding::Text).unwrap(), Value::Bool(true));

        let json = column(DataType::Json, 0);
        assert_eq!(
            decode_value(&json, br#"{"a":1}"#, Encoding::Text).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );

        let bit = column(DataType::Bit, 0);
        assert_eq!(decode_value(&bit, &[0x01, 0x02], Encoding::Text).unwrap(), Value::Bytes(vec![1, 2]));
        assert_eq!(decode_i64(&bit, &[0x01, 0x02], Encoding::Text).unwrap(), 258);

        let text = column(DataType::VarString, 0);
        assert_eq!(
            decode_value(&text, b"hello", Encoding::Text).unwrap(),
            Value::Text("hello".to_string())
        );
    }

    #[test]
    fn test_uuid_value() {
        assert_eq!(
            parse_uuid("123e4567-e89b-12d3-a456-426614174000").map(|b| b[0..2].to_vec()),
            Some(vec![0x12, 0x3e])
        );
        assert_eq!(parse_uuid("nope"), None);
    }
}
