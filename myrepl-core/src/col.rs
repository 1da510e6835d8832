//! column types, flags and definitions shared by the query protocol
//! and the binlog row decoder
use crate::error::{Error, Result};
use bitflags::bitflags;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::my::{LenEncInt, ReadMyEnc};
use myrepl_bytes::{ReadBytesExt, ReadFromBytesWithContext, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// column type codes as they appear in column definitions and
/// TABLE_MAP events
///
/// reference: https://github.com/mysql/mysql-server/blob/8.0/libbinlogevents/export/binary_log_types.h
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    Varchar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
}

impl TryFrom<u8> for ColumnType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        let ct = match code {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0a => ColumnType::Date,
            0x0b => ColumnType::Time,
            0x0c => ColumnType::DateTime,
            0x0d => ColumnType::Year,
            0x0e => ColumnType::NewDate,
            0x0f => ColumnType::Varchar,
            0x10 => ColumnType::Bit,
            0x11 => ColumnType::Timestamp2,
            0x12 => ColumnType::DateTime2,
            0x13 => ColumnType::Time2,
            0xf5 => ColumnType::Json,
            0xf6 => ColumnType::NewDecimal,
            0xf7 => ColumnType::Enum,
            0xf8 => ColumnType::Set,
            0xf9 => ColumnType::TinyBlob,
            0xfa => ColumnType::MediumBlob,
            0xfb => ColumnType::LongBlob,
            0xfc => ColumnType::Blob,
            0xfd => ColumnType::VarString,
            0xfe => ColumnType::String,
            0xff => ColumnType::Geometry,
            _ => return Err(Error::InvalidColumnTypeCode(code)),
        };
        Ok(ct)
    }
}

impl From<ColumnType> for u8 {
    fn from(ct: ColumnType) -> u8 {
        match ct {
            ColumnType::Decimal => 0x00,
            ColumnType::Tiny => 0x01,
            ColumnType::Short => 0x02,
            ColumnType::Long => 0x03,
            ColumnType::Float => 0x04,
            ColumnType::Double => 0x05,
            ColumnType::Null => 0x06,
            ColumnType::Timestamp => 0x07,
            ColumnType::LongLong => 0x08,
            ColumnType::Int24 => 0x09,
            ColumnType::Date => 0x0a,
            ColumnType::Time => 0x0b,
            ColumnType::DateTime => 0x0c,
            ColumnType::Year => 0x0d,
            ColumnType::NewDate => 0x0e,
            ColumnType::Varchar => 0x0f,
            ColumnType::Bit => 0x10,
            ColumnType::Timestamp2 => 0x11,
            ColumnType::DateTime2 => 0x12,
            ColumnType::Time2 => 0x13,
            ColumnType::Json => 0xf5,
            ColumnType::NewDecimal => 0xf6,
            ColumnType::Enum => 0xf7,
            ColumnType::Set => 0xf8,
            ColumnType::TinyBlob => 0xf9,
            ColumnType::MediumBlob => 0xfa,
            ColumnType::LongBlob => 0xfb,
            ColumnType::Blob => 0xfc,
            ColumnType::VarString => 0xfd,
            ColumnType::String => 0xfe,
            ColumnType::Geometry => 0xff,
        }
    }
}

bitflags! {
    pub struct ColumnFlags: u16 {
        const NOT_NULL      = 0x0001;
        const PRIMARY_KEY   = 0x0002;
        const UNIQUE_KEY    = 0x0004;
        const MULTIPLE_KEY  = 0x0008;
        const BLOB          = 0x0010;
        const UNSIGNED      = 0x0020;
        const ZEROFILL      = 0x0040;
        const BINARY        = 0x0080;
        const ENUM          = 0x0100;
        const AUTO_INCREMENT = 0x0200;
        const TIMESTAMP     = 0x0400;
        const SET           = 0x0800;
        const NO_DEFAULT_VALUE = 0x1000;
        const ON_UPDATE_NOW = 0x2000;
        const NUM           = 0x8000;
    }
}

/// column definition of the result set protocol
///
/// reference: https://dev.mysql.com/doc/internals/en/com-query-response.html
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    // len-enc-str, always "def"
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub col_len: u32,
    pub col_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
    // len-enc-str, only for COM_FIELD_LIST
    pub default_values: String,
}

impl ColumnDefinition {
    /// a minimal definition, enough for the server endpoint to
    /// describe handler-produced result sets
    pub fn text<S1: Into<String>, S2: Into<String>>(table: S1, name: S2) -> Self {
        ColumnDefinition {
            catalog: "def".to_owned(),
            schema: String::new(),
            table: table.into(),
            org_table: String::new(),
            name: name.into(),
            org_name: String::new(),
            // utf8mb4
            charset: 45,
            col_len: 1024,
            col_type: ColumnType::VarString,
            flags: ColumnFlags::empty(),
            decimals: 0,
            default_values: String::new(),
        }
    }
}

impl<'c> ReadFromBytesWithContext<'c> for ColumnDefinition {
    // true if decoding a COM_FIELD_LIST response
    type Context = bool;

    fn read_with_ctx(input: &mut Bytes, field_list: bool) -> myrepl_bytes::error::Result<Self> {
        use myrepl_bytes::error::Error as PError;

        let catalog = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        let schema = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        let table = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        let org_table = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        let name = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        let org_name = input.read_len_enc_str()?.into_string().map_err(to_perr)?;
        // fixed-length fields marker, always 0x0c
        input.read_len_enc_int()?;
        let charset = input.read_le_u16()?;
        let col_len = input.read_le_u32()?;
        let col_type = input.read_u8()?;
        let col_type = ColumnType::try_from(col_type)
            .map_err(|_| PError::ConstraintError(format!("invalid column type {}", col_type)))?;
        let flags = ColumnFlags::from_bits_truncate(input.read_le_u16()?);
        let decimals = input.read_u8()?;
        input.read_len(2)?;
        let default_values = if field_list && input.has_remaining() {
            input.read_len_enc_str()?.into_string().map_err(to_perr)?
        } else {
            String::new()
        };
        Ok(ColumnDefinition {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            col_len,
            col_type,
            flags,
            decimals,
            default_values,
        })
    }
}

impl WriteToBytes for ColumnDefinition {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        for s in [
            &self.catalog,
            &self.schema,
            &self.table,
            &self.org_table,
            &self.name,
            &self.org_name,
        ]
        .iter()
        {
            len += LenEncInt::from(s.len() as u64).write_to(out)?;
            len += out.write_bytes(s.as_bytes())?;
        }
        len += out.write_u8(0x0c)?;
        len += out.write_le_u16(self.charset)?;
        len += out.write_le_u32(self.col_len)?;
        len += out.write_u8(u8::from(self.col_type))?;
        len += out.write_le_u16(self.flags.bits())?;
        len += out.write_u8(self.decimals)?;
        len += out.write_bytes(&[0u8; 2])?;
        Ok(len)
    }
}

fn to_perr(e: std::string::FromUtf8Error) -> myrepl_bytes::error::Error {
    myrepl_bytes::error::Error::ConstraintError(format!("invalid utf8 string: {}", e))
}
