//! binlog row image column decoding
//!
//! unlike the binary result set protocol, row images pack values with
//! widths taken from the table map metadata, temporals in big-endian
use super::jsonb::decode_jsonb;
use super::rows::RowsDecodeOpts;
use super::table_map::{ColDef, ColMeta};
use crate::col::ColumnType;
use crate::decimal::MyDecimal;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use myrepl_bytes::error::{Error, Result};
use myrepl_bytes::ReadBytesExt;
use std::fmt;
use std::str::FromStr;

/// a decoded column value out of a row image
#[derive(Debug, Clone, PartialEq)]
pub enum BinlogValue {
    Null,
    Tiny(i8),
    Short(i16),
    Int24(i32),
    Long(i32),
    LongLong(i64),
    Float(f32),
    Double(f64),
    Year(u16),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(NaiveDateTime),
    Time(MyTime),
    // textual rendering used for temporals/decimals when structured
    // output is disabled, and for zero dates
    Str(String),
    Decimal(BigDecimal),
    Bytes(Bytes),
    Bit(Bytes),
    Enum(u64),
    Set(u64),
    Json(String),
    Geometry(Bytes),
}

impl BinlogValue {
    pub fn is_null(&self) -> bool {
        matches!(self, BinlogValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BinlogValue::Tiny(v) => Some(*v as i64),
            BinlogValue::Short(v) => Some(*v as i64),
            BinlogValue::Int24(v) | BinlogValue::Long(v) => Some(*v as i64),
            BinlogValue::LongLong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            BinlogValue::Str(s) | BinlogValue::Json(s) => Some(s.clone()),
            BinlogValue::Bytes(bs) => Some(String::from_utf8_lossy(bs.as_ref()).into_owned()),
            _ => None,
        }
    }
}

/// a TIME value, range exceeds 24 hours so no chrono type fits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MyTime {
    pub negative: bool,
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub micros: u32,
}

impl fmt::Display for MyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)?;
        if self.micros > 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

/// byte width of the fractional second part for a given precision
fn fsp_len(fsp: u8) -> usize {
    (fsp as usize + 1) / 2
}

/// read the fractional part, scaled to microseconds
fn read_fsp(input: &mut Bytes, fsp: u8) -> Result<u32> {
    let micros = match fsp_len(fsp) {
        0 => 0,
        1 => input.read_u8()? as u32 * 10_000,
        2 => input.read_be_u16()? as u32 * 100,
        3 => input.read_be_u24()?,
        n => {
            return Err(Error::ConstraintError(format!(
                "invalid fractional second width {}",
                n
            )))
        }
    };
    Ok(micros)
}

fn format_date(year: u32, month: u32, day: u32) -> String {
    format!("{:04}-{:02}-{:02}", year, month, day)
}

fn format_datetime(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
) -> String {
    let mut s = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, minute, second
    );
    if micros > 0 {
        s.push_str(&format!(".{:06}", micros));
    }
    s
}

fn date_value(year: u32, month: u32, day: u32, opts: &RowsDecodeOpts) -> BinlogValue {
    if opts.parse_time {
        if let Some(d) = NaiveDate::from_ymd_opt(year as i32, month, day) {
            return BinlogValue::Date(d);
        }
    }
    BinlogValue::Str(format_date(year, month, day))
}

fn datetime_value(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
    timestamp: bool,
    opts: &RowsDecodeOpts,
) -> BinlogValue {
    if opts.parse_time {
        let dt = NaiveDate::from_ymd_opt(year as i32, month, day)
            .and_then(|d| d.and_hms_micro_opt(hour, minute, second, micros));
        if let Some(dt) = dt {
            return if timestamp {
                BinlogValue::Timestamp(dt)
            } else {
                BinlogValue::DateTime(dt)
            };
        }
    }
    BinlogValue::Str(format_datetime(year, month, day, hour, minute, second, micros))
}

/// decode one column value, consuming exactly its wire bytes
pub(crate) fn read_value(
    input: &mut Bytes,
    col: &ColDef,
    opts: &RowsDecodeOpts,
) -> Result<BinlogValue> {
    let value = match col.col_type {
        ColumnType::Tiny => BinlogValue::Tiny(input.read_i8()?),
        ColumnType::Short => BinlogValue::Short(input.read_le_i16()?),
        ColumnType::Int24 => BinlogValue::Int24(input.read_le_i24()?),
        ColumnType::Long => BinlogValue::Long(input.read_le_i32()?),
        ColumnType::LongLong => BinlogValue::LongLong(input.read_le_i64()?),
        ColumnType::Float => BinlogValue::Float(input.read_le_f32()?),
        ColumnType::Double => BinlogValue::Double(input.read_le_f64()?),
        ColumnType::Year => {
            let y = input.read_u8()?;
            BinlogValue::Year(if y == 0 { 0 } else { 1900 + y as u16 })
        }
        ColumnType::Date | ColumnType::NewDate => {
            // year<<9 | month<<5 | day
            let v = input.read_le_u24()?;
            let day = v & 0x1f;
            let month = (v >> 5) & 0x0f;
            let year = v >> 9;
            date_value(year, month, day, opts)
        }
        ColumnType::Time => {
            // legacy signed HHMMSS integer
            let v = input.read_le_i24()?;
            let (negative, v) = if v < 0 { (true, -v) } else { (false, v) };
            let time = MyTime {
                negative,
                hours: (v / 10_000) as u32,
                minutes: ((v % 10_000) / 100) as u8,
                seconds: (v % 100) as u8,
                micros: 0,
            };
            if opts.parse_time {
                BinlogValue::Time(time)
            } else {
                BinlogValue::Str(time.to_string())
            }
        }
        ColumnType::DateTime => {
            // YYYYMMDDHHMMSS as one integer
            let v = input.read_le_u64()?;
            let d = (v / 1_000_000) as u32;
            let t = (v % 1_000_000) as u32;
            datetime_value(
                d / 10_000,
                (d % 10_000) / 100,
                d % 100,
                t / 10_000,
                (t % 10_000) / 100,
                t % 100,
                0,
                false,
                opts,
            )
        }
        ColumnType::Timestamp => {
            let secs = input.read_le_u32()?;
            timestamp_value(secs as i64, 0, opts)
        }
        ColumnType::Timestamp2 => {
            let fsp = match col.meta {
                ColMeta::Fsp(fsp) => fsp,
                _ => 0,
            };
            let secs = input.read_be_u32()?;
            let micros = read_fsp(input, fsp)?;
            timestamp_value(secs as i64, micros, opts)
        }
        ColumnType::DateTime2 => {
            let fsp = match col.meta {
                ColMeta::Fsp(fsp) => fsp,
                _ => 0,
            };
            // 5 bytes big-endian: 1 bit sign, 17 bits year*13+month,
            // 5 bits day, 5 bits hour, 6 bits minute, 6 bits second
            let raw = input.read_be_u40()? as i64 - 0x80_0000_0000;
            let micros = read_fsp(input, fsp)?;
            let ym = ((raw >> 22) & 0x1ffff) as u32;
            datetime_value(
                ym / 13,
                ym % 13,
                ((raw >> 17) & 0x1f) as u32,
                ((raw >> 12) & 0x1f) as u32,
                ((raw >> 6) & 0x3f) as u32,
                (raw & 0x3f) as u32,
                micros,
                false,
                opts,
            )
        }
        ColumnType::Time2 => {
            let fsp = match col.meta {
                ColMeta::Fsp(fsp) => fsp,
                _ => 0,
            };
            let time = read_time2(input, fsp)?;
            if opts.parse_time {
                BinlogValue::Time(time)
            } else {
                BinlogValue::Str(time.to_string())
            }
        }
        ColumnType::NewDecimal | ColumnType::Decimal => {
            let (precision, scale) = match col.meta {
                ColMeta::Decimal { precision, scale } => (precision, scale),
                _ => {
                    return Err(Error::ConstraintError(
                        "decimal column without precision metadata".to_owned(),
                    ))
                }
            };
            let dec = MyDecimal::read_from(input, precision, scale)?;
            let text = dec.to_string();
            if opts.use_decimal {
                let parsed = BigDecimal::from_str(&text).map_err(|e| {
                    Error::ConstraintError(format!("invalid decimal {}: {}", text, e))
                })?;
                BinlogValue::Decimal(parsed)
            } else {
                BinlogValue::Str(text)
            }
        }
        ColumnType::Bit => {
            let (bits, bytes) = match col.meta {
                ColMeta::Bit { bits, bytes } => (bits, bytes),
                _ => (0, 0),
            };
            let n = (bytes as usize * 8 + bits as usize + 7) / 8;
            BinlogValue::Bit(input.read_len(n)?)
        }
        ColumnType::Varchar | ColumnType::VarString => {
            let max_len = match col.meta {
                ColMeta::MaxLen(max_len) => max_len,
                _ => 0,
            };
            BinlogValue::Bytes(read_var_bytes(input, max_len)?)
        }
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            let (real_type, len) = match col.meta {
                ColMeta::Str { real_type, len } => (real_type, len),
                _ => (u8::from(ColumnType::String), 0),
            };
            read_string_family(input, real_type, len)?
        }
        ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Blob => {
            let pack_len = match col.meta {
                ColMeta::PackLen(n) => n,
                _ => 1,
            };
            BinlogValue::Bytes(read_blob_bytes(input, pack_len)?)
        }
        ColumnType::Json => {
            let pack_len = match col.meta {
                ColMeta::PackLen(n) => n,
                _ => 4,
            };
            let mut raw = read_blob_bytes(input, pack_len)?;
            BinlogValue::Json(decode_jsonb(&mut raw)?)
        }
        ColumnType::Geometry => {
            let pack_len = match col.meta {
                ColMeta::PackLen(n) => n,
                _ => 4,
            };
            BinlogValue::Geometry(read_blob_bytes(input, pack_len)?)
        }
        ColumnType::Null => BinlogValue::Null,
    };
    Ok(value)
}

fn timestamp_value(secs: i64, micros: u32, opts: &RowsDecodeOpts) -> BinlogValue {
    match NaiveDateTime::from_timestamp_opt(secs, micros * 1000) {
        Some(dt) if opts.parse_time => BinlogValue::Timestamp(dt),
        Some(dt) => {
            if micros > 0 {
                BinlogValue::Str(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            } else {
                BinlogValue::Str(dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }
        }
        None => BinlogValue::Str("0000-00-00 00:00:00".to_owned()),
    }
}

/// TIME2: 3 bytes big-endian plus fractional part, stored as a
/// fixed-point value offset by the sign bit
fn read_time2(input: &mut Bytes, fsp: u8) -> Result<MyTime> {
    const INT_OFS: i64 = 0x80_0000;

    let (int_part, frac_micros) = match fsp_len(fsp) {
        0 => (input.read_be_u24()? as i64 - INT_OFS, 0i64),
        1 => {
            let mut int_part = input.read_be_u24()? as i64 - INT_OFS;
            let mut frac = input.read_u8()? as i64;
            if int_part < 0 && frac > 0 {
                // borrow from the integer part
                int_part += 1;
                frac -= 0x100;
            }
            (int_part, frac * 10_000)
        }
        2 => {
            let mut int_part = input.read_be_u24()? as i64 - INT_OFS;
            let mut frac = input.read_be_u16()? as i64;
            if int_part < 0 && frac > 0 {
                int_part += 1;
                frac -= 0x1_0000;
            }
            (int_part, frac * 100)
        }
        3 => {
            let mut int_part = input.read_be_u24()? as i64 - INT_OFS;
            let mut frac = input.read_be_u24()? as i64;
            if int_part < 0 && frac > 0 {
                int_part += 1;
                frac -= 0x100_0000;
            }
            (int_part, frac)
        }
        n => {
            return Err(Error::ConstraintError(format!(
                "invalid fractional second width {}",
                n
            )))
        }
    };
    // the packed hms sits above bit 24 and microseconds below, so
    // one signed fixed-point value negates with correct borrows
    let mut tmp = (int_part << 24) + frac_micros;
    let negative = tmp < 0;
    if negative {
        tmp = -tmp;
    }
    let hms = tmp >> 24;
    Ok(MyTime {
        negative,
        hours: ((hms >> 12) & 0x3ff) as u32,
        minutes: ((hms >> 6) & 0x3f) as u8,
        seconds: (hms & 0x3f) as u8,
        micros: (tmp % (1 << 24)) as u32,
    })
}

/// length prefix is 1 byte when the max length fits one byte
fn read_var_bytes(input: &mut Bytes, max_len: u16) -> Result<Bytes> {
    let len = if max_len > 255 {
        input.read_le_u16()? as usize
    } else {
        input.read_u8()? as usize
    };
    input.read_len(len)
}

fn read_blob_bytes(input: &mut Bytes, pack_len: u8) -> Result<Bytes> {
    let len = match pack_len {
        1 => input.read_u8()? as usize,
        2 => input.read_le_u16()? as usize,
        3 => input.read_le_u24()? as usize,
        4 => input.read_le_u32()? as usize,
        n => {
            return Err(Error::ConstraintError(format!(
                "invalid blob length width {}",
                n
            )))
        }
    };
    input.read_len(len)
}

/// the STRING type code covers CHAR, ENUM and SET, the real type is
/// reconstructed from the two metadata bytes
fn read_string_family(input: &mut Bytes, real_type: u8, len: u8) -> Result<BinlogValue> {
    const TYPE_ENUM: u8 = 0xf7;
    const TYPE_SET: u8 = 0xf8;

    let (real_type, max_len) = if real_type & 0x30 != 0x30 {
        // long CHAR: length bits hidden in the unused type bits
        (
            real_type | 0x30,
            len as u16 | (((real_type as u16 & 0x30) ^ 0x30) << 4),
        )
    } else {
        (real_type, len as u16)
    };
    match real_type {
        TYPE_ENUM => {
            let v = match max_len {
                1 => input.read_u8()? as u64,
                2 => input.read_le_u16()? as u64,
                n => {
                    return Err(Error::ConstraintError(format!(
                        "invalid enum pack length {}",
                        n
                    )))
                }
            };
            Ok(BinlogValue::Enum(v))
        }
        TYPE_SET => {
            let n = max_len as usize;
            if n == 0 || n > 8 {
                return Err(Error::ConstraintError(format!(
                    "invalid set pack length {}",
                    n
                )));
            }
            let raw = input.read_len(n)?;
            let mut v = 0u64;
            for (i, b) in raw.iter().enumerate() {
                v |= (*b as u64) << (8 * i);
            }
            Ok(BinlogValue::Set(v))
        }
        _ => Ok(BinlogValue::Bytes(read_var_bytes(input, max_len)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::table_map::{ColDef, ColMeta};
    use bytes::{BufMut, BytesMut};

    fn col(col_type: ColumnType, meta: ColMeta) -> ColDef {
        ColDef {
            col_type,
            meta,
            nullable: true,
        }
    }

    fn opts() -> RowsDecodeOpts {
        RowsDecodeOpts::default()
    }

    fn structured() -> RowsDecodeOpts {
        RowsDecodeOpts {
            parse_time: true,
            use_decimal: true,
            ..RowsDecodeOpts::default()
        }
    }

    #[test]
    fn test_integers() {
        let mut bs = Bytes::from_static(&[0xff]);
        assert_eq!(
            BinlogValue::Tiny(-1),
            read_value(&mut bs, &col(ColumnType::Tiny, ColMeta::None), &opts()).unwrap()
        );
        let mut bs = Bytes::from_static(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(
            BinlogValue::Long(1),
            read_value(&mut bs, &col(ColumnType::Long, ColMeta::None), &opts()).unwrap()
        );
        let mut bs = Bytes::from_static(&[0xff, 0xff, 0xff]);
        assert_eq!(
            BinlogValue::Int24(-1),
            read_value(&mut bs, &col(ColumnType::Int24, ColMeta::None), &opts()).unwrap()
        );
    }

    #[test]
    fn test_floats() {
        let mut buf = BytesMut::new();
        buf.put_f32_le(1.5);
        buf.put_f64_le(-2.25);
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Float(1.5),
            read_value(&mut bs, &col(ColumnType::Float, ColMeta::PackLen(4)), &opts()).unwrap()
        );
        assert_eq!(
            BinlogValue::Double(-2.25),
            read_value(&mut bs, &col(ColumnType::Double, ColMeta::PackLen(8)), &opts()).unwrap()
        );
    }

    #[test]
    fn test_year() {
        let mut bs = Bytes::from_static(&[120]);
        assert_eq!(
            BinlogValue::Year(2020),
            read_value(&mut bs, &col(ColumnType::Year, ColMeta::None), &opts()).unwrap()
        );
    }

    #[test]
    fn test_date_packed() {
        // 2020-07-15: 2020<<9 | 7<<5 | 15
        let v: u32 = (2020 << 9) | (7 << 5) | 15;
        let mut buf = BytesMut::new();
        buf.put_slice(&v.to_le_bytes()[..3]);
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Str("2020-07-15".to_owned()),
            read_value(&mut bs, &col(ColumnType::Date, ColMeta::None), &opts()).unwrap()
        );
        let v: u32 = (2020 << 9) | (7 << 5) | 15;
        let mut buf = BytesMut::new();
        buf.put_slice(&v.to_le_bytes()[..3]);
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Date(NaiveDate::from_ymd_opt(2020, 7, 15).unwrap()),
            read_value(&mut bs, &col(ColumnType::Date, ColMeta::None), &structured()).unwrap()
        );
    }

    #[test]
    fn test_datetime2_packed() {
        // 2016-10-28 15:30:11, fsp 0
        let ym: i64 = 2016 * 13 + 10;
        let packed: i64 =
            0x80_0000_0000 + (ym << 22) + (28 << 17) + (15 << 12) + (30 << 6) + 11;
        let mut buf = BytesMut::new();
        buf.put_slice(&packed.to_be_bytes()[3..]);
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Str("2016-10-28 15:30:11".to_owned()),
            read_value(&mut bs, &col(ColumnType::DateTime2, ColMeta::Fsp(0)), &opts()).unwrap()
        );
    }

    #[test]
    fn test_timestamp2_with_fraction() {
        let mut buf = BytesMut::new();
        buf.put_u32(1_600_000_000);
        // fsp 3 stores two bytes of 10^-4 seconds
        buf.put_u16(1234);
        let mut bs = buf.freeze();
        match read_value(
            &mut bs,
            &col(ColumnType::Timestamp2, ColMeta::Fsp(3)),
            &structured(),
        )
        .unwrap()
        {
            BinlogValue::Timestamp(ts) => {
                assert_eq!(1_600_000_000, ts.timestamp());
                assert_eq!(123_400, ts.timestamp_subsec_micros());
            }
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_time2() {
        // 13:27:54, fsp 0
        let packed: i64 = 0x80_0000 + (13 << 12) + (27 << 6) + 54;
        let mut buf = BytesMut::new();
        buf.put_slice(&packed.to_be_bytes()[5..]);
        let mut bs = buf.freeze();
        let time = read_time2(&mut bs, 0).unwrap();
        assert_eq!("13:27:54", time.to_string());

        // -00:00:00.50 with fsp 2: two's complement across the
        // integer/fraction boundary, full value 0x80000000 - 50
        let full: u32 = 0x8000_0000 - 50;
        let mut buf = BytesMut::new();
        buf.put_u32(full);
        let mut bs = buf.freeze();
        let time = read_time2(&mut bs, 2).unwrap();
        assert!(time.negative);
        assert_eq!(0, time.hours);
        assert_eq!(0, time.seconds);
        assert_eq!(500_000, time.micros);
    }

    #[test]
    fn test_decimal_value() {
        let mut bs = Bytes::from_static(&[0x80, 0x00, 0x00, 0x03, 0x0A]);
        assert_eq!(
            BinlogValue::Str("3.10".to_owned()),
            read_value(
                &mut bs,
                &col(
                    ColumnType::NewDecimal,
                    ColMeta::Decimal {
                        precision: 10,
                        scale: 2
                    }
                ),
                &opts()
            )
            .unwrap()
        );
    }

    #[test]
    fn test_varchar_prefix_widths() {
        let mut bs = Bytes::from_static(b"\x03abc");
        assert_eq!(
            BinlogValue::Bytes(Bytes::from_static(b"abc")),
            read_value(&mut bs, &col(ColumnType::Varchar, ColMeta::MaxLen(10)), &opts()).unwrap()
        );
        let mut buf = BytesMut::new();
        buf.put_u16_le(3);
        buf.put_slice(b"abc");
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Bytes(Bytes::from_static(b"abc")),
            read_value(
                &mut bs,
                &col(ColumnType::Varchar, ColMeta::MaxLen(300)),
                &opts()
            )
            .unwrap()
        );
    }

    #[test]
    fn test_enum_and_set() {
        let mut bs = Bytes::from_static(&[0x02]);
        assert_eq!(
            BinlogValue::Enum(2),
            read_value(
                &mut bs,
                &col(
                    ColumnType::String,
                    ColMeta::Str {
                        real_type: 0xf7,
                        len: 1
                    }
                ),
                &opts()
            )
            .unwrap()
        );
        let mut bs = Bytes::from_static(&[0x05]);
        assert_eq!(
            BinlogValue::Set(5),
            read_value(
                &mut bs,
                &col(
                    ColumnType::String,
                    ColMeta::Str {
                        real_type: 0xf8,
                        len: 1
                    }
                ),
                &opts()
            )
            .unwrap()
        );
    }

    #[test]
    fn test_blob_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(4);
        buf.put_slice(b"blob");
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Bytes(Bytes::from_static(b"blob")),
            read_value(&mut bs, &col(ColumnType::Blob, ColMeta::PackLen(2)), &opts()).unwrap()
        );
    }

    #[test]
    fn test_geometry() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(3);
        buf.put_slice(&[0x01, 0x02, 0x03]);
        let mut bs = buf.freeze();
        assert_eq!(
            BinlogValue::Geometry(Bytes::from_static(&[0x01, 0x02, 0x03])),
            read_value(
                &mut bs,
                &col(ColumnType::Geometry, ColMeta::PackLen(4)),
                &opts()
            )
            .unwrap()
        );
    }

    #[test]
    fn test_overrun_is_error() {
        let mut bs = Bytes::from_static(&[0x05, 0x61]);
        assert!(read_value(&mut bs, &col(ColumnType::Varchar, ColMeta::MaxLen(10)), &opts())
            .is_err());
    }
}
