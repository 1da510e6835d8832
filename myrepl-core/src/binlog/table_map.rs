use crate::col::ColumnType;
use crate::util::bitmap_index;
use bytes::Bytes;
use myrepl_bytes::error::{Error, Result};
use myrepl_bytes::my::ReadMyEnc;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};
use smol_str::SmolStr;
use std::convert::TryFrom;

/// width-dependent metadata of one column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColMeta {
    None,
    // float/double/blob/geometry/json: byte width of the length prefix
    // or of the value itself
    PackLen(u8),
    // varchar: max length decides a 1 or 2 byte prefix
    MaxLen(u16),
    Bit { bits: u8, bytes: u8 },
    Decimal { precision: u8, scale: u8 },
    // string family, ENUM and SET collapse into STRING on the wire
    Str { real_type: u8, len: u8 },
    // fractional second precision 0-6
    Fsp(u8),
}

/// one column as described by a TABLE_MAP_EVENT
#[derive(Debug, Clone)]
pub struct ColDef {
    pub col_type: ColumnType,
    pub meta: ColMeta,
    pub nullable: bool,
}

/// the schema snapshot a row event decodes against
///
/// valid until the next ROTATE_EVENT or a replacing TABLE_MAP_EVENT
/// with the same table id
#[derive(Debug, Clone)]
pub struct TableMap {
    pub table_id: u64,
    pub schema_name: SmolStr,
    pub table_name: SmolStr,
    pub cols: Vec<ColDef>,
}

impl TableMap {
    pub fn col_count(&self) -> usize {
        self.cols.len()
    }
}

/// TABLE_MAP_EVENT
///
/// reference: https://dev.mysql.com/doc/internals/en/table-map-event.html
#[derive(Debug, Clone)]
pub struct TableMapData {
    pub table_id: u64,
    pub flags: u16,
    pub table_map: TableMap,
}

impl ReadFromBytes for TableMapData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let table_id = input.read_le_u48()?;
        let flags = input.read_le_u16()?;
        let schema_name_len = input.read_u8()?;
        let schema_name = input.read_len(schema_name_len as usize)?;
        input.read_len(1)?;
        let table_name_len = input.read_u8()?;
        let table_name = input.read_len(table_name_len as usize)?;
        input.read_len(1)?;
        let col_cnt = input
            .read_len_enc_int()?
            .to_u64()
            .ok_or_else(|| Error::ConstraintError("invalid column count".to_owned()))?
            as usize;
        let col_types = input.read_len(col_cnt)?;
        let meta_len = input
            .read_len_enc_int()?
            .to_u64()
            .ok_or_else(|| Error::ConstraintError("invalid metadata length".to_owned()))?
            as usize;
        let mut metas = input.read_len(meta_len)?;
        let null_bitmap = input.read_len((col_cnt + 7) / 8)?;

        let mut cols = Vec::with_capacity(col_cnt);
        for i in 0..col_cnt {
            let col_type = ColumnType::try_from(col_types[i]).map_err(|_| {
                Error::ConstraintError(format!("invalid column type {:#04x}", col_types[i]))
            })?;
            let meta = read_col_meta(col_type, &mut metas)?;
            cols.push(ColDef {
                col_type,
                meta,
                nullable: bitmap_index(null_bitmap.as_ref(), i),
            });
        }
        let table_map = TableMap {
            table_id,
            schema_name: SmolStr::from(String::from_utf8_lossy(schema_name.as_ref()).as_ref()),
            table_name: SmolStr::from(String::from_utf8_lossy(table_name.as_ref()).as_ref()),
            cols,
        };
        Ok(TableMapData {
            table_id,
            flags,
            table_map,
        })
    }
}

fn read_col_meta(col_type: ColumnType, metas: &mut Bytes) -> Result<ColMeta> {
    let meta = match col_type {
        ColumnType::Float
        | ColumnType::Double
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Blob
        | ColumnType::Json
        | ColumnType::Geometry => ColMeta::PackLen(metas.read_u8()?),
        ColumnType::Varchar | ColumnType::VarString => ColMeta::MaxLen(metas.read_le_u16()?),
        ColumnType::Bit => {
            let bits = metas.read_u8()?;
            let bytes = metas.read_u8()?;
            ColMeta::Bit { bits, bytes }
        }
        ColumnType::NewDecimal | ColumnType::Decimal => {
            let precision = metas.read_u8()?;
            let scale = metas.read_u8()?;
            ColMeta::Decimal { precision, scale }
        }
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            let real_type = metas.read_u8()?;
            let len = metas.read_u8()?;
            ColMeta::Str { real_type, len }
        }
        ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => {
            ColMeta::Fsp(metas.read_u8()?)
        }
        _ => ColMeta::None,
    };
    Ok(meta)
}

// TABLE_MAP body for test.t(id INT, name VARCHAR(10))
#[cfg(test)]
pub(crate) fn sample_table_map_body(table_id: u64) -> Bytes {
    use bytes::{BufMut, BytesMut};

    let mut buf = BytesMut::new();
    buf.put_slice(&table_id.to_le_bytes()[..6]);
    buf.put_u16_le(1);
    buf.put_u8(4);
    buf.put_slice(b"test");
    buf.put_u8(0);
    buf.put_u8(1);
    buf.put_slice(b"t");
    buf.put_u8(0);
    buf.put_u8(2);
    buf.put_u8(0x03); // LONG
    buf.put_u8(0x0f); // VARCHAR
    buf.put_u8(2); // metadata length
    buf.put_u16_le(40); // varchar max length (10 chars utf8mb4)
    buf.put_u8(0b0000_0010); // name is nullable
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_map_decode() {
        let mut body = sample_table_map_body(113);
        let data = TableMapData::read_from(&mut body).unwrap();
        assert_eq!(113, data.table_id);
        assert_eq!("test", data.table_map.schema_name);
        assert_eq!("t", data.table_map.table_name);
        assert_eq!(2, data.table_map.col_count());
        let id = &data.table_map.cols[0];
        assert_eq!(ColumnType::Long, id.col_type);
        assert_eq!(ColMeta::None, id.meta);
        assert!(!id.nullable);
        let name = &data.table_map.cols[1];
        assert_eq!(ColumnType::Varchar, name.col_type);
        assert_eq!(ColMeta::MaxLen(40), name.meta);
        assert!(name.nullable);
    }
}
