use bytes::{Buf, Bytes};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};

/// QUERY_EVENT: statement based replication and DDL
///
/// BEGIN, COMMIT, SAVEPOINT and schema changes all flow through here
#[derive(Debug, Clone)]
pub struct QueryData {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    // raw status variable block, decode on demand
    pub status_vars: Bytes,
    pub schema: String,
    pub query: String,
}

impl QueryData {
    pub fn parse_status_vars(&self) -> Result<Vec<QueryStatusVar>> {
        let mut input = self.status_vars.clone();
        let mut vars = Vec::new();
        while input.has_remaining() {
            let code = input.read_u8()?;
            let var = match code {
                0x00 => QueryStatusVar::Flags2(input.read_le_u32()?),
                0x01 => QueryStatusVar::SqlMode(input.read_le_u64()?),
                0x02 => {
                    // 1-byte length, string, trailing NUL
                    let len = input.read_u8()?;
                    let s = input.read_len(len as usize)?;
                    input.read_u8()?;
                    QueryStatusVar::Catalog(String::from_utf8_lossy(s.as_ref()).into_owned())
                }
                0x03 => {
                    let auto_increment_increment = input.read_le_u16()?;
                    let auto_increment_offset = input.read_le_u16()?;
                    QueryStatusVar::AutoIncrement {
                        increment: auto_increment_increment,
                        offset: auto_increment_offset,
                    }
                }
                0x04 => {
                    let client = input.read_le_u16()?;
                    let collation_connection = input.read_le_u16()?;
                    let collation_server = input.read_le_u16()?;
                    QueryStatusVar::Charset {
                        client,
                        collation_connection,
                        collation_server,
                    }
                }
                0x05 => {
                    let len = input.read_u8()?;
                    let s = input.read_len(len as usize)?;
                    QueryStatusVar::TimeZone(String::from_utf8_lossy(s.as_ref()).into_owned())
                }
                0x06 => {
                    let len = input.read_u8()?;
                    let s = input.read_len(len as usize)?;
                    QueryStatusVar::CatalogNz(String::from_utf8_lossy(s.as_ref()).into_owned())
                }
                // remaining codes are not needed here, their lengths
                // are unknowable without a full table so stop early
                _ => {
                    input.advance(input.remaining());
                    break;
                }
            };
            vars.push(var);
        }
        Ok(vars)
    }

    /// true for the BEGIN marker starting every row-based transaction
    pub fn is_begin(&self) -> bool {
        self.query.eq_ignore_ascii_case("BEGIN")
    }

    pub fn is_commit(&self) -> bool {
        self.query.eq_ignore_ascii_case("COMMIT")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryStatusVar {
    Flags2(u32),
    SqlMode(u64),
    Catalog(String),
    AutoIncrement { increment: u16, offset: u16 },
    Charset {
        client: u16,
        collation_connection: u16,
        collation_server: u16,
    },
    TimeZone(String),
    CatalogNz(String),
}

impl ReadFromBytes for QueryData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let thread_id = input.read_le_u32()?;
        let exec_time = input.read_le_u32()?;
        let schema_len = input.read_u8()?;
        let error_code = input.read_le_u16()?;
        let status_vars_len = input.read_le_u16()?;
        let status_vars = input.read_len(status_vars_len as usize)?;
        let schema = input.read_len(schema_len as usize)?;
        let schema = String::from_utf8_lossy(schema.as_ref()).into_owned();
        // NUL between schema and query
        input.read_u8()?;
        let query = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(QueryData {
            thread_id,
            exec_time,
            error_code,
            status_vars,
            schema,
            query,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_query_body(schema: &str, query: &str) -> Bytes {
    use bytes::{BufMut, BytesMut};

    let mut buf = BytesMut::new();
    buf.put_u32_le(12);
    buf.put_u32_le(0);
    buf.put_u8(schema.len() as u8);
    buf.put_u16_le(0);
    // status vars: flags2 + sql mode
    let mut vars = BytesMut::new();
    vars.put_u8(0x00);
    vars.put_u32_le(0);
    vars.put_u8(0x01);
    vars.put_u64_le(0x4000_0000);
    buf.put_u16_le(vars.len() as u16);
    buf.put_slice(vars.as_ref());
    buf.put_slice(schema.as_bytes());
    buf.put_u8(0);
    buf.put_slice(query.as_bytes());
    buf.freeze()
}
