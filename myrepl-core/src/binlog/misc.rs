//! small event bodies without structure worth a module of their own
use bytes::{Buf, Bytes};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};

/// HEARTBEAT_EVENT: liveness signal from an idle master
///
/// carries the current binlog filename, log_pos is zero and must not
/// advance the replica's position
#[derive(Debug, Clone)]
pub struct HeartbeatData {
    pub log_ident: String,
}

impl ReadFromBytes for HeartbeatData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let log_ident = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(HeartbeatData { log_ident })
    }
}

/// INTVAR_EVENT: LAST_INSERT_ID or INSERT_ID for statement replication
#[derive(Debug, Clone, Copy)]
pub struct IntvarData {
    pub int_type: u8,
    pub value: u64,
}

impl ReadFromBytes for IntvarData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let int_type = input.read_u8()?;
        let value = input.read_le_u64()?;
        Ok(IntvarData { int_type, value })
    }
}

/// ROWS_QUERY_EVENT / MARIADB_ANNOTATE_ROWS_EVENT: the original
/// statement text accompanying row events
#[derive(Debug, Clone)]
pub struct RowsQueryData {
    pub query: String,
}

impl ReadFromBytes for RowsQueryData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        // a 1-byte length precedes the text but the text may exceed
        // 255 bytes, the remainder of the event is authoritative
        input.read_u8()?;
        let query = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(RowsQueryData { query })
    }
}

/// MARIADB_BINLOG_CHECKPOINT_EVENT: oldest file still needed for recovery
#[derive(Debug, Clone)]
pub struct MariadbCheckpointData {
    pub filename: String,
}

impl ReadFromBytes for MariadbCheckpointData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let len = input.read_le_u32()?;
        let filename =
            String::from_utf8_lossy(input.read_len(len as usize)?.as_ref()).into_owned();
        Ok(MariadbCheckpointData { filename })
    }
}

/// an event kind the parser does not model, kept opaque
#[derive(Debug, Clone)]
pub struct UnknownData {
    pub type_code: u8,
    pub payload: Bytes,
}
