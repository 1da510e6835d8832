//! binlog event decoding
//!
//! the layout of every event is described by the MySQL internals
//! reference, covering server versions 5.5 through 8.0 plus the
//! MariaDB 10 extensions
mod fde;
mod gtid_event;
mod header;
mod jsonb;
mod misc;
mod parser;
mod query;
mod rotate;
mod rows;
mod table_map;
mod value;
mod xid;

pub use fde::{ChecksumAlg, FormatDescriptionData};
pub use gtid_event::{GtidData, MariadbGtidData, MariadbGtidListData, PreviousGtidsData};
pub use header::{EventHeader, EventHeaderFlags, EVENT_HEADER_LEN};
pub use jsonb::decode_jsonb;
pub use misc::{HeartbeatData, IntvarData, MariadbCheckpointData, RowsQueryData, UnknownData};
pub use parser::{BinlogParser, BinlogParserOpts};
pub use query::{QueryData, QueryStatusVar};
pub use rotate::RotateData;
pub use rows::{Row, RowsData, RowsDecodeOpts, RowsKind, UpdateRow, UpdateRowsData};
pub use table_map::{ColDef, ColMeta, TableMap, TableMapData};
pub use value::{BinlogValue, MyTime};
pub use xid::XidData;

/// event type codes
///
/// 0-38 per the MySQL reference, 160+ are MariaDB extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEventType {
    Unknown,
    StartV3,
    Query,
    Stop,
    Rotate,
    Intvar,
    Load,
    Slave,
    CreateFile,
    AppendBlock,
    ExecLoad,
    DeleteFile,
    NewLoad,
    Rand,
    UserVar,
    FormatDescription,
    Xid,
    BeginLoadQuery,
    ExecuteLoadQuery,
    TableMap,
    WriteRowsV0,
    UpdateRowsV0,
    DeleteRowsV0,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Incident,
    Heartbeat,
    Ignorable,
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    TransactionContext,
    ViewChange,
    XaPrepare,
    MariadbAnnotateRows,
    MariadbBinlogCheckpoint,
    MariadbGtid,
    MariadbGtidList,
    Invalid,
}

impl From<u8> for LogEventType {
    fn from(code: u8) -> LogEventType {
        match code {
            0 => LogEventType::Unknown,
            1 => LogEventType::StartV3,
            2 => LogEventType::Query,
            3 => LogEventType::Stop,
            4 => LogEventType::Rotate,
            5 => LogEventType::Intvar,
            6 => LogEventType::Load,
            7 => LogEventType::Slave,
            8 => LogEventType::CreateFile,
            9 => LogEventType::AppendBlock,
            10 => LogEventType::ExecLoad,
            11 => LogEventType::DeleteFile,
            12 => LogEventType::NewLoad,
            13 => LogEventType::Rand,
            14 => LogEventType::UserVar,
            15 => LogEventType::FormatDescription,
            16 => LogEventType::Xid,
            17 => LogEventType::BeginLoadQuery,
            18 => LogEventType::ExecuteLoadQuery,
            19 => LogEventType::TableMap,
            // 20-22 were used by 5.1.0 to 5.1.17 only
            20 => LogEventType::WriteRowsV0,
            21 => LogEventType::UpdateRowsV0,
            22 => LogEventType::DeleteRowsV0,
            // 23-25 used by 5.1.18 to 5.6.x
            23 => LogEventType::WriteRowsV1,
            24 => LogEventType::UpdateRowsV1,
            25 => LogEventType::DeleteRowsV1,
            26 => LogEventType::Incident,
            27 => LogEventType::Heartbeat,
            28 => LogEventType::Ignorable,
            29 => LogEventType::RowsQuery,
            // 30-32 used since 5.6.x
            30 => LogEventType::WriteRowsV2,
            31 => LogEventType::UpdateRowsV2,
            32 => LogEventType::DeleteRowsV2,
            33 => LogEventType::Gtid,
            34 => LogEventType::AnonymousGtid,
            35 => LogEventType::PreviousGtids,
            36 => LogEventType::TransactionContext,
            37 => LogEventType::ViewChange,
            38 => LogEventType::XaPrepare,
            160 => LogEventType::MariadbAnnotateRows,
            161 => LogEventType::MariadbBinlogCheckpoint,
            162 => LogEventType::MariadbGtid,
            163 => LogEventType::MariadbGtidList,
            _ => LogEventType::Invalid,
        }
    }
}

/// a decoded binlog event: common header plus the typed body
#[derive(Debug, Clone)]
pub struct Event {
    pub header: EventHeader,
    pub data: EventData,
}

impl Event {
    pub fn event_type(&self) -> LogEventType {
        LogEventType::from(self.header.type_code)
    }
}

/// typed event bodies, one variant per supported kind
///
/// consumers match on the variant; anything the parser does not model
/// arrives as Unknown only when lax decoding is configured
#[derive(Debug, Clone)]
pub enum EventData {
    FormatDescription(FormatDescriptionData),
    Query(QueryData),
    Stop,
    Rotate(RotateData),
    Intvar(IntvarData),
    Xid(XidData),
    TableMap(TableMapData),
    WriteRows(RowsData),
    UpdateRows(UpdateRowsData),
    DeleteRows(RowsData),
    Gtid(GtidData),
    AnonymousGtid(GtidData),
    PreviousGtids(PreviousGtidsData),
    Heartbeat(HeartbeatData),
    RowsQuery(RowsQueryData),
    MariadbGtid(MariadbGtidData),
    MariadbGtidList(MariadbGtidListData),
    MariadbBinlogCheckpoint(MariadbCheckpointData),
    MariadbAnnotateRows(RowsQueryData),
    Unknown(UnknownData),
}
