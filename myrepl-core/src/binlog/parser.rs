use super::fde::{ChecksumAlg, FormatDescriptionData};
use super::gtid_event::{GtidData, MariadbGtidData, MariadbGtidListData, PreviousGtidsData};
use super::header::{EventHeader, EVENT_HEADER_LEN};
use super::misc::{HeartbeatData, IntvarData, MariadbCheckpointData, RowsQueryData, UnknownData};
use super::query::QueryData;
use super::rotate::RotateData;
use super::rows::{
    read_update_rows, read_write_or_delete_rows, RowsDecodeOpts, RowsKind,
};
use super::table_map::{TableMap, TableMapData};
use super::xid::XidData;
use super::{Event, EventData, LogEventType};
use crate::error::{Error, Result};
use crate::util::checksum_crc32;
use bytes::Bytes;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};
use std::collections::HashMap;

/// parser configuration
#[derive(Debug, Clone)]
pub struct BinlogParserOpts {
    pub verify_checksum: bool,
    // deliver unmodeled events as opaque records instead of failing
    pub lax_unknown_events: bool,
    pub rows: RowsDecodeOpts,
}

impl Default for BinlogParserOpts {
    fn default() -> Self {
        BinlogParserOpts {
            verify_checksum: true,
            lax_unknown_events: false,
            rows: RowsDecodeOpts::default(),
        }
    }
}

/// stateful v4 binlog event parser
///
/// owns the cached format description and the table map cache; both
/// are mutated only from the read path feeding events in
#[derive(Debug, Default)]
pub struct BinlogParser {
    opts: BinlogParserOpts,
    fde: Option<FormatDescriptionData>,
    table_maps: HashMap<u64, TableMap>,
}

impl BinlogParser {
    pub fn new(opts: BinlogParserOpts) -> Self {
        BinlogParser {
            opts,
            fde: None,
            table_maps: HashMap::new(),
        }
    }

    pub fn format_description(&self) -> Option<&FormatDescriptionData> {
        self.fde.as_ref()
    }

    pub fn table_map(&self, table_id: u64) -> Option<&TableMap> {
        self.table_maps.get(&table_id)
    }

    pub fn checksum_enabled(&self) -> bool {
        matches!(
            self.fde.as_ref().map(|f| f.checksum_alg),
            Some(ChecksumAlg::Crc32)
        )
    }

    /// forget all cached state, called when a dump restarts
    pub fn reset(&mut self) {
        self.fde = None;
        self.table_maps.clear();
    }

    /// decode one event, raw bytes start at the 19-byte common header
    pub fn parse(&mut self, mut raw: Bytes) -> Result<Event> {
        if raw.len() < EVENT_HEADER_LEN {
            return Err(Error::Protocol(format!(
                "event shorter than its header: {} bytes",
                raw.len()
            )));
        }
        let event_type = LogEventType::from(raw[4]);

        // the format description tells the checksum truth for the rest
        // of the file, and describes its own trailer
        if event_type == LogEventType::FormatDescription {
            let mut body = raw.clone();
            let header = EventHeader::read_from(&mut body)?;
            let fde = FormatDescriptionData::read_from(&mut body)?;
            if fde.checksum_alg == ChecksumAlg::Crc32 && self.opts.verify_checksum {
                verify_crc32(&raw)?;
            }
            self.fde = Some(fde.clone());
            return Ok(Event {
                header,
                data: EventData::FormatDescription(fde),
            });
        }

        if self.checksum_enabled() {
            if raw.len() < EVENT_HEADER_LEN + 4 {
                return Err(Error::Protocol(
                    "event shorter than its checksum trailer".to_owned(),
                ));
            }
            if self.opts.verify_checksum {
                verify_crc32(&raw)?;
            }
            raw.truncate(raw.len() - 4);
        }

        let mut body = raw;
        let header = EventHeader::read_from(&mut body)?;
        let data = match event_type {
            LogEventType::Query => EventData::Query(QueryData::read_from(&mut body)?),
            LogEventType::Stop => EventData::Stop,
            LogEventType::Rotate => {
                // rotation invalidates every table map
                self.table_maps.clear();
                EventData::Rotate(RotateData::read_from(&mut body)?)
            }
            LogEventType::Intvar => EventData::Intvar(IntvarData::read_from(&mut body)?),
            LogEventType::Xid => EventData::Xid(XidData::read_from(&mut body)?),
            LogEventType::TableMap => {
                let data = TableMapData::read_from(&mut body)?;
                self.table_maps
                    .insert(data.table_id, data.table_map.clone());
                EventData::TableMap(data)
            }
            LogEventType::WriteRowsV1 => self.parse_rows(&mut body, RowsKind::Write, false)?,
            LogEventType::UpdateRowsV1 => self.parse_rows(&mut body, RowsKind::Update, false)?,
            LogEventType::DeleteRowsV1 => self.parse_rows(&mut body, RowsKind::Delete, false)?,
            LogEventType::WriteRowsV2 => self.parse_rows(&mut body, RowsKind::Write, true)?,
            LogEventType::UpdateRowsV2 => self.parse_rows(&mut body, RowsKind::Update, true)?,
            LogEventType::DeleteRowsV2 => self.parse_rows(&mut body, RowsKind::Delete, true)?,
            LogEventType::Gtid => EventData::Gtid(GtidData::read_from(&mut body)?),
            LogEventType::AnonymousGtid => {
                EventData::AnonymousGtid(GtidData::read_from(&mut body)?)
            }
            LogEventType::PreviousGtids => {
                EventData::PreviousGtids(PreviousGtidsData::read_from(&mut body)?)
            }
            LogEventType::Heartbeat => EventData::Heartbeat(HeartbeatData::read_from(&mut body)?),
            LogEventType::RowsQuery => EventData::RowsQuery(RowsQueryData::read_from(&mut body)?),
            LogEventType::MariadbGtid => {
                EventData::MariadbGtid(MariadbGtidData::read_from(&mut body)?)
            }
            LogEventType::MariadbGtidList => {
                EventData::MariadbGtidList(MariadbGtidListData::read_from(&mut body)?)
            }
            LogEventType::MariadbBinlogCheckpoint => {
                EventData::MariadbBinlogCheckpoint(MariadbCheckpointData::read_from(&mut body)?)
            }
            LogEventType::MariadbAnnotateRows => {
                EventData::MariadbAnnotateRows(RowsQueryData::read_from(&mut body)?)
            }
            _ => {
                if self.opts.lax_unknown_events {
                    log::warn!(
                        "delivering unmodeled event type {} as opaque record",
                        header.type_code
                    );
                    EventData::Unknown(UnknownData {
                        type_code: header.type_code,
                        payload: body.clone(),
                    })
                } else {
                    return Err(Error::UnsupportedEvent(header.type_code));
                }
            }
        };
        Ok(Event { header, data })
    }

    fn parse_rows(&mut self, body: &mut Bytes, kind: RowsKind, v2: bool) -> Result<EventData> {
        let table_id = body.clone().read_le_u48()?;
        let table_map = self
            .table_maps
            .get(&table_id)
            .ok_or(Error::MissingTableMap(table_id))?;
        let data = match kind {
            RowsKind::Update => {
                EventData::UpdateRows(read_update_rows(body, v2, table_map, &self.opts.rows)?)
            }
            RowsKind::Write => EventData::WriteRows(read_write_or_delete_rows(
                body,
                kind,
                v2,
                table_map,
                &self.opts.rows,
            )?),
            RowsKind::Delete => EventData::DeleteRows(read_write_or_delete_rows(
                body,
                kind,
                v2,
                table_map,
                &self.opts.rows,
            )?),
        };
        Ok(data)
    }
}

fn verify_crc32(raw: &Bytes) -> Result<()> {
    let n = raw.len();
    let expected = u32::from_le_bytes([raw[n - 4], raw[n - 3], raw[n - 2], raw[n - 1]]);
    let actual = checksum_crc32(&raw[..n - 4]);
    if expected != actual {
        return Err(Error::Checksum(expected, actual));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::fde::sample_fde_body;
    use crate::binlog::query::sample_query_body;
    use crate::binlog::table_map::sample_table_map_body;
    use bytes::{BufMut, BytesMut};

    // assemble a full event: header, body, optional crc trailer
    fn make_event(type_code: u8, body: &[u8], crc: bool, log_pos: u32) -> Bytes {
        let total = EVENT_HEADER_LEN + body.len() + if crc { 4 } else { 0 };
        let mut buf = BytesMut::new();
        buf.put_u32_le(1_600_000_000);
        buf.put_u8(type_code);
        buf.put_u32_le(1);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(log_pos);
        buf.put_u16_le(0);
        buf.put_slice(body);
        if crc {
            let sum = checksum_crc32(buf.as_ref());
            buf.put_u32_le(sum);
        }
        buf.freeze()
    }

    // an FDE event whose embedded self-checksum is valid
    fn make_fde_event(checksum: bool) -> Bytes {
        if !checksum {
            let body = sample_fde_body("5.5.50", false);
            return make_event(15, body.as_ref(), false, 120);
        }
        let body = sample_fde_body("5.7.30-log", true);
        // recompute the crc stored in the event's last four bytes
        let total = EVENT_HEADER_LEN + body.len();
        let mut buf = BytesMut::new();
        buf.put_u32_le(1_600_000_000);
        buf.put_u8(15);
        buf.put_u32_le(1);
        buf.put_u32_le(total as u32);
        buf.put_u32_le(120);
        buf.put_u16_le(0);
        buf.put_slice(body.as_ref());
        let n = buf.len();
        let sum = checksum_crc32(&buf[..n - 4]);
        buf[n - 4..].copy_from_slice(&sum.to_le_bytes());
        buf.freeze()
    }

    fn parser() -> BinlogParser {
        BinlogParser::new(BinlogParserOpts::default())
    }

    #[test]
    fn test_fde_establishes_checksum() {
        let mut p = parser();
        let event = p.parse(make_fde_event(true)).unwrap();
        assert!(matches!(event.data, EventData::FormatDescription(_)));
        assert!(p.checksum_enabled());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut p = parser();
        p.parse(make_fde_event(true)).unwrap();
        let mut raw = BytesMut::from(make_event(16, &42u64.to_le_bytes(), true, 200).as_ref());
        let n = raw.len();
        raw[n - 1] ^= 0xff;
        let err = p.parse(raw.freeze()).unwrap_err();
        assert!(matches!(err, Error::Checksum(_, _)));
    }

    #[test]
    fn test_missing_table_map() {
        let mut p = parser();
        p.parse(make_fde_event(false)).unwrap();
        let mut rows_body = BytesMut::new();
        rows_body.put_slice(&99u64.to_le_bytes()[..6]);
        rows_body.put_u16_le(1);
        rows_body.put_u16_le(2);
        rows_body.put_u8(2);
        rows_body.put_u8(0b11);
        let err = p.parse(make_event(30, rows_body.as_ref(), false, 300)).unwrap_err();
        assert!(matches!(err, Error::MissingTableMap(99)));
    }

    #[test]
    fn test_unknown_event_strict_and_lax() {
        let mut p = parser();
        p.parse(make_fde_event(false)).unwrap();
        // VIEW_CHANGE_EVENT is not modeled
        let err = p.parse(make_event(37, b"whatever", false, 300)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEvent(37)));

        let mut p = BinlogParser::new(BinlogParserOpts {
            lax_unknown_events: true,
            ..BinlogParserOpts::default()
        });
        p.parse(make_fde_event(false)).unwrap();
        let event = p.parse(make_event(37, b"whatever", false, 300)).unwrap();
        match event.data {
            EventData::Unknown(u) => {
                assert_eq!(37, u.type_code);
                assert_eq!(&b"whatever"[..], u.payload.as_ref());
            }
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_rotate_clears_table_maps() {
        let mut p = parser();
        p.parse(make_fde_event(false)).unwrap();
        p.parse(make_event(19, sample_table_map_body(113).as_ref(), false, 200))
            .unwrap();
        assert!(p.table_map(113).is_some());
        let mut rotate_body = BytesMut::new();
        rotate_body.put_u64_le(4);
        rotate_body.put_slice(b"mysql-bin.000002");
        let event = p.parse(make_event(4, rotate_body.as_ref(), false, 0)).unwrap();
        match event.data {
            EventData::Rotate(r) => {
                assert_eq!(4, r.position);
                assert_eq!("mysql-bin.000002", r.next_binlog_filename);
            }
            other => panic!("expected rotate, got {:?}", other),
        }
        assert!(p.table_map(113).is_none());
    }

    // a realistic transaction stream: FDE with CRC32, then table map,
    // write rows, xid and rotate, all carrying valid checksums
    #[test]
    fn test_checksummed_stream_in_order() {
        let mut p = parser();
        let mut log_pos = 120;
        let fde = p.parse(make_fde_event(true)).unwrap();
        assert!(matches!(fde.data, EventData::FormatDescription(_)));

        log_pos += 100;
        let tme = p
            .parse(make_event(19, sample_table_map_body(113).as_ref(), true, log_pos))
            .unwrap();
        assert!(matches!(tme.data, EventData::TableMap(_)));

        log_pos += 100;
        let mut rows_body = BytesMut::new();
        rows_body.put_slice(&113u64.to_le_bytes()[..6]);
        rows_body.put_u16_le(1);
        rows_body.put_u16_le(2);
        rows_body.put_u8(2);
        rows_body.put_u8(0b11);
        rows_body.put_u8(0x00);
        rows_body.put_slice(&[0x01, 0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c']);
        let wre = p
            .parse(make_event(30, rows_body.as_ref(), true, log_pos))
            .unwrap();
        match &wre.data {
            EventData::WriteRows(rows) => {
                use crate::binlog::value::BinlogValue;
                assert_eq!(1, rows.rows.len());
                assert_eq!(
                    vec![
                        BinlogValue::Long(1),
                        BinlogValue::Bytes(Bytes::from_static(b"abc"))
                    ],
                    rows.rows[0].0
                );
            }
            other => panic!("expected write rows, got {:?}", other),
        }

        log_pos += 100;
        let xe = p
            .parse(make_event(16, &7u64.to_le_bytes(), true, log_pos))
            .unwrap();
        assert!(matches!(xe.data, EventData::Xid(XidData { xid: 7 })));

        let mut rotate_body = BytesMut::new();
        rotate_body.put_u64_le(4);
        rotate_body.put_slice(b"mysql-bin.000002");
        let re = p.parse(make_event(4, rotate_body.as_ref(), true, 0)).unwrap();
        assert!(matches!(re.data, EventData::Rotate(_)));
    }

    #[test]
    fn test_query_event_via_parser() {
        let mut p = parser();
        p.parse(make_fde_event(false)).unwrap();
        let event = p
            .parse(make_event(2, sample_query_body("test", "BEGIN").as_ref(), false, 250))
            .unwrap();
        match event.data {
            EventData::Query(q) => assert!(q.is_begin()),
            other => panic!("expected query, got {:?}", other),
        }
    }
}
