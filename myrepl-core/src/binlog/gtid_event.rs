//! GTID related events of both dialects
use crate::gtid::{GtidSet, MariadbGtid, MariadbGtidSet};
use bytes::{Buf, Bytes};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};
use uuid::Uuid;

/// GTID_EVENT / ANONYMOUS_GTID_EVENT (MySQL)
///
/// reference: https://github.com/mysql/mysql-server/blob/8.0/libbinlogevents/include/control_events.h
#[derive(Debug, Clone)]
pub struct GtidData {
    pub commit_flag: u8,
    pub sid: Uuid,
    pub gno: u64,
    // logical timestamps, absent before 5.7.4
    pub ts_type: u8,
    pub last_committed: u64,
    pub sequence_number: u64,
}

impl ReadFromBytes for GtidData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let commit_flag = input.read_u8()?;
        let raw = input.read_len(16)?;
        let mut sid_bytes = [0u8; 16];
        sid_bytes.copy_from_slice(raw.as_ref());
        let sid = Uuid::from_bytes(sid_bytes);
        let gno = input.read_le_u64()?;
        let (ts_type, last_committed, sequence_number) = if input.remaining() >= 17 {
            (
                input.read_u8()?,
                input.read_le_u64()?,
                input.read_le_u64()?,
            )
        } else {
            (0, 0, 0)
        };
        Ok(GtidData {
            commit_flag,
            sid,
            gno,
            ts_type,
            last_committed,
            sequence_number,
        })
    }
}

/// PREVIOUS_GTIDS_EVENT: transactions contained in earlier binlogs
#[derive(Debug, Clone)]
pub struct PreviousGtidsData {
    pub gtid_set: GtidSet,
}

impl ReadFromBytes for PreviousGtidsData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let gtid_set = GtidSet::read_from(input)?;
        Ok(PreviousGtidsData { gtid_set })
    }
}

/// MARIADB_GTID_EVENT
///
/// the domain completes the gtid together with the header's server_id
#[derive(Debug, Clone)]
pub struct MariadbGtidData {
    pub seq_no: u64,
    pub domain_id: u32,
    pub flags: u8,
}

impl MariadbGtidData {
    pub fn gtid(&self, server_id: u32) -> MariadbGtid {
        MariadbGtid {
            domain_id: self.domain_id,
            server_id,
            seq_no: self.seq_no,
        }
    }

    /// FL_STANDALONE: not followed by a COMMIT/XID
    pub fn is_standalone(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

impl ReadFromBytes for MariadbGtidData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let seq_no = input.read_le_u64()?;
        let domain_id = input.read_le_u32()?;
        let flags = input.read_u8()?;
        // 6 reserved bytes follow, older servers omit them
        if input.remaining() >= 6 {
            input.read_len(6)?;
        }
        Ok(MariadbGtidData {
            seq_no,
            domain_id,
            flags,
        })
    }
}

/// MARIADB_GTID_LIST_EVENT: state at the start of the binlog file
#[derive(Debug, Clone)]
pub struct MariadbGtidListData {
    pub gtid_set: MariadbGtidSet,
}

impl ReadFromBytes for MariadbGtidListData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        // lower 28 bits count, upper 4 bits flags
        let count_and_flags = input.read_le_u32()?;
        let count = count_and_flags & 0x0fff_ffff;
        let mut gtid_set = MariadbGtidSet::new();
        for _ in 0..count {
            let domain_id = input.read_le_u32()?;
            let server_id = input.read_le_u32()?;
            let seq_no = input.read_le_u64()?;
            gtid_set.update(MariadbGtid {
                domain_id,
                server_id,
                seq_no,
            });
        }
        Ok(MariadbGtidListData { gtid_set })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_gtid_data() {
        let sid = Uuid::parse_str("de278ad0-2106-11e4-9f8e-6edd0ca20947").unwrap();
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_slice(sid.as_bytes());
        buf.put_u64_le(42);
        buf.put_u8(2);
        buf.put_u64_le(10);
        buf.put_u64_le(11);
        let data = GtidData::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(1, data.commit_flag);
        assert_eq!(sid, data.sid);
        assert_eq!(42, data.gno);
        assert_eq!(10, data.last_committed);
        assert_eq!(11, data.sequence_number);
    }

    #[test]
    fn test_gtid_data_without_timestamps() {
        let sid = Uuid::parse_str("de278ad0-2106-11e4-9f8e-6edd0ca20947").unwrap();
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_slice(sid.as_bytes());
        buf.put_u64_le(7);
        let data = GtidData::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(7, data.gno);
        assert_eq!(0, data.last_committed);
    }

    #[test]
    fn test_previous_gtids() {
        let set: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2".parse().unwrap();
        let mut encoded = set.encode();
        let data = PreviousGtidsData::read_from(&mut encoded).unwrap();
        assert!(data.gtid_set.equal(&set));
    }

    #[test]
    fn test_mariadb_gtid() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(100);
        buf.put_u32_le(0);
        buf.put_u8(0x01);
        buf.put_slice(&[0u8; 6]);
        let data = MariadbGtidData::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(100, data.seq_no);
        assert_eq!(0, data.domain_id);
        assert!(data.is_standalone());
        assert_eq!("0-1-100", data.gtid(1).to_string());
    }

    #[test]
    fn test_mariadb_gtid_list() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_u32_le(0);
        buf.put_u32_le(1);
        buf.put_u64_le(100);
        buf.put_u32_le(1);
        buf.put_u32_le(2);
        buf.put_u64_le(50);
        let data = MariadbGtidListData::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("0-1-100,1-2-50", data.gtid_set.to_string());
    }
}
