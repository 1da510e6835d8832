use bitflags::bitflags;
use bytes::{Bytes, BytesMut};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};

/// byte length of the v4 common header
pub const EVENT_HEADER_LEN: usize = 19;

bitflags! {
    pub struct EventHeaderFlags: u16 {
        const BINLOG_IN_USE     = 0x0001;
        const FORCED_ROTATE     = 0x0002;
        const THREAD_SPECIFIC   = 0x0004;
        const SUPPRESS_USE      = 0x0008;
        const UPDATE_TABLE_MAP_VERSION = 0x0010;
        const ARTIFICIAL        = 0x0020;
        const RELAY_LOG         = 0x0040;
        const IGNORABLE         = 0x0080;
        const NO_FILTER         = 0x0100;
        const MTS_ISOLATE       = 0x0200;
    }
}

/// the 19-byte common header every v4 event starts with
///
/// timestamp 0:4, type_code 4:1, server_id 5:4,
/// event_size 9:4, log_pos 13:4, flags 17:2
#[derive(Debug, Clone)]
pub struct EventHeader {
    pub timestamp: u32,
    pub type_code: u8,
    pub server_id: u32,
    pub event_size: u32,
    // start offset of the next event, 0 for artificial events
    pub log_pos: u32,
    pub flags: EventHeaderFlags,
}

impl EventHeader {
    pub fn data_len(&self) -> u32 {
        self.event_size - EVENT_HEADER_LEN as u32
    }
}

impl ReadFromBytes for EventHeader {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let timestamp = input.read_le_u32()?;
        let type_code = input.read_u8()?;
        let server_id = input.read_le_u32()?;
        let event_size = input.read_le_u32()?;
        let log_pos = input.read_le_u32()?;
        let flags = input.read_le_u16()?;
        Ok(EventHeader {
            timestamp,
            type_code,
            server_id,
            event_size,
            log_pos,
            flags: EventHeaderFlags::from_bits_truncate(flags),
        })
    }
}

impl WriteToBytes for EventHeader {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let mut len = 0;
        len += out.write_le_u32(self.timestamp)?;
        len += out.write_u8(self.type_code)?;
        len += out.write_le_u32(self.server_id)?;
        len += out.write_le_u32(self.event_size)?;
        len += out.write_le_u32(self.log_pos)?;
        len += out.write_le_u16(self.flags.bits())?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = EventHeader {
            timestamp: 1_600_000_000,
            type_code: 16,
            server_id: 1,
            event_size: 31,
            log_pos: 154,
            flags: EventHeaderFlags::BINLOG_IN_USE,
        };
        let mut buf = BytesMut::new();
        let len = header.write_to(&mut buf).unwrap();
        assert_eq!(EVENT_HEADER_LEN, len);
        let decoded = EventHeader::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(16, decoded.type_code);
        assert_eq!(154, decoded.log_pos);
        assert_eq!(12, decoded.data_len());
    }
}
