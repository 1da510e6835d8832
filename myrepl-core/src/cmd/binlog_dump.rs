use crate::gtid::GtidSet;
use crate::Command;
use bitflags::bitflags;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_BINLOG_DUMP: request the binlog stream from a file position
#[derive(Debug, Clone)]
pub struct ComBinlogDump {
    pub cmd: Command,
    pub binlog_pos: u32,
    pub flags: u16,
    pub server_id: u32,
    pub binlog_filename: String,
}

impl ComBinlogDump {
    pub fn binlog_pos(mut self, binlog_pos: u32) -> Self {
        self.binlog_pos = binlog_pos;
        self
    }

    pub fn binlog_filename<S: Into<String>>(mut self, binlog_filename: S) -> Self {
        self.binlog_filename = binlog_filename.into();
        self
    }

    pub fn server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    /// ask the master to answer EOF instead of blocking at log end
    pub fn non_block(mut self, non_block: bool) -> Self {
        self.flags = if non_block { 0x01 } else { 0x00 };
        self
    }
}

impl Default for ComBinlogDump {
    fn default() -> Self {
        ComBinlogDump {
            cmd: Command::BinlogDump,
            // 4 skips the magic number of the binlog file
            binlog_pos: 4,
            flags: 0,
            server_id: 0,
            binlog_filename: String::new(),
        }
    }
}

impl WriteToBytes for ComBinlogDump {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_le_u32(self.binlog_pos)?;
        len += out.write_le_u16(self.flags)?;
        len += out.write_le_u32(self.server_id)?;
        len += out.write_bytes(self.binlog_filename.as_bytes())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComBinlogDump {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x12, actual={:02x}",
                cmd
            ))
        })?;
        let binlog_pos = input.read_le_u32()?;
        let flags = input.read_le_u16()?;
        let server_id = input.read_le_u32()?;
        let binlog_filename = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(ComBinlogDump {
            cmd,
            binlog_pos,
            flags,
            server_id,
            binlog_filename,
        })
    }
}

bitflags! {
    pub struct BinlogDumpGtidFlags: u16 {
        const NON_BLOCK = 0x0001;
        const THROUGH_POSITION = 0x0002;
        const THROUGH_GTID = 0x0004;
    }
}

/// COM_BINLOG_DUMP_GTID: request the binlog stream from a GTID set
#[derive(Debug, Clone)]
pub struct ComBinlogDumpGtid {
    pub cmd: Command,
    pub flags: BinlogDumpGtidFlags,
    pub server_id: u32,
    // 4-byte length prefixed
    pub binlog_filename: String,
    pub binlog_pos: u64,
    // 4-byte length prefixed encoded gtid set
    pub gtid_set: GtidSet,
}

impl ComBinlogDumpGtid {
    pub fn server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn gtid_set(mut self, gtid_set: GtidSet) -> Self {
        self.flags.remove(BinlogDumpGtidFlags::THROUGH_POSITION);
        self.flags.insert(BinlogDumpGtidFlags::THROUGH_GTID);
        self.gtid_set = gtid_set;
        self
    }

    pub fn non_block(mut self, non_block: bool) -> Self {
        if non_block {
            self.flags.insert(BinlogDumpGtidFlags::NON_BLOCK);
        } else {
            self.flags.remove(BinlogDumpGtidFlags::NON_BLOCK);
        }
        self
    }
}

impl Default for ComBinlogDumpGtid {
    fn default() -> Self {
        ComBinlogDumpGtid {
            cmd: Command::BinlogDumpGtid,
            flags: BinlogDumpGtidFlags::THROUGH_GTID,
            server_id: 0,
            binlog_filename: String::new(),
            binlog_pos: 4,
            gtid_set: GtidSet::new(),
        }
    }
}

impl WriteToBytes for ComBinlogDumpGtid {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_le_u16(self.flags.bits())?;
        len += out.write_le_u32(self.server_id)?;
        len += out.write_le_u32(self.binlog_filename.len() as u32)?;
        len += out.write_bytes(self.binlog_filename.as_bytes())?;
        len += out.write_le_u64(self.binlog_pos)?;
        // the encoded set is always present, empty sets included
        len += out.write_le_u32(self.gtid_set.encoded_len() as u32)?;
        len += self.gtid_set.write_to(out)?;
        Ok(len)
    }
}

impl ReadFromBytes for ComBinlogDumpGtid {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x1e, actual={:02x}",
                cmd
            ))
        })?;
        let flags = input.read_le_u16()?;
        let flags = BinlogDumpGtidFlags::from_bits(flags).ok_or_else(|| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid binlog dump gtid flags {:04x}",
                flags
            ))
        })?;
        let server_id = input.read_le_u32()?;
        let filename_len = input.read_le_u32()?;
        let binlog_filename =
            String::from_utf8_lossy(input.read_len(filename_len as usize)?.as_ref()).into_owned();
        let binlog_pos = input.read_le_u64()?;
        let gtid_len = input.read_le_u32()?;
        let mut raw = input.read_len(gtid_len as usize)?;
        let gtid_set = GtidSet::read_from(&mut raw)?;
        Ok(ComBinlogDumpGtid {
            cmd,
            flags,
            server_id,
            binlog_filename,
            binlog_pos,
            gtid_set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binlog_dump_roundtrip() {
        let dump = ComBinlogDump::default()
            .binlog_filename("mysql-bin.000001")
            .binlog_pos(4)
            .non_block(true)
            .server_id(123);
        let mut buf = BytesMut::new();
        dump.write_to(&mut buf).unwrap();
        let decoded = ComBinlogDump::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(Command::BinlogDump, decoded.cmd);
        assert_eq!(0x01, decoded.flags);
        assert_eq!("mysql-bin.000001", decoded.binlog_filename);
        assert_eq!(4, decoded.binlog_pos);
        assert_eq!(123, decoded.server_id);
    }

    #[test]
    fn test_binlog_dump_gtid_roundtrip() {
        let set: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-5".parse().unwrap();
        let dump = ComBinlogDumpGtid::default()
            .server_id(123)
            .gtid_set(set.clone())
            .non_block(true);
        let mut buf = BytesMut::new();
        dump.write_to(&mut buf).unwrap();
        let decoded = ComBinlogDumpGtid::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(Command::BinlogDumpGtid, decoded.cmd);
        assert!(decoded
            .flags
            .contains(BinlogDumpGtidFlags::NON_BLOCK | BinlogDumpGtidFlags::THROUGH_GTID));
        assert_eq!(123, decoded.server_id);
        assert_eq!(4, decoded.binlog_pos);
        assert!(decoded.gtid_set.equal(&set));
    }
}
