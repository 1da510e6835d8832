use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};

/// ROTATE_EVENT, points at the next binlog file
///
/// sent at the end of a file and artificially at the start of a dump
#[derive(Debug, Clone, PartialEq)]
pub struct RotateData {
    pub position: u64,
    pub next_binlog_filename: String,
}

impl ReadFromBytes for RotateData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let position = input.read_le_u64()?;
        let next_binlog_filename = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(RotateData {
            position,
            next_binlog_filename,
        })
    }
}

impl WriteToBytes for RotateData {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let mut len = 0;
        len += out.write_le_u64(self.position)?;
        len += out.write_bytes(self.next_binlog_filename.as_bytes())?;
        Ok(len)
    }
}
