use bytes::{Bytes, BytesMut};
use myrepl_bytes::error::Result;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};

/// XID_EVENT, terminates a committed transaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XidData {
    pub xid: u64,
}

impl ReadFromBytes for XidData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let xid = input.read_le_u64()?;
        Ok(XidData { xid })
    }
}

impl WriteToBytes for XidData {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        out.write_le_u64(self.xid)
    }
}
