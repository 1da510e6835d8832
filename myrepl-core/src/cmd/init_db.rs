use crate::Command;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_INIT_DB: switch the default schema
#[derive(Debug, Clone)]
pub struct ComInitDb {
    pub cmd: Command,
    pub schema: String,
}

impl ComInitDb {
    pub fn new<S: Into<String>>(schema: S) -> Self {
        ComInitDb {
            cmd: Command::InitDb,
            schema: schema.into(),
        }
    }
}

impl WriteToBytes for ComInitDb {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_bytes(self.schema.as_bytes())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComInitDb {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x02, actual={:02x}",
                cmd
            ))
        })?;
        let schema = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(ComInitDb { cmd, schema })
    }
}
