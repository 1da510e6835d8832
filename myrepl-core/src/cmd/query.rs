use crate::Command;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_QUERY: the statement text follows the command byte
#[derive(Debug, Clone)]
pub struct ComQuery {
    pub cmd: Command,
    pub query: String,
}

impl ComQuery {
    pub fn new<S: Into<String>>(query: S) -> Self {
        ComQuery {
            cmd: Command::Query,
            query: query.into(),
        }
    }
}

impl WriteToBytes for ComQuery {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_bytes(self.query.as_bytes())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComQuery {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x03, actual={:02x}",
                cmd
            ))
        })?;
        let query = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(ComQuery { cmd, query })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_roundtrip() {
        let mut buf = BytesMut::new();
        ComQuery::new("select 1").write_to(&mut buf).unwrap();
        assert_eq!(0x03, buf[0]);
        let decoded = ComQuery::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("select 1", decoded.query);
    }
}
