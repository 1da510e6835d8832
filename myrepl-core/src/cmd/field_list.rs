use crate::Command;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_FIELD_LIST: list columns of a table, with an optional wildcard
#[derive(Debug, Clone)]
pub struct ComFieldList {
    pub cmd: Command,
    pub table: String,
    pub field_wildcard: String,
}

impl ComFieldList {
    pub fn new<S: Into<String>>(table: S) -> Self {
        ComFieldList {
            cmd: Command::FieldList,
            table: table.into(),
            field_wildcard: String::new(),
        }
    }

    pub fn field_wildcard<S: Into<String>>(mut self, wildcard: S) -> Self {
        self.field_wildcard = wildcard.into();
        self
    }
}

impl WriteToBytes for ComFieldList {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_bytes(self.table.as_bytes())?;
        len += out.write_u8(0)?;
        len += out.write_bytes(self.field_wildcard.as_bytes())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComFieldList {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x04, actual={:02x}",
                cmd
            ))
        })?;
        let table = String::from_utf8_lossy(input.read_until(0, false)?.as_ref()).into_owned();
        let field_wildcard = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(ComFieldList {
            cmd,
            table,
            field_wildcard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_list_roundtrip() {
        let mut buf = BytesMut::new();
        ComFieldList::new("t").field_wildcard("%").write_to(&mut buf).unwrap();
        let decoded = ComFieldList::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("t", decoded.table);
        assert_eq!("%", decoded.field_wildcard);
    }
}
