use crate::Command;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_STMT_PREPARE: the statement text follows the command byte
#[derive(Debug, Clone)]
pub struct ComStmtPrepare {
    pub cmd: Command,
    pub query: String,
}

impl ComStmtPrepare {
    pub fn new<S: Into<String>>(query: S) -> Self {
        ComStmtPrepare {
            cmd: Command::StmtPrepare,
            query: query.into(),
        }
    }
}

impl WriteToBytes for ComStmtPrepare {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_bytes(self.query.as_bytes())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComStmtPrepare {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x16, actual={:02x}",
                cmd
            ))
        })?;
        let query = String::from_utf8_lossy(input.as_ref()).into_owned();
        input.advance(input.remaining());
        Ok(ComStmtPrepare { cmd, query })
    }
}

/// the first packet of a successful prepare response
///
/// reference: https://dev.mysql.com/doc/internals/en/com-stmt-prepare-response.html
#[derive(Debug, Clone, Copy)]
pub struct StmtPrepareOk {
    pub stmt_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

impl WriteToBytes for StmtPrepareOk {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(0x00)?;
        len += out.write_le_u32(self.stmt_id)?;
        len += out.write_le_u16(self.num_columns)?;
        len += out.write_le_u16(self.num_params)?;
        len += out.write_u8(0x00)?;
        len += out.write_le_u16(self.warnings)?;
        Ok(len)
    }
}

impl ReadFromBytes for StmtPrepareOk {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        input.read_u8()?;
        let stmt_id = input.read_le_u32()?;
        let num_columns = input.read_le_u16()?;
        let num_params = input.read_le_u16()?;
        input.read_u8()?;
        let warnings = input.read_le_u16()?;
        Ok(StmtPrepareOk {
            stmt_id,
            num_columns,
            num_params,
            warnings,
        })
    }
}

/// COM_STMT_EXECUTE
///
/// parameter values follow for statements with placeholders; the
/// fixed prefix is all a parameterless execute carries
#[derive(Debug, Clone)]
pub struct ComStmtExecute {
    pub cmd: Command,
    pub stmt_id: u32,
    pub flags: u8,
    pub iteration_count: u32,
    // raw parameter block, empty without placeholders
    pub params: Bytes,
}

impl ComStmtExecute {
    pub fn new(stmt_id: u32) -> Self {
        ComStmtExecute {
            cmd: Command::StmtExecute,
            stmt_id,
            flags: 0,
            iteration_count: 1,
            params: Bytes::new(),
        }
    }
}

impl WriteToBytes for ComStmtExecute {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_le_u32(self.stmt_id)?;
        len += out.write_u8(self.flags)?;
        len += out.write_le_u32(self.iteration_count)?;
        len += out.write_bytes(self.params.as_ref())?;
        Ok(len)
    }
}

impl ReadFromBytes for ComStmtExecute {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x17, actual={:02x}",
                cmd
            ))
        })?;
        let stmt_id = input.read_le_u32()?;
        let flags = input.read_u8()?;
        let iteration_count = input.read_le_u32()?;
        let params = input.split_to(input.remaining());
        Ok(ComStmtExecute {
            cmd,
            stmt_id,
            flags,
            iteration_count,
            params,
        })
    }
}

/// COM_STMT_CLOSE: no response follows
#[derive(Debug, Clone, Copy)]
pub struct ComStmtClose {
    pub cmd: Command,
    pub stmt_id: u32,
}

impl ComStmtClose {
    pub fn new(stmt_id: u32) -> Self {
        ComStmtClose {
            cmd: Command::StmtClose,
            stmt_id,
        }
    }
}

impl WriteToBytes for ComStmtClose {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_le_u32(self.stmt_id)?;
        Ok(len)
    }
}

impl ReadFromBytes for ComStmtClose {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x19, actual={:02x}",
                cmd
            ))
        })?;
        let stmt_id = input.read_le_u32()?;
        Ok(ComStmtClose { cmd, stmt_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_roundtrip() {
        let mut buf = BytesMut::new();
        ComStmtPrepare::new("select 1").write_to(&mut buf).unwrap();
        let decoded = ComStmtPrepare::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("select 1", decoded.query);
    }

    #[test]
    fn test_prepare_ok_roundtrip() {
        let ok = StmtPrepareOk {
            stmt_id: 7,
            num_columns: 1,
            num_params: 0,
            warnings: 0,
        };
        let mut buf = BytesMut::new();
        let len = ok.write_to(&mut buf).unwrap();
        assert_eq!(12, len);
        let decoded = StmtPrepareOk::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(7, decoded.stmt_id);
        assert_eq!(1, decoded.num_columns);
    }

    #[test]
    fn test_execute_roundtrip() {
        let mut buf = BytesMut::new();
        ComStmtExecute::new(7).write_to(&mut buf).unwrap();
        let decoded = ComStmtExecute::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(7, decoded.stmt_id);
        assert_eq!(1, decoded.iteration_count);
        assert!(decoded.params.is_empty());
    }

    #[test]
    fn test_close_roundtrip() {
        let mut buf = BytesMut::new();
        ComStmtClose::new(7).write_to(&mut buf).unwrap();
        let decoded = ComStmtClose::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(7, decoded.stmt_id);
    }
}
