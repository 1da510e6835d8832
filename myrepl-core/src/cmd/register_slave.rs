use crate::Command;
use bytes::{Bytes, BytesMut};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::convert::TryFrom;

/// COM_REGISTER_SLAVE: announce this connection as a replica
///
/// reference: https://dev.mysql.com/doc/internals/en/com-register-slave.html
#[derive(Debug, Clone)]
pub struct ComRegisterSlave {
    pub cmd: Command,
    pub server_id: u32,
    // 1-byte length prefixed strings
    pub hostname: String,
    pub user: String,
    pub password: String,
    pub port: u16,
    // ignored by modern servers
    pub replication_rank: u32,
    // 0 means use the master's own id
    pub master_id: u32,
}

impl ComRegisterSlave {
    pub fn new(server_id: u32) -> Self {
        ComRegisterSlave {
            cmd: Command::RegisterSlave,
            server_id,
            hostname: String::new(),
            user: String::new(),
            password: String::new(),
            port: 0,
            replication_rank: 0,
            master_id: 0,
        }
    }

    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl WriteToBytes for ComRegisterSlave {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.cmd.to_byte())?;
        len += out.write_le_u32(self.server_id)?;
        len += out.write_u8(self.hostname.len() as u8)?;
        len += out.write_bytes(self.hostname.as_bytes())?;
        len += out.write_u8(self.user.len() as u8)?;
        len += out.write_bytes(self.user.as_bytes())?;
        len += out.write_u8(self.password.len() as u8)?;
        len += out.write_bytes(self.password.as_bytes())?;
        len += out.write_le_u16(self.port)?;
        len += out.write_le_u32(self.replication_rank)?;
        len += out.write_le_u32(self.master_id)?;
        Ok(len)
    }
}

impl ReadFromBytes for ComRegisterSlave {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let cmd = input.read_u8()?;
        let cmd = Command::try_from(cmd).map_err(|_| {
            myrepl_bytes::error::Error::ConstraintError(format!(
                "invalid command code expected=0x15, actual={:02x}",
                cmd
            ))
        })?;
        let server_id = input.read_le_u32()?;
        let hostname_len = input.read_u8()?;
        let hostname = String::from_utf8_lossy(input.read_len(hostname_len as usize)?.as_ref())
            .into_owned();
        let user_len = input.read_u8()?;
        let user = String::from_utf8_lossy(input.read_len(user_len as usize)?.as_ref()).into_owned();
        let password_len = input.read_u8()?;
        let password = String::from_utf8_lossy(input.read_len(password_len as usize)?.as_ref())
            .into_owned();
        let port = input.read_le_u16()?;
        let replication_rank = input.read_le_u32()?;
        let master_id = input.read_le_u32()?;
        Ok(ComRegisterSlave {
            cmd,
            server_id,
            hostname,
            user,
            password,
            port,
            replication_rank,
            master_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_slave_roundtrip() {
        let reg = ComRegisterSlave::new(1001).hostname("replica-1").port(3307);
        let mut buf = BytesMut::new();
        reg.write_to(&mut buf).unwrap();
        assert_eq!(0x15, buf[0]);
        let decoded = ComRegisterSlave::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(1001, decoded.server_id);
        assert_eq!("replica-1", decoded.hostname);
        assert_eq!(3307, decoded.port);
        assert_eq!(0, decoded.master_id);
    }
}
