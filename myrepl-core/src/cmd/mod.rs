//! command payloads of the command phase
//!
//! only the commands needed to act as a replica or as a minimal
//! query endpoint are modeled
mod binlog_dump;
mod field_list;
mod init_db;
mod query;
mod register_slave;
mod stmt;

pub use binlog_dump::{BinlogDumpGtidFlags, ComBinlogDump, ComBinlogDumpGtid};
pub use field_list::ComFieldList;
pub use init_db::ComInitDb;
pub use query::ComQuery;
pub use register_slave::ComRegisterSlave;
pub use stmt::{ComStmtClose, ComStmtExecute, ComStmtPrepare, StmtPrepareOk};

use crate::Command;
use bytes::BytesMut;
use myrepl_bytes::{WriteBytesExt, WriteToBytes};

macro_rules! single_byte_cmd {
    ($struct_name:ident, $enum_name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $struct_name {
            pub cmd: Command,
        }

        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    cmd: Command::$enum_name,
                }
            }
        }

        impl $struct_name {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl WriteToBytes for $struct_name {
            fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
                out.write_u8(self.cmd.to_byte())
            }
        }
    };
}

single_byte_cmd!(ComPing, Ping);
single_byte_cmd!(ComQuit, Quit);
single_byte_cmd!(ComResetConnection, ResetConnection);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_cmds() {
        let mut buf = BytesMut::new();
        ComPing::new().write_to(&mut buf).unwrap();
        ComQuit::new().write_to(&mut buf).unwrap();
        ComResetConnection::new().write_to(&mut buf).unwrap();
        assert_eq!(&[0x0e, 0x01, 0x1f][..], buf.as_ref());
    }
}
