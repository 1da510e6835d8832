pub mod binlog;
pub mod cmd;
pub mod col;
pub mod decimal;
pub mod error;
pub mod flag;
pub mod gtid;
pub mod handshake;
pub mod packet;
pub mod resultset;
pub mod scramble;
mod util;

pub use crate::error::{Error, Result};

use std::convert::TryFrom;
use std::fmt;

/// command codes of the MySQL command phase
///
/// reference: https://dev.mysql.com/doc/internals/en/command-phase.html
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Sleep,
    Quit,
    InitDb,
    Query,
    FieldList,
    CreateDb,
    DropDb,
    Refresh,
    Shutdown,
    Statistics,
    ProcessInfo,
    Connect,
    ProcessKill,
    Debug,
    Ping,
    Time,
    DelayedInsert,
    ChangeUser,
    BinlogDump,
    TableDump,
    ConnectOut,
    RegisterSlave,
    StmtPrepare,
    StmtExecute,
    StmtSendLongData,
    StmtClose,
    StmtReset,
    SetOption,
    StmtFetch,
    Daemon,
    BinlogDumpGtid,
    ResetConnection,
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Sleep => 0x00,
            Command::Quit => 0x01,
            Command::InitDb => 0x02,
            Command::Query => 0x03,
            Command::FieldList => 0x04,
            Command::CreateDb => 0x05,
            Command::DropDb => 0x06,
            Command::Refresh => 0x07,
            Command::Shutdown => 0x08,
            Command::Statistics => 0x09,
            Command::ProcessInfo => 0x0a,
            Command::Connect => 0x0b,
            Command::ProcessKill => 0x0c,
            Command::Debug => 0x0d,
            Command::Ping => 0x0e,
            Command::Time => 0x0f,
            Command::DelayedInsert => 0x10,
            Command::ChangeUser => 0x11,
            Command::BinlogDump => 0x12,
            Command::TableDump => 0x13,
            Command::ConnectOut => 0x14,
            Command::RegisterSlave => 0x15,
            Command::StmtPrepare => 0x16,
            Command::StmtExecute => 0x17,
            Command::StmtSendLongData => 0x18,
            Command::StmtClose => 0x19,
            Command::StmtReset => 0x1a,
            Command::SetOption => 0x1b,
            Command::StmtFetch => 0x1c,
            Command::Daemon => 0x1d,
            Command::BinlogDumpGtid => 0x1e,
            Command::ResetConnection => 0x1f,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(src: u8) -> Result<Self> {
        let cmd = match src {
            0x00 => Command::Sleep,
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x05 => Command::CreateDb,
            0x06 => Command::DropDb,
            0x07 => Command::Refresh,
            0x08 => Command::Shutdown,
            0x09 => Command::Statistics,
            0x0a => Command::ProcessInfo,
            0x0b => Command::Connect,
            0x0c => Command::ProcessKill,
            0x0d => Command::Debug,
            0x0e => Command::Ping,
            0x0f => Command::Time,
            0x10 => Command::DelayedInsert,
            0x11 => Command::ChangeUser,
            0x12 => Command::BinlogDump,
            0x13 => Command::TableDump,
            0x14 => Command::ConnectOut,
            0x15 => Command::RegisterSlave,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1d => Command::Daemon,
            0x1e => Command::BinlogDumpGtid,
            0x1f => Command::ResetConnection,
            _ => return Err(Error::InvalidCommandCode(src)),
        };
        Ok(cmd)
    }
}

/// replication flavor, selects GTID and event dialect
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flavor {
    MySql,
    MariaDb,
}

impl Default for Flavor {
    fn default() -> Self {
        Flavor::MySql
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::MySql => write!(f, "mysql"),
            Flavor::MariaDb => write!(f, "mariadb"),
        }
    }
}

impl std::str::FromStr for Flavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql" => Ok(Flavor::MySql),
            "mariadb" => Ok(Flavor::MariaDb),
            other => Err(Error::Protocol(format!("unknown flavor: {}", other))),
        }
    }
}

/// a binlog file position
///
/// the offset points at the start of the next event to read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub name: String,
    pub pos: u32,
}

impl Position {
    pub fn new<S: Into<String>>(name: S, pos: u32) -> Self {
        Position {
            name: name.into(),
            pos,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.pos)
    }
}
