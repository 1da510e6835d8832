use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unsupported auth plugin: {0}")]
    UnsupportedAuthPlugin(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error {code} ({sqlstate}): {message}")]
    Server {
        code: u16,
        sqlstate: String,
        message: String,
    },
    #[error("binlog checksum mismatch: expected={0:08x}, actual={1:08x}")]
    Checksum(u32, u32),
    #[error("no table map for table id {0}")]
    MissingTableMap(u64),
    #[error("corrupt row image: {0}")]
    CorruptRowImage(String),
    #[error("unsupported binlog event: type_code={0}")]
    UnsupportedEvent(u8),
    #[error("invalid gtid: {0}")]
    GtidParse(String),
    #[error("canceled")]
    Canceled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("stream terminated: {0}")]
    Terminated(std::sync::Arc<Error>),
    #[error("address not found")]
    AddrNotFound,
    #[error("invalid command code: {0:#04x}")]
    InvalidCommandCode(u8),
    #[error("invalid column type code: {0:#04x}")]
    InvalidColumnTypeCode(u8),
    #[error("parse error: {0}")]
    Parse(#[from] myrepl_bytes::error::Error),
    #[error("utf8 string error: {0}")]
    Utf8String(#[from] std::string::FromUtf8Error),
    #[error("utf8 str error: {0}")]
    Utf8Str(#[from] std::str::Utf8Error),
    #[error("parse int error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

impl Error {
    /// whether a syncer may recover by reconnecting
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(_) | Error::DeadlineExceeded => true,
            // deadlocks, lock waits and connection counts clear up on retry
            Error::Server { code, .. } => matches!(code, 1040 | 1053 | 1205 | 1213 | 2006 | 2013),
            _ => false,
        }
    }
}
