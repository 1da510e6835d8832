use bytes::Bytes;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("incomplete input: {1:?}")]
    InputIncomplete(Bytes, Needed),
    #[error("constraint error: {0}")]
    ConstraintError(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unavailable output")]
    OutputUnavailable,
}

/// how many more bytes the reader needed
#[derive(Debug, Clone, PartialEq)]
pub enum Needed {
    Unknown,
    Size(usize),
}

impl Error {
    pub fn would_block(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::WouldBlock,
            _ => false,
        }
    }
}
