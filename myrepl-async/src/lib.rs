//! async I/O layer: client connection, binlog syncer, event streamer
//! and a minimal server endpoint, all on the smol runtime
pub mod auth;
pub mod conn;
pub mod server;
pub mod streamer;
pub mod syncer;
mod tls;

pub use crate::conn::{Conn, ConnOpts};
pub use crate::server::{
    CommandHandler, CredentialProvider, HandlerResult, ReplServer, ServerConn, ServerOpts,
    StaticCredentials,
};
pub use crate::streamer::BinlogStreamer;
pub use crate::syncer::{BinlogSyncer, StartFrom, SyncerConfig};
pub use crate::tls::TlsOpts;

pub use myrepl_core::error::{Error, Result};
