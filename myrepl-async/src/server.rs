//! minimal server endpoint: enough of the server side of the
//! protocol to masquerade as a MySQL endpoint behind a handler
use crate::tls::server_acceptor;
use async_net::{TcpListener, TcpStream};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use futures_rustls::TlsAcceptor;
use myrepl_bytes::future::{AsyncReadBytesExt, AsyncWriteBytesExt};
use myrepl_bytes::my::{LenEncInt, LenEncStr};
use myrepl_bytes::{ReadFromBytes, WriteToBytes};
use myrepl_core::cmd::{
    ComFieldList, ComInitDb, ComQuery, ComStmtClose, ComStmtExecute, ComStmtPrepare, StmtPrepareOk,
};
use myrepl_core::col::ColumnDefinition;
use myrepl_core::error::{Error, Result};
use myrepl_core::flag::{CapabilityFlags, StatusFlags};
use myrepl_core::handshake::{AuthSwitchRequest, HandshakeClientResponse41, InitialHandshake};
use myrepl_core::packet::{
    EofPacket, ErrPacket, OkPacket, WriteToBytesWithContext, MAX_PAYLOAD_LEN,
};
use myrepl_core::resultset::{ResultSet, TextRow};
use myrepl_core::scramble::scramble_native;
use myrepl_core::Command;
use rand::Rng;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// looks up the stored password for a user; implementations must be
/// safe for concurrent lookup
pub trait CredentialProvider: Send + Sync {
    fn password(&self, user: &str) -> Option<String>;
}

/// fixed user/password table
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user<U: Into<String>, P: Into<String>>(mut self, user: U, password: P) -> Self {
        self.users.insert(user.into(), password.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn password(&self, user: &str) -> Option<String> {
        self.users.get(user).cloned()
    }
}

/// what a command handler answers with
#[derive(Debug, Clone)]
pub enum HandlerResult {
    Ok,
    ResultSet(ResultSet),
    Err {
        code: u16,
        sqlstate: String,
        message: String,
    },
}

/// application logic behind the endpoint
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn on_query(&self, query: &str) -> HandlerResult;

    async fn on_init_db(&self, _schema: &str) -> HandlerResult {
        HandlerResult::Ok
    }

    async fn on_field_list(&self, _table: &str, _wildcard: &str) -> Vec<ColumnDefinition> {
        Vec::new()
    }
}

/// server endpoint options
pub struct ServerOpts {
    pub version: String,
    pub credentials: Arc<dyn CredentialProvider>,
    /// offer TLS; with no certificate configured an ephemeral
    /// self-signed one is generated
    pub tls: bool,
    pub cert_pem: Option<String>,
    pub key_pem: Option<String>,
}

impl ServerOpts {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        ServerOpts {
            version: "8.0.33-myrepl".to_owned(),
            credentials,
            tls: false,
            cert_pem: None,
            key_pem: None,
        }
    }
}

/// a listening endpoint accepting client connections
pub struct ReplServer {
    listener: TcpListener,
    opts: ServerOpts,
    acceptor: Option<TlsAcceptor>,
    next_connection_id: AtomicU32,
}

impl ReplServer {
    pub async fn bind(addr: &str, opts: ServerOpts) -> Result<ReplServer> {
        let acceptor = if opts.tls {
            Some(server_acceptor(
                opts.cert_pem.as_deref(),
                opts.key_pem.as_deref(),
            )?)
        } else {
            None
        };
        let listener = TcpListener::bind(addr).await?;
        Ok(ReplServer {
            listener,
            opts,
            acceptor,
            next_connection_id: AtomicU32::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// accept one connection and run the server side of the
    /// handshake, including authentication
    pub async fn accept(&self) -> Result<ServerConn> {
        let (tcp, peer) = self.listener.accept().await?;
        log::debug!("accepted connection from {}", peer);
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let mut conn = ServerConn {
            stream: ServerStream::Plain(tcp.clone()),
            tcp,
            pkt_nr: 0,
            cap_flags: CapabilityFlags::empty(),
            username: String::new(),
            schema: String::new(),
            connection_id,
            stmts: HashMap::new(),
            next_stmt_id: 1,
        };
        conn.handshake(&self.opts, self.acceptor.as_ref()).await?;
        Ok(conn)
    }
}

pub(crate) enum ServerStream {
    Plain(TcpStream),
    Tls(Box<futures_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for ServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(s) => Pin::new(s).poll_close(cx),
            ServerStream::Tls(s) => Pin::new(s.as_mut()).poll_close(cx),
        }
    }
}

/// one authenticated inbound connection
pub struct ServerConn {
    stream: ServerStream,
    tcp: TcpStream,
    pkt_nr: u8,
    cap_flags: CapabilityFlags,
    pub username: String,
    pub schema: String,
    connection_id: u32,
    // prepared statement texts by id
    stmts: HashMap<u32, String>,
    next_stmt_id: u32,
}

impl ServerConn {
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    async fn handshake(
        &mut self,
        opts: &ServerOpts,
        acceptor: Option<&TlsAcceptor>,
    ) -> Result<()> {
        let scramble = random_scramble();
        let mut caps = CapabilityFlags::PROTOCOL_41
            | CapabilityFlags::LONG_PASSWORD
            | CapabilityFlags::SECURE_CONNECTION
            | CapabilityFlags::PLUGIN_AUTH
            | CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CapabilityFlags::TRANSACTIONS
            | CapabilityFlags::CONNECT_WITH_DB
            | CapabilityFlags::DEPRECATE_EOF;
        if acceptor.is_some() {
            caps.insert(CapabilityFlags::SSL);
        }
        let mut part2 = Vec::from(&scramble[8..]);
        part2.push(0);
        let greeting = InitialHandshake {
            protocol_version: 10,
            server_version: Bytes::copy_from_slice(opts.version.as_bytes()),
            connection_id: self.connection_id,
            auth_plugin_data_1: Bytes::copy_from_slice(&scramble[..8]),
            charset: 45,
            status_flags: StatusFlags::STATUS_AUTOCOMMIT.bits(),
            capability_flags: caps.bits(),
            auth_plugin_data_length: 21,
            auth_plugin_data_2: Bytes::from(part2),
            auth_plugin_name: Bytes::from_static(b"mysql_native_password"),
        };
        self.send(greeting).await?;

        let mut msg = self.recv().await?;
        // a 32-byte response with the SSL bit set is an SslRequest
        if msg.len() == 32 {
            let client_caps = CapabilityFlags::from_bits_truncate(u32::from_le_bytes([
                msg[0], msg[1], msg[2], msg[3],
            ]));
            if client_caps.contains(CapabilityFlags::SSL) {
                let acceptor = acceptor.ok_or_else(|| {
                    Error::Tls("client requested TLS but none is configured".to_owned())
                })?;
                let tls = acceptor
                    .accept(self.tcp.clone())
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                self.stream = ServerStream::Tls(Box::new(tls));
                log::debug!("connection {} upgraded to TLS", self.connection_id);
                msg = self.recv().await?;
            }
        }
        let response = HandshakeClientResponse41::read_from(&mut msg)?;
        self.cap_flags = caps & response.capability_flags;
        self.username = response.username.clone();
        self.schema = response.database.clone();

        let mut auth_response = response.auth_response;
        // clients answering with another plugin are switched to the
        // default and asked again with the same scramble
        if !response.auth_plugin_name.is_empty()
            && response.auth_plugin_name != "mysql_native_password"
        {
            let mut data = Vec::from(&scramble[..]);
            data.push(0);
            let switch = AuthSwitchRequest {
                header: 0xfe,
                plugin_name: Bytes::from_static(b"mysql_native_password"),
                auth_plugin_data: Bytes::from(data),
            };
            self.send(switch).await?;
            auth_response = Vec::from(self.recv().await?.as_ref());
        }

        let authorized = match opts.credentials.password(&self.username) {
            Some(stored) if stored.is_empty() => auth_response.is_empty(),
            Some(stored) => match scramble_native(&scramble, stored.as_bytes()) {
                Some(expected) => auth_response.as_slice() == expected.as_ref(),
                None => false,
            },
            None => false,
        };
        if !authorized {
            let err = ErrPacket::new(
                1045,
                "28000",
                format!("Access denied for user '{}'", self.username),
            );
            self.send_err(err).await?;
            return Err(Error::Auth(format!(
                "access denied for user '{}'",
                self.username
            )));
        }
        self.send_ok(OkPacket {
            header: 0x00,
            status_flags: StatusFlags::STATUS_AUTOCOMMIT,
            ..OkPacket::default()
        })
        .await?;
        log::debug!("connection {} authenticated as {}", self.connection_id, self.username);
        Ok(())
    }

    /// dispatch commands to the handler until the client quits
    pub async fn serve<H: CommandHandler>(mut self, handler: &H) -> Result<()> {
        loop {
            self.pkt_nr = 0;
            let mut msg = match self.recv().await {
                Ok(msg) => msg,
                // a vanished client is a normal way to end a session
                Err(Error::Io(_)) => return Ok(()),
                Err(e) => return Err(e),
            };
            if msg.is_empty() {
                return Err(Error::Protocol("empty command packet".to_owned()));
            }
            let cmd = Command::try_from(msg[0]);
            match cmd {
                Ok(Command::Quit) => return Ok(()),
                Ok(Command::Ping) => {
                    self.send_ok(OkPacket {
                        status_flags: StatusFlags::STATUS_AUTOCOMMIT,
                        ..OkPacket::default()
                    })
                    .await?
                }
                Ok(Command::Query) => {
                    let query = ComQuery::read_from(&mut msg)?;
                    let result = handler.on_query(&query.query).await;
                    self.send_handler_result(result).await?;
                }
                Ok(Command::InitDb) => {
                    let init = ComInitDb::read_from(&mut msg)?;
                    let result = handler.on_init_db(&init.schema).await;
                    if let HandlerResult::Ok = result {
                        self.schema = init.schema;
                    }
                    self.send_handler_result(result).await?;
                }
                Ok(Command::FieldList) => {
                    let req = ComFieldList::read_from(&mut msg)?;
                    let defs = handler.on_field_list(&req.table, &req.field_wildcard).await;
                    for def in defs {
                        let mut buf = BytesMut::new();
                        def.write_to(&mut buf)?;
                        self.send(buf.freeze()).await?;
                    }
                    self.send_terminator().await?;
                }
                Ok(Command::StmtPrepare) => {
                    let prepare = ComStmtPrepare::read_from(&mut msg)?;
                    // placeholders would need the binary parameter
                    // codec, a minimal endpoint declines them
                    if prepare.query.contains('?') {
                        self.send_err(ErrPacket::new(
                            1295,
                            "HY000",
                            "This command is not supported in the prepared statement protocol yet"
                                .to_owned(),
                        ))
                        .await?;
                        continue;
                    }
                    let stmt_id = self.next_stmt_id;
                    self.next_stmt_id = self.next_stmt_id.wrapping_add(1);
                    self.stmts.insert(stmt_id, prepare.query);
                    let mut buf = BytesMut::new();
                    StmtPrepareOk {
                        stmt_id,
                        num_columns: 0,
                        num_params: 0,
                        warnings: 0,
                    }
                    .write_to(&mut buf)?;
                    self.send(buf.freeze()).await?;
                }
                Ok(Command::StmtExecute) => {
                    let execute = ComStmtExecute::read_from(&mut msg)?;
                    match self.stmts.get(&execute.stmt_id).cloned() {
                        Some(query) => {
                            let result = handler.on_query(&query).await;
                            self.send_stmt_result(result).await?;
                        }
                        None => {
                            self.send_err(ErrPacket::new(
                                1243,
                                "HY000",
                                format!("Unknown prepared statement handler ({})", execute.stmt_id),
                            ))
                            .await?;
                        }
                    }
                }
                Ok(Command::StmtClose) => {
                    // no response is sent for a close
                    let close = ComStmtClose::read_from(&mut msg)?;
                    self.stmts.remove(&close.stmt_id);
                }
                _ => {
                    self.send_err(ErrPacket::new(
                        1047,
                        "08S01",
                        "Unknown command".to_owned(),
                    ))
                    .await?;
                }
            }
        }
    }

    async fn send_handler_result(&mut self, result: HandlerResult) -> Result<()> {
        match result {
            HandlerResult::Ok => {
                self.send_ok(OkPacket {
                    status_flags: StatusFlags::STATUS_AUTOCOMMIT,
                    ..OkPacket::default()
                })
                .await
            }
            HandlerResult::Err {
                code,
                sqlstate,
                message,
            } => self.send_err(ErrPacket::new(code, &sqlstate, message)).await,
            HandlerResult::ResultSet(rs) => self.send_result_set(rs).await,
        }
    }

    /// column count, definitions, EOF unless deprecated, rows, terminator
    async fn send_result_set(&mut self, rs: ResultSet) -> Result<()> {
        let mut buf = BytesMut::new();
        LenEncInt::from(rs.cols.len() as u64).write_to(&mut buf)?;
        self.send(buf.freeze()).await?;
        for col in rs.cols {
            let mut buf = BytesMut::new();
            col.write_to(&mut buf)?;
            self.send(buf.freeze()).await?;
        }
        if !self.cap_flags.contains(CapabilityFlags::DEPRECATE_EOF) {
            let mut buf = BytesMut::new();
            EofPacket::new(StatusFlags::STATUS_AUTOCOMMIT)
                .write_with_ctx(&mut buf, &self.cap_flags)?;
            self.send(buf.freeze()).await?;
        }
        for row in rs.rows {
            let mut buf = BytesMut::new();
            row.write_to(&mut buf)?;
            self.send(buf.freeze()).await?;
        }
        self.send_terminator().await
    }

    /// binary protocol response of a statement execute
    async fn send_stmt_result(&mut self, result: HandlerResult) -> Result<()> {
        let rs = match result {
            HandlerResult::Ok => {
                return self
                    .send_ok(OkPacket {
                        status_flags: StatusFlags::STATUS_AUTOCOMMIT,
                        ..OkPacket::default()
                    })
                    .await
            }
            HandlerResult::Err {
                code,
                sqlstate,
                message,
            } => return self.send_err(ErrPacket::new(code, &sqlstate, message)).await,
            HandlerResult::ResultSet(rs) => rs,
        };
        let n_cols = rs.cols.len();
        let mut buf = BytesMut::new();
        LenEncInt::from(n_cols as u64).write_to(&mut buf)?;
        self.send(buf.freeze()).await?;
        for col in rs.cols {
            let mut buf = BytesMut::new();
            col.write_to(&mut buf)?;
            self.send(buf.freeze()).await?;
        }
        if !self.cap_flags.contains(CapabilityFlags::DEPRECATE_EOF) {
            let mut buf = BytesMut::new();
            EofPacket::new(StatusFlags::STATUS_AUTOCOMMIT)
                .write_with_ctx(&mut buf, &self.cap_flags)?;
            self.send(buf.freeze()).await?;
        }
        for row in rs.rows {
            let mut buf = BytesMut::new();
            write_binary_row(&row, n_cols, &mut buf)?;
            self.send(buf.freeze()).await?;
        }
        self.send_terminator().await
    }

    /// with DEPRECATE_EOF the trailer is an OK packet wearing the
    /// 0xfe header, otherwise a plain EOF packet
    async fn send_terminator(&mut self) -> Result<()> {
        let mut buf = BytesMut::new();
        if self.cap_flags.contains(CapabilityFlags::DEPRECATE_EOF) {
            OkPacket {
                header: 0xfe,
                status_flags: StatusFlags::STATUS_AUTOCOMMIT,
                ..OkPacket::default()
            }
            .write_with_ctx(&mut buf, &self.cap_flags)?;
        } else {
            EofPacket::new(StatusFlags::STATUS_AUTOCOMMIT)
                .write_with_ctx(&mut buf, &self.cap_flags)?;
        }
        self.send(buf.freeze()).await
    }

    async fn send_ok(&mut self, ok: OkPacket) -> Result<()> {
        let mut buf = BytesMut::new();
        ok.write_with_ctx(&mut buf, &self.cap_flags)?;
        self.send(buf.freeze()).await
    }

    async fn send_err(&mut self, err: ErrPacket) -> Result<()> {
        let mut buf = BytesMut::new();
        err.write_with_ctx(&mut buf, &self.cap_flags)?;
        self.send(buf.freeze()).await
    }

    async fn recv(&mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        loop {
            let payload_len = self.stream.read_le_u24().await.map_err(crate::conn::io_err)?;
            let seq_id = self.stream.read_u8().await.map_err(crate::conn::io_err)?;
            if seq_id != self.pkt_nr {
                return Err(Error::Protocol(format!(
                    "packet out of order: got seq {}, expected {}",
                    seq_id, self.pkt_nr
                )));
            }
            self.pkt_nr = self.pkt_nr.wrapping_add(1);
            self.stream
                .read_len_out(payload_len as usize, &mut buf)
                .await
                .map_err(crate::conn::io_err)?;
            if (payload_len as usize) < MAX_PAYLOAD_LEN {
                break;
            }
        }
        Ok(buf.freeze())
    }

    async fn send<T: WriteToBytes>(&mut self, msg: T) -> Result<()> {
        let mut buf = BytesMut::new();
        msg.write_to(&mut buf)?;
        let mut chunk_len = 0;
        for chunk in buf.as_ref().chunks(MAX_PAYLOAD_LEN) {
            chunk_len = chunk.len();
            self.stream
                .write_le_u24(chunk_len as u32)
                .await
                .map_err(crate::conn::io_err)?;
            self.stream
                .write_u8(self.pkt_nr)
                .await
                .map_err(crate::conn::io_err)?;
            self.stream.write_all(chunk).await.map_err(Error::Io)?;
            self.pkt_nr = self.pkt_nr.wrapping_add(1);
        }
        if chunk_len == MAX_PAYLOAD_LEN {
            self.stream.write_le_u24(0).await.map_err(crate::conn::io_err)?;
            self.stream
                .write_u8(self.pkt_nr)
                .await
                .map_err(crate::conn::io_err)?;
            self.pkt_nr = self.pkt_nr.wrapping_add(1);
        }
        self.stream.flush().await.map_err(Error::Io)?;
        Ok(())
    }
}

/// binary protocol row: 0x00 header, null bitmap with a 2-bit offset,
/// then the present values; handler cells are text so every column
/// encodes as a length-coded string
fn write_binary_row(row: &TextRow, n_cols: usize, buf: &mut BytesMut) -> Result<()> {
    use myrepl_bytes::WriteBytesExt;

    buf.write_u8(0x00)?;
    let mut bitmap = vec![0u8; (n_cols + 2 + 7) / 8];
    for (i, cell) in row.0.iter().enumerate() {
        if cell.is_none() {
            bitmap[(i + 2) / 8] |= 1 << ((i + 2) % 8);
        }
    }
    buf.write_bytes(&bitmap)?;
    for cell in row.0.iter().flatten() {
        LenEncStr::Bytes(cell.clone()).write_to(buf)?;
    }
    Ok(())
}

/// 20 printable random bytes, NUL-free so the wire form stays simple
fn random_scramble() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut out = [0u8; 20];
    for b in out.iter_mut() {
        *b = rng.gen_range(0x21..0x7f);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{Conn, ConnOpts};
    use bytes::Bytes;
    use myrepl_core::resultset::TextRow;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn on_query(&self, query: &str) -> HandlerResult {
            if query.starts_with("fail") {
                return HandlerResult::Err {
                    code: 1064,
                    sqlstate: "42000".to_owned(),
                    message: "syntax error".to_owned(),
                };
            }
            HandlerResult::ResultSet(ResultSet {
                cols: vec![ColumnDefinition::text("echo", "value")],
                rows: vec![TextRow(vec![Some(Bytes::copy_from_slice(
                    query.as_bytes(),
                ))])],
            })
        }
    }

    async fn start_server() -> std::net::SocketAddr {
        let creds = Arc::new(StaticCredentials::new().with_user("repl", "secret"));
        let server = ReplServer::bind("127.0.0.1:0", ServerOpts::new(creds))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        smol::spawn(async move {
            while let Ok(conn) = server.accept().await {
                smol::spawn(async move {
                    let _ = conn.serve(&EchoHandler).await;
                })
                .detach();
            }
        })
        .detach();
        addr
    }

    async fn connect(addr: std::net::SocketAddr, user: &str, password: &str) -> Result<Conn> {
        let mut conn = Conn::connect(&addr.ip().to_string(), addr.port()).await?;
        let opts = ConnOpts::new(user, password);
        conn.handshake(&addr.ip().to_string(), &opts).await?;
        Ok(conn)
    }

    #[smol_potat::test]
    async fn test_handshake_and_query_roundtrip() {
        let addr = start_server().await;
        let mut conn = connect(addr, "repl", "secret").await.unwrap();
        conn.ping().await.unwrap();
        let rs = conn.query_text("select 1").await.unwrap();
        assert_eq!(1, rs.cols.len());
        assert_eq!("value", rs.cols[0].name);
        assert_eq!(Some("select 1".to_owned()), rs.scalar());
    }

    #[smol_potat::test]
    async fn test_handler_error_surfaces() {
        let addr = start_server().await;
        let mut conn = connect(addr, "repl", "secret").await.unwrap();
        let err = conn.query_text("fail now").await.unwrap_err();
        match err {
            Error::Server { code, .. } => assert_eq!(1064, code),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[smol_potat::test]
    async fn test_bad_password_rejected() {
        let addr = start_server().await;
        let err = connect(addr, "repl", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[smol_potat::test]
    async fn test_unknown_user_rejected() {
        let addr = start_server().await;
        let err = connect(addr, "nobody", "secret").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
