use crate::auth::{rsa_encrypt_password, AuthPlugin};
use crate::tls::{client_connector, server_name, TlsOpts};
use async_net::TcpStream;
use bytes::{Buf, Bytes, BytesMut};
use futures::future::{self, Either};
use futures::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use myrepl_bytes::future::{AsyncReadBytesExt, AsyncWriteBytesExt};
use myrepl_bytes::my::ReadMyEnc;
use myrepl_bytes::{ReadFromBytes, ReadFromBytesWithContext, WriteToBytes};
use myrepl_core::cmd::{ComPing, ComQuery, ComQuit};
use myrepl_core::col::ColumnDefinition;
use myrepl_core::error::{Error, Result};
use myrepl_core::flag::{CapabilityFlags, StatusFlags};
use myrepl_core::handshake::{HandshakeClientResponse41, InitialHandshake, SslRequest};
use myrepl_core::packet::{ErrPacket, HandshakeMessage, Message, MAX_PAYLOAD_LEN};
use myrepl_core::resultset::{ResultSet, TextRow};
use serde_derive::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// plain or TLS-wrapped socket
pub(crate) enum NetStream {
    Plain(TcpStream),
    Tls(Box<futures_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_close(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_close(cx),
        }
    }
}

/// connection options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnOpts {
    pub username: String,
    pub password: String,
    pub database: String,
    /// collation id sent in the handshake, 45 is utf8mb4_general_ci
    pub charset: u8,
    /// applied to every socket read, None or zero disables
    pub read_timeout: Option<Duration>,
    pub tls: Option<TlsOpts>,
}

impl ConnOpts {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        ConnOpts {
            username: username.into(),
            password: password.into(),
            charset: 45,
            ..ConnOpts::default()
        }
    }
}

/// socket-level byte errors surface as I/O errors, a short read on
/// the wire means the peer went away
pub(crate) fn io_err(e: myrepl_bytes::error::Error) -> Error {
    match e {
        myrepl_bytes::error::Error::Io(io) => Error::Io(io),
        myrepl_bytes::error::Error::InputIncomplete(_, _)
        | myrepl_bytes::error::Error::OutputUnavailable => Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        )),
        other => Error::Parse(other),
    }
}

/// run a fallible future against an optional deadline
pub(crate) async fn timed<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(d) if !d.is_zero() => {
            futures::pin_mut!(fut);
            match future::select(fut, smol::Timer::after(d)).await {
                Either::Left((r, _)) => r,
                Either::Right(_) => Err(Error::DeadlineExceeded),
            }
        }
        _ => fut.await,
    }
}

/// a client connection to a MySQL compatible server
///
/// not safe for concurrent commands, callers serialize access
pub struct Conn {
    stream: NetStream,
    // raw handle kept for shutdown from another task
    tcp: TcpStream,
    pub(crate) cap_flags: CapabilityFlags,
    pkt_nr: u8,
    pub(crate) server_status: StatusFlags,
    pub(crate) server_version: String,
    connection_id: u32,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("connection_id", &self.connection_id)
            .field("server_version", &self.server_version)
            .field("pkt_nr", &self.pkt_nr)
            .finish()
    }
}

impl Conn {
    /// open the socket; the protocol handshake is a separate step
    pub async fn connect(host: &str, port: u16) -> Result<Conn> {
        let tcp = TcpStream::connect((host, port)).await?;
        log::debug!("connected to {}:{}", host, port);
        Ok(Conn {
            stream: NetStream::Plain(tcp.clone()),
            tcp,
            cap_flags: CapabilityFlags::empty(),
            pkt_nr: 0,
            server_status: StatusFlags::empty(),
            server_version: String::new(),
            connection_id: 0,
            read_timeout: None,
        })
    }

    /// perform the connection phase: capability negotiation, optional
    /// TLS upgrade and authentication
    pub async fn handshake(&mut self, host: &str, opts: &ConnOpts) -> Result<()> {
        self.read_timeout = opts.read_timeout;
        let mut msg = self.recv_msg().await?;
        let handshake = InitialHandshake::read_from(&mut msg)?;
        if handshake.protocol_version != 10 {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {}",
                handshake.protocol_version
            )));
        }
        self.server_version =
            String::from_utf8_lossy(handshake.server_version.as_ref()).into_owned();
        self.connection_id = handshake.connection_id;
        log::debug!(
            "server version {}, connection id {}, auth plugin {}",
            self.server_version,
            self.connection_id,
            handshake.plugin_name()
        );

        let server_caps = CapabilityFlags::from_bits_truncate(handshake.capability_flags);
        let mut cap_flags = CapabilityFlags::default() & server_caps;
        cap_flags.insert(
            CapabilityFlags::PROTOCOL_41
                | CapabilityFlags::LONG_PASSWORD
                | CapabilityFlags::SECURE_CONNECTION
                | CapabilityFlags::PLUGIN_AUTH,
        );
        if !opts.database.is_empty() {
            cap_flags.insert(CapabilityFlags::CONNECT_WITH_DB);
        }

        let tls_active = if let Some(tls) = &opts.tls {
            if !server_caps.contains(CapabilityFlags::SSL) {
                return Err(Error::Tls("server does not support TLS".to_owned()));
            }
            cap_flags.insert(CapabilityFlags::SSL);
            self.send_msg(SslRequest::new(cap_flags, opts.charset), false)
                .await?;
            let connector = client_connector(tls)?;
            let name = server_name(tls, host)?;
            let tls_stream = connector
                .connect(name, self.tcp.clone())
                .await
                .map_err(|e| Error::Tls(e.to_string()))?;
            self.stream = NetStream::Tls(Box::new(tls_stream));
            log::debug!("connection upgraded to TLS");
            true
        } else {
            false
        };

        let mut plugin = AuthPlugin::from_name(&handshake.plugin_name())?;
        let mut seed = handshake.seed();
        let auth_response = plugin.initial_response(&opts.password, &seed, tls_active);
        let response = HandshakeClientResponse41 {
            capability_flags: cap_flags,
            charset: opts.charset,
            username: opts.username.clone(),
            auth_response,
            database: opts.database.clone(),
            auth_plugin_name: plugin.name().to_owned(),
            ..HandshakeClientResponse41::default()
        };
        self.send_msg(response, false).await?;
        self.cap_flags = cap_flags;

        // the server may switch plugins or ask for more data any
        // number of times before the final OK or ERR
        let mut awaiting_rsa_key = false;
        loop {
            let mut msg = self.recv_msg().await?;
            match HandshakeMessage::read_with_ctx(&mut msg, &cap_flags)? {
                HandshakeMessage::Ok(ok) => {
                    self.server_status = ok.status_flags;
                    self.reset_pkt_nr();
                    log::debug!("handshake succeeded");
                    return Ok(());
                }
                HandshakeMessage::Err(err) => {
                    return Err(Error::Auth(format!(
                        "error {}: {}",
                        err.error_code,
                        String::from_utf8_lossy(err.error_message.as_ref())
                    )));
                }
                HandshakeMessage::Switch(switch) => {
                    plugin = AuthPlugin::from_name(&switch.plugin_name())?;
                    seed = switch.seed();
                    log::debug!("auth switch to {}", plugin.name());
                    let resp = plugin.initial_response(&opts.password, &seed, tls_active);
                    self.send_msg(Bytes::from(resp), false).await?;
                    awaiting_rsa_key = false;
                }
                HandshakeMessage::More(more) => {
                    if awaiting_rsa_key || plugin == AuthPlugin::Sha256 {
                        let pem = String::from_utf8_lossy(more.plugin_data.as_ref()).into_owned();
                        let encrypted = rsa_encrypt_password(&pem, &opts.password, &seed)?;
                        self.send_msg(Bytes::from(encrypted), false).await?;
                        awaiting_rsa_key = false;
                        continue;
                    }
                    match (plugin, more.plugin_data.first()) {
                        // fast auth succeeded, an OK packet follows
                        (AuthPlugin::CachingSha2, Some(0x03)) => (),
                        (AuthPlugin::CachingSha2, Some(0x04)) => {
                            if tls_active {
                                let mut cleartext = opts.password.as_bytes().to_vec();
                                cleartext.push(0);
                                self.send_msg(Bytes::from(cleartext), false).await?;
                            } else {
                                self.send_msg(
                                    Bytes::from(vec![plugin.public_key_request()]),
                                    false,
                                )
                                .await?;
                                awaiting_rsa_key = true;
                            }
                        }
                        (p, b) => {
                            return Err(Error::Protocol(format!(
                                "unexpected auth data {:?} for plugin {}",
                                b,
                                p.name()
                            )));
                        }
                    }
                }
            }
        }
    }

    /// sequence numbers restart at every command boundary
    pub fn reset_pkt_nr(&mut self) {
        self.pkt_nr = 0;
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// a clone of the underlying socket, used to unblock reads
    pub(crate) fn raw_tcp(&self) -> TcpStream {
        self.tcp.clone()
    }

    /// shut the socket down, unblocking any pending read
    pub fn shutdown(&self) {
        let _ = self.tcp.shutdown(std::net::Shutdown::Both);
    }

    /// receive one message, reassembling split packets
    pub async fn recv_msg(&mut self) -> Result<Bytes> {
        let timeout = self.read_timeout;
        let fut = async {
            let mut buf = BytesMut::new();
            loop {
                let payload_len = self.stream.read_le_u24().await.map_err(io_err)?;
                let seq_id = self.stream.read_u8().await.map_err(io_err)?;
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
                    .map_err(io_err)?;
                // a maximum length payload announces a continuation
                if (payload_len as usize) < MAX_PAYLOAD_LEN {
                    break;
                }
            }
            Ok(buf.freeze())
        };
        timed(timeout, fut).await
    }

    /// send one message, splitting payloads larger than a packet
    pub async fn send_msg<T: WriteToBytes>(&mut self, msg: T, reset: bool) -> Result<()> {
        if reset {
            self.reset_pkt_nr();
        }
        let mut buf = BytesMut::new();
        msg.write_to(&mut buf)?;
        let mut chunk_len = 0;
        for chunk in buf.as_ref().chunks(MAX_PAYLOAD_LEN) {
            chunk_len = chunk.len();
            self.stream
                .write_le_u24(chunk_len as u32)
                .await
                .map_err(io_err)?;
            self.stream.write_u8(self.pkt_nr).await.map_err(io_err)?;
            self.stream.write_all(chunk).await.map_err(Error::Io)?;
            self.pkt_nr = self.pkt_nr.wrapping_add(1);
        }
        if chunk_len == MAX_PAYLOAD_LEN {
            // empty packet marks the end of an aligned message
            self.stream.write_le_u24(0).await.map_err(io_err)?;
            self.stream.write_u8(self.pkt_nr).await.map_err(io_err)?;
            self.pkt_nr = self.pkt_nr.wrapping_add(1);
        }
        self.stream.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    /// run a statement whose response is OK or ERR
    pub async fn exec<S: Into<String>>(&mut self, sql: S) -> Result<()> {
        self.send_msg(ComQuery::new(sql), true).await?;
        let mut msg = self.recv_msg().await?;
        Message::read_with_ctx(&mut msg, &self.cap_flags)?.into_ok()?;
        Ok(())
    }

    /// run a query and buffer its text protocol result set
    pub async fn query_text<S: Into<String>>(&mut self, sql: S) -> Result<ResultSet> {
        self.send_msg(ComQuery::new(sql), true).await?;
        let mut msg = self.recv_msg().await?;
        if msg.is_empty() {
            return Err(Error::Protocol("empty query response".to_owned()));
        }
        match msg[0] {
            0x00 => {
                Message::read_with_ctx(&mut msg, &self.cap_flags)?.into_ok()?;
                return Ok(ResultSet::default());
            }
            0xff => {
                let err = ErrPacket::read_with_ctx(&mut msg, (&self.cap_flags, true))?;
                return Err(Error::from(&err));
            }
            0xfb => {
                return Err(Error::Protocol(
                    "LOCAL INFILE requests are not supported".to_owned(),
                ));
            }
            _ => (),
        }
        let col_count = msg
            .read_len_enc_int()?
            .to_u64()
            .ok_or_else(|| Error::Protocol("invalid column count".to_owned()))?;
        let mut cols = Vec::with_capacity(col_count as usize);
        for _ in 0..col_count {
            let mut msg = self.recv_msg().await?;
            cols.push(ColumnDefinition::read_with_ctx(&mut msg, false)?);
        }
        let deprecate_eof = self.cap_flags.contains(CapabilityFlags::DEPRECATE_EOF);
        if !deprecate_eof {
            self.recv_msg().await?;
        }
        let mut rows = Vec::new();
        loop {
            let mut msg = self.recv_msg().await?;
            if msg.is_empty() {
                return Err(Error::Protocol("empty result set packet".to_owned()));
            }
            match msg[0] {
                0xfe if deprecate_eof || msg.remaining() < 9 => break,
                0xff => {
                    let err = ErrPacket::read_with_ctx(&mut msg, (&self.cap_flags, true))?;
                    return Err(Error::from(&err));
                }
                _ => rows.push(TextRow::read_from(&mut msg)?),
            }
        }
        Ok(ResultSet { cols, rows })
    }

    /// single scalar helper for session variables
    pub async fn query_scalar<S: Into<String>>(&mut self, sql: S) -> Result<Option<String>> {
        Ok(self.query_text(sql).await?.scalar())
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.send_msg(ComPing::new(), true).await?;
        let mut msg = self.recv_msg().await?;
        Message::read_with_ctx(&mut msg, &self.cap_flags)?.into_ok()?;
        Ok(())
    }

    /// polite close, the socket is shut down regardless of the result
    pub async fn quit(mut self) -> Result<()> {
        let result = self.send_msg(ComQuit::new(), true).await;
        self.shutdown();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_net::TcpListener;
    use myrepl_bytes::WriteBytesExt;

    async fn frame(payload: &[u8], seq: u8) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.write_le_u24(payload.len() as u32).unwrap();
        out.write_u8(seq).unwrap();
        out.write_bytes(payload).unwrap();
        out.to_vec()
    }

    #[smol_potat::test]
    async fn test_recv_msg_reassembly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = smol::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // a max-length packet followed by its continuation
            let big = vec![0xaa_u8; MAX_PAYLOAD_LEN];
            let frames = [
                frame(&big, 0).await,
                frame(b"tail", 1).await,
            ];
            for f in &frames {
                sock.write_all(f).await.unwrap();
            }
            sock.flush().await.unwrap();
            // hold the socket open until the client is done
            smol::Timer::after(Duration::from_millis(200)).await;
        });
        let mut conn = Conn::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
        let msg = conn.recv_msg().await.unwrap();
        assert_eq!(MAX_PAYLOAD_LEN + 4, msg.len());
        assert_eq!(&b"tail"[..], &msg[MAX_PAYLOAD_LEN..]);
        server.await;
    }

    #[smol_potat::test]
    async fn test_recv_msg_sequence_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = smol::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let f = frame(b"x", 5).await;
            sock.write_all(&f).await.unwrap();
            sock.flush().await.unwrap();
            smol::Timer::after(Duration::from_millis(200)).await;
        });
        let mut conn = Conn::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
        let err = conn.recv_msg().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        server.await;
    }

    #[smol_potat::test]
    async fn test_send_msg_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = smol::spawn(async move {
            let mut conn = Conn::connect(&addr.ip().to_string(), addr.port())
                .await
                .unwrap();
            let payload = Bytes::from(vec![0x55u8; MAX_PAYLOAD_LEN + 10]);
            conn.send_msg(payload, true).await.unwrap();
        });
        let (sock, _) = listener.accept().await.unwrap();
        let mut sock = sock;
        let len = sock.read_le_u24().await.unwrap();
        let seq = sock.read_u8().await.unwrap();
        assert_eq!(MAX_PAYLOAD_LEN as u32, len);
        assert_eq!(0, seq);
        let _ = sock.read_len(MAX_PAYLOAD_LEN).await.unwrap();
        let len = sock.read_le_u24().await.unwrap();
        let seq = sock.read_u8().await.unwrap();
        assert_eq!(10, len);
        assert_eq!(1, seq);
        client.await;
    }

    #[smol_potat::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = smol::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            smol::Timer::after(Duration::from_millis(500)).await;
        });
        let mut conn = Conn::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
        conn.read_timeout = Some(Duration::from_millis(50));
        let err = conn.recv_msg().await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        server.await;
    }
}
