//! the binlog syncer: a long-lived pseudo-replica that registers with
//! a master, streams events and survives reconnects
use crate::conn::{Conn, ConnOpts};
use crate::streamer::{stream_channel, BinlogStreamer, EventSink, DEFAULT_QUEUE_LEN};
use crate::tls::TlsOpts;
use bytes::{Buf, BytesMut};
use myrepl_bytes::{ReadFromBytesWithContext, WriteBytesExt};
use myrepl_core::binlog::{BinlogParser, BinlogParserOpts, Event, EventData, RowsDecodeOpts};
use myrepl_core::cmd::{ComBinlogDump, ComBinlogDumpGtid, ComRegisterSlave};
use myrepl_core::error::{Error, Result};
use myrepl_core::gtid::{GtidSet, MariadbGtidSet};
use myrepl_core::packet::{ErrPacket, Message};
use myrepl_core::{Flavor, Position};
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// binlog syncer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConfig {
    /// must be unique within the replication topology
    pub server_id: u32,
    #[serde(with = "flavor_serde")]
    pub flavor: Flavor,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// collation id for the session, 45 is utf8mb4_general_ci
    pub charset: u8,
    /// answer semi-sync ACK requests
    pub semi_sync: bool,
    /// ask the master for heartbeats at this interval
    pub heartbeat_period: Option<Duration>,
    /// per-read deadline, None or zero disables
    pub read_timeout: Option<Duration>,
    /// 0 means retry forever
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub tls: Option<TlsOpts>,
    pub parse_time: bool,
    pub use_decimal: bool,
    pub verify_checksum: bool,
    /// deliver unmodeled events as opaque records instead of failing
    pub lax_unknown_events: bool,
    /// deliver heartbeat events to the consumer
    pub forward_heartbeats: bool,
    pub queue_len: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        SyncerConfig {
            server_id: 0,
            flavor: Flavor::MySql,
            host: "127.0.0.1".to_owned(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            charset: 45,
            semi_sync: false,
            heartbeat_period: None,
            read_timeout: None,
            max_reconnect_attempts: 0,
            reconnect_backoff: Duration::from_secs(1),
            tls: None,
            parse_time: false,
            use_decimal: false,
            verify_checksum: true,
            lax_unknown_events: false,
            forward_heartbeats: false,
            queue_len: DEFAULT_QUEUE_LEN,
        }
    }
}

mod flavor_serde {
    use myrepl_core::Flavor;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flavor: &Flavor, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&flavor.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Flavor, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// where to start the dump
#[derive(Debug, Clone)]
pub enum StartFrom {
    Position(Position),
    Gtid(GtidSet),
    MariadbGtid(MariadbGtidSet),
}

enum Mode {
    Position,
    Gtid(GtidSet),
    MariadbGtid(MariadbGtidSet),
}

/// drives one socket and one parser, delivering events through a
/// bounded streamer; consumers needing parallelism run several
pub struct BinlogSyncer {
    cfg: SyncerConfig,
}

impl BinlogSyncer {
    pub fn new(cfg: SyncerConfig) -> Self {
        BinlogSyncer { cfg }
    }

    /// register as a replica and start streaming
    ///
    /// connection and registration errors surface here; errors after
    /// that arrive through the streamer
    pub async fn start(self, from: StartFrom) -> Result<BinlogStreamer> {
        if self.cfg.server_id == 0 {
            return Err(Error::Protocol("server_id must be non-zero".to_owned()));
        }
        let (sink, streamer) = stream_channel(self.cfg.queue_len);
        let (position, mode) = match from {
            StartFrom::Position(pos) => (pos, Mode::Position),
            StartFrom::Gtid(set) => (Position::default(), Mode::Gtid(set)),
            StartFrom::MariadbGtid(set) => (Position::default(), Mode::MariadbGtid(set)),
        };
        let mut run = SyncRun {
            cfg: self.cfg,
            position,
            mode,
            sink,
            semi_sync_active: false,
            made_progress: false,
        };
        let conn = run.connect_and_dump().await?;
        smol::spawn(run.pump(conn)).detach();
        Ok(streamer)
    }

    pub async fn start_position(self, pos: Position) -> Result<BinlogStreamer> {
        self.start(StartFrom::Position(pos)).await
    }

    pub async fn start_gtid(self, set: GtidSet) -> Result<BinlogStreamer> {
        self.start(StartFrom::Gtid(set)).await
    }

    pub async fn start_gtid_mariadb(self, set: MariadbGtidSet) -> Result<BinlogStreamer> {
        self.start(StartFrom::MariadbGtid(set)).await
    }
}

struct SyncRun {
    cfg: SyncerConfig,
    // last seen position, the reconnect resume point
    position: Position,
    mode: Mode,
    sink: EventSink,
    semi_sync_active: bool,
    made_progress: bool,
}

impl SyncRun {
    async fn connect_and_dump(&mut self) -> Result<Conn> {
        let opts = ConnOpts {
            username: self.cfg.user.clone(),
            password: self.cfg.password.clone(),
            database: String::new(),
            charset: self.cfg.charset,
            read_timeout: self.cfg.read_timeout,
            tls: self.cfg.tls.clone(),
        };
        let mut conn = Conn::connect(&self.cfg.host, self.cfg.port).await?;
        conn.handshake(&self.cfg.host, &opts).await?;
        self.sink.shutdown.track_socket(conn.raw_tcp());
        self.prepare(&mut conn).await?;
        self.register(&mut conn).await?;
        self.send_dump(&mut conn).await?;
        log::info!(
            "binlog dump started at {} (flavor {})",
            self.position,
            self.cfg.flavor
        );
        Ok(conn)
    }

    /// session setup before registering, mirroring what real replicas do
    async fn prepare(&mut self, conn: &mut Conn) -> Result<()> {
        // tell the master to keep writing checksums the way it does;
        // pre-5.6 servers do not know the variable
        if let Err(e) = conn
            .exec("SET @master_binlog_checksum = @@global.binlog_checksum")
            .await
        {
            log::debug!("master does not support binlog checksum: {}", e);
        }
        if let Some(period) = self.cfg.heartbeat_period {
            let nanos = period.as_nanos() as u64;
            conn.exec(format!("SET @master_heartbeat_period = {}", nanos))
                .await?;
        }
        match self.cfg.flavor {
            Flavor::MySql => {
                if let Ok(rs) = conn.query_text("SELECT @@server_id, @@server_uuid").await {
                    if let Some(row) = rs.rows.first() {
                        log::debug!(
                            "master server_id={:?}, server_uuid={:?}",
                            row.cell_str(0),
                            row.cell_str(1)
                        );
                    }
                }
            }
            Flavor::MariaDb => {
                conn.exec("SET @mariadb_slave_capability = 4").await?;
                if let Ok(Some(pos)) = conn.query_scalar("SELECT @@gtid_binlog_pos").await {
                    log::debug!("master gtid_binlog_pos={}", pos);
                }
            }
        }
        if self.cfg.semi_sync {
            let rs = conn
                .query_text("SHOW VARIABLES LIKE 'rpl_semi_sync_master_enabled'")
                .await?;
            let enabled = rs
                .rows
                .first()
                .and_then(|row| row.cell_str(1))
                .map_or(false, |v| v.eq_ignore_ascii_case("ON"));
            if enabled {
                conn.exec("SET @rpl_semi_sync_slave = 1").await?;
                self.semi_sync_active = true;
            } else {
                log::warn!("master has semi-sync disabled, streaming without ACKs");
                self.semi_sync_active = false;
            }
        }
        Ok(())
    }

    async fn register(&mut self, conn: &mut Conn) -> Result<()> {
        let register = ComRegisterSlave::new(self.cfg.server_id);
        conn.send_msg(register, true).await?;
        let mut msg = conn.recv_msg().await?;
        Message::read_with_ctx(&mut msg, &conn.cap_flags)?.into_ok()?;
        Ok(())
    }

    async fn send_dump(&mut self, conn: &mut Conn) -> Result<()> {
        match &self.mode {
            Mode::Position => {
                let dump = ComBinlogDump::default()
                    .server_id(self.cfg.server_id)
                    .binlog_filename(self.position.name.clone())
                    .binlog_pos(self.position.pos);
                conn.send_msg(dump, true).await
            }
            Mode::Gtid(set) => {
                let dump = ComBinlogDumpGtid::default()
                    .server_id(self.cfg.server_id)
                    .gtid_set(set.clone());
                conn.send_msg(dump, true).await
            }
            Mode::MariadbGtid(set) => {
                conn.exec(format!("SET @slave_connect_state = '{}'", set))
                    .await?;
                conn.exec("SET @slave_gtid_strict_mode = 0").await?;
                let dump = ComBinlogDump::default()
                    .server_id(self.cfg.server_id)
                    .binlog_filename(String::new())
                    .binlog_pos(0);
                conn.send_msg(dump, true).await
            }
        }
    }

    /// reconnect loop around the stream, transparent to the consumer
    async fn pump(mut self, mut conn: Conn) {
        let mut attempts = 0u32;
        loop {
            let result = self.stream_events(&mut conn).await;
            if self.sink.shutdown.is_closed() {
                return;
            }
            if self.made_progress {
                attempts = 0;
                self.made_progress = false;
            }
            let err = match result {
                Ok(()) => {
                    // the master finished the dump with EOF
                    self.sink
                        .fail(Error::Protocol("binlog dump ended by master".to_owned()))
                        .await;
                    return;
                }
                Err(e) => e,
            };
            let retry_allowed = self.cfg.max_reconnect_attempts == 0
                || attempts < self.cfg.max_reconnect_attempts;
            if !err.is_transient() || !retry_allowed {
                self.sink.fail(err).await;
                return;
            }
            conn.shutdown();
            // re-establish from the last seen position or gtid set
            loop {
                attempts += 1;
                log::warn!(
                    "binlog stream interrupted ({}), reconnect attempt {} from {}",
                    err,
                    attempts,
                    self.position
                );
                smol::Timer::after(self.cfg.reconnect_backoff).await;
                if self.sink.shutdown.is_closed() {
                    return;
                }
                match self.connect_and_dump().await {
                    Ok(c) => {
                        conn = c;
                        break;
                    }
                    Err(e)
                        if e.is_transient()
                            && (self.cfg.max_reconnect_attempts == 0
                                || attempts < self.cfg.max_reconnect_attempts) =>
                    {
                        log::warn!("reconnect failed: {}", e);
                    }
                    Err(e) => {
                        self.sink.fail(e).await;
                        return;
                    }
                }
            }
        }
    }

    async fn stream_events(&mut self, conn: &mut Conn) -> Result<()> {
        let mut parser = BinlogParser::new(BinlogParserOpts {
            verify_checksum: self.cfg.verify_checksum,
            lax_unknown_events: self.cfg.lax_unknown_events,
            rows: RowsDecodeOpts {
                parse_time: self.cfg.parse_time,
                use_decimal: self.cfg.use_decimal,
                allow_extra_columns: false,
            },
        });
        loop {
            let mut msg = conn.recv_msg().await?;
            if self.sink.shutdown.is_closed() {
                return Err(Error::Canceled);
            }
            if msg.is_empty() {
                return Err(Error::Protocol("empty replication packet".to_owned()));
            }
            match msg[0] {
                0x00 => {
                    msg.advance(1);
                    let mut need_ack = false;
                    if self.semi_sync_active && msg.len() >= 2 && msg[0] == 0xef {
                        need_ack = msg[1] == 0x01;
                        msg.advance(2);
                    }
                    let event = parser.parse(msg)?;
                    self.track(&event);
                    if need_ack {
                        self.reply_ack(conn).await?;
                    }
                    if matches!(event.data, EventData::Heartbeat(_))
                        && !self.cfg.forward_heartbeats
                    {
                        continue;
                    }
                    if !self.sink.push(event).await {
                        return Err(Error::Canceled);
                    }
                }
                // EOF ends the dump in non-blocking mode
                0xfe if msg.remaining() < 9 => return Ok(()),
                0xff => {
                    let err = ErrPacket::read_with_ctx(&mut msg, (&conn.cap_flags, true))?;
                    return Err(Error::from(&err));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected replication packet header {:#04x}",
                        other
                    )))
                }
            }
        }
    }

    /// update the resume state from a freshly parsed event
    fn track(&mut self, event: &Event) {
        match &event.data {
            // a rotate points at the next file; its own header log_pos
            // still refers to the old file and must not win
            EventData::Rotate(rotate) => {
                self.position = Position::new(
                    rotate.next_binlog_filename.clone(),
                    rotate.position as u32,
                );
                self.made_progress = true;
                return;
            }
            // heartbeats signal liveness, never progress
            EventData::Heartbeat(_) => return,
            EventData::Gtid(gtid) => {
                if let Mode::Gtid(set) = &mut self.mode {
                    set.add_gtid(gtid.sid, gtid.gno);
                }
            }
            EventData::MariadbGtid(gtid) => {
                if let Mode::MariadbGtid(set) = &mut self.mode {
                    set.update(gtid.gtid(event.header.server_id));
                }
            }
            _ => (),
        }
        if event.header.log_pos > 0 {
            self.position.pos = event.header.log_pos;
        }
        self.made_progress = true;
    }

    /// semi-sync ACK: magic byte, 8-byte position, filename
    async fn reply_ack(&mut self, conn: &mut Conn) -> Result<()> {
        let mut buf = BytesMut::new();
        buf.write_u8(0xef)?;
        buf.write_le_u64(self.position.pos as u64)?;
        buf.write_bytes(self.position.name.as_bytes())?;
        conn.send_msg(buf.freeze(), true).await
    }
}
