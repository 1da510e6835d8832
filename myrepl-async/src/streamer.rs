//! bounded queue between the syncer and the consumer
use async_net::TcpStream;
use futures::channel::mpsc;
use futures::future::{self, Either};
use futures::{SinkExt, StreamExt};
use myrepl_core::binlog::Event;
use myrepl_core::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// how many events may sit between syncer and consumer before the
/// syncer stops reading from the socket
pub(crate) const DEFAULT_QUEUE_LEN: usize = 1024;

pub(crate) enum StreamItem {
    Event(Box<Event>),
    // terminal, nothing follows
    Fatal(Error),
}

/// shared handle to tear the stream down from either side
#[derive(Default)]
#[derive(Debug)]
pub(crate) struct Shutdown {
    closed: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
}

impl Shutdown {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // unblock any read pending on the socket
        if let Ok(guard) = self.socket.lock() {
            if let Some(tcp) = guard.as_ref() {
                let _ = tcp.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    pub(crate) fn track_socket(&self, tcp: TcpStream) {
        if let Ok(mut guard) = self.socket.lock() {
            *guard = Some(tcp);
        }
        if self.is_closed() {
            self.close();
        }
    }
}

pub(crate) fn stream_channel(
    capacity: usize,
) -> (EventSink, BinlogStreamer) {
    let (tx, rx) = mpsc::channel(capacity);
    let shutdown = Arc::new(Shutdown::default());
    (
        EventSink {
            tx,
            shutdown: shutdown.clone(),
        },
        BinlogStreamer {
            rx,
            shutdown,
            terminal: None,
        },
    )
}

/// the syncer side of the queue
pub(crate) struct EventSink {
    tx: mpsc::Sender<StreamItem>,
    pub(crate) shutdown: Arc<Shutdown>,
}

impl EventSink {
    /// enqueue, blocking when the consumer lags; a false return
    /// means the consumer is gone
    pub(crate) async fn push(&mut self, event: Event) -> bool {
        !self.shutdown.is_closed()
            && self.tx.send(StreamItem::Event(Box::new(event))).await.is_ok()
    }

    pub(crate) async fn fail(&mut self, err: Error) {
        let _ = self.tx.send(StreamItem::Fatal(err)).await;
    }
}

/// the consumer side of the replication stream
///
/// events arrive in wire order; after a terminal error every call
/// keeps returning that error
#[derive(Debug)]
pub struct BinlogStreamer {
    rx: mpsc::Receiver<StreamItem>,
    shutdown: Arc<Shutdown>,
    terminal: Option<Arc<Error>>,
}

impl BinlogStreamer {
    /// wait for the next event
    pub async fn next(&mut self) -> Result<Event> {
        if let Some(err) = &self.terminal {
            return Err(Error::Terminated(err.clone()));
        }
        if self.shutdown.is_closed() {
            return Err(Error::Canceled);
        }
        match self.rx.next().await {
            Some(StreamItem::Event(event)) => Ok(*event),
            Some(StreamItem::Fatal(err)) => {
                let err = Arc::new(err);
                self.terminal = Some(err.clone());
                Err(Error::Terminated(err))
            }
            None => Err(Error::Canceled),
        }
    }

    /// wait for the next event, up to the deadline
    pub async fn next_timeout(&mut self, timeout: Duration) -> Result<Event> {
        let fut = self.next();
        futures::pin_mut!(fut);
        match future::select(fut, smol::Timer::after(timeout)).await {
            Either::Left((r, _)) => r,
            Either::Right(_) => Err(Error::DeadlineExceeded),
        }
    }

    /// stop the stream; pending syncer reads are unblocked by
    /// shutting the socket
    pub fn close(&mut self) {
        self.shutdown.close();
        self.rx.close();
    }
}

impl Drop for BinlogStreamer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myrepl_core::binlog::{EventData, EventHeader, EventHeaderFlags, XidData};

    fn xid_event(log_pos: u32) -> Event {
        Event {
            header: EventHeader {
                timestamp: 0,
                type_code: 16,
                server_id: 1,
                event_size: 31,
                log_pos,
                flags: EventHeaderFlags::empty(),
            },
            data: EventData::Xid(XidData { xid: 1 }),
        }
    }

    #[smol_potat::test]
    async fn test_events_in_order() {
        let (mut sink, mut streamer) = stream_channel(8);
        assert!(sink.push(xid_event(100)).await);
        assert!(sink.push(xid_event(200)).await);
        assert_eq!(100, streamer.next().await.unwrap().header.log_pos);
        assert_eq!(200, streamer.next().await.unwrap().header.log_pos);
    }

    #[smol_potat::test]
    async fn test_terminal_error_repeats() {
        let (mut sink, mut streamer) = stream_channel(8);
        sink.fail(Error::MissingTableMap(42)).await;
        let first = streamer.next().await.unwrap_err();
        assert!(matches!(first, Error::Terminated(_)));
        let second = streamer.next().await.unwrap_err();
        match second {
            Error::Terminated(inner) => {
                assert!(matches!(*inner, Error::MissingTableMap(42)))
            }
            other => panic!("expected terminated, got {:?}", other),
        }
    }

    #[smol_potat::test]
    async fn test_deadline() {
        let (_sink, mut streamer) = stream_channel(8);
        let err = streamer
            .next_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[smol_potat::test]
    async fn test_close_cancels() {
        let (mut sink, mut streamer) = stream_channel(8);
        streamer.close();
        assert!(matches!(streamer.next().await.unwrap_err(), Error::Canceled));
        // the producer notices the consumer is gone
        assert!(!sink.push(xid_event(100)).await);
    }

    #[smol_potat::test]
    async fn test_backpressure_blocks_producer() {
        let (mut sink, mut streamer) = stream_channel(1);
        assert!(sink.push(xid_event(1)).await);
        assert!(sink.push(xid_event(2)).await);
        // queue of one plus each sender slot is full now
        let third = sink.push(xid_event(3));
        futures::pin_mut!(third);
        let timeout = smol::Timer::after(Duration::from_millis(50));
        match future::select(third, timeout).await {
            Either::Left(_) => panic!("push should block on a full queue"),
            Either::Right((_, mut third)) => {
                // draining makes room again
                assert_eq!(1, streamer.next().await.unwrap().header.log_pos);
                assert!(third.as_mut().await);
            }
        }
    }
}
