use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};

pub mod memory;
pub mod tcp;
pub mod ws;

pub use self::memory::{MemoryDialer, MemoryHub, MemoryPeer};
pub use self::tcp::TcpDialer;
pub use self::ws::WsDialer;

/// One classified inbound read
#[derive(Debug)]
pub enum Event {
    /// A complete frame
    Received(String),

    /// A read error that leaves the connection usable
    ReadFailure(Error),

    /// The remote end closed the connection, or the socket is dead
    Closed(Error),
}

/// Write half of a connection
#[async_trait::async_trait]
pub trait FrameSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Close the write half
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection
#[async_trait::async_trait]
pub trait FrameStream: Send {
    /// Wait for the next inbound frame and classify it
    async fn receive(&mut self) -> Event;
}

/// A freshly dialed full-duplex connection, split into halves
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl Connection {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Opens connections to one fixed endpoint
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    /// The endpoint this dialer connects to, for logging
    fn endpoint(&self) -> &str;

    /// Open a new connection
    async fn dial(&self) -> Result<Connection>;
}

/// Pick a dialer from the endpoint URL scheme
///
/// `ws://` and `wss://` use WebSocket text frames, `tcp://host:port` uses
/// newline-delimited frames.
pub fn dialer_for(url: &str) -> Result<Arc<dyn Dialer>> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(Arc::new(WsDialer::new(url)))
    } else if url.starts_with("tcp://") {
        Ok(Arc::new(TcpDialer::new(url)?))
    } else {
        Err(Error::InvalidEndpoint(url.to_string()))
    }
}

/// Persistent, self-healing connection to one endpoint
///
/// The read and write halves sit behind separate locks so a blocked read
/// never stalls a writer. [`Transport::reconnect`] takes both locks before
/// swapping, so no read or write ever runs against a half-replaced
/// connection.
///
/// A write that fails or times out may have left part of a frame on the
/// wire, so its sink is dropped: later writes fail with
/// [`Error::ConnectionClosed`] and the next read reports [`Event::Closed`]
/// until a reconnect installs a fresh connection.
pub struct Transport {
    dialer: Arc<dyn Dialer>,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    stream: Mutex<Box<dyn FrameStream>>,
    connected: AtomicBool,
    /// Set while a sink was dropped after a failed write
    broken: watch::Sender<bool>,
    /// Set while `replace` waits for the locks; in-flight writes give way
    replacing: watch::Sender<bool>,
    reconnect_delay: Duration,
    timeout: Option<Duration>,
}

impl Transport {
    /// Dial the endpoint once; fails if it is unreachable
    pub async fn connect(
        dialer: Arc<dyn Dialer>,
        reconnect_delay: Duration,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        tracing::debug!(endpoint = dialer.endpoint(), "connecting to bus");
        let conn = dial_once(dialer.as_ref(), timeout).await.inspect_err(|e| {
            tracing::error!(endpoint = dialer.endpoint(), error = %e, "failed to dial bus");
        })?;

        Ok(Self {
            dialer,
            sink: Mutex::new(Some(conn.sink)),
            stream: Mutex::new(conn.stream),
            connected: AtomicBool::new(true),
            broken: watch::Sender::new(false),
            replacing: watch::Sender::new(false),
            reconnect_delay,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.dialer.endpoint()
    }

    /// Whether the transport is connected rather than reconnecting
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send one frame; errors are returned as-is and never retried
    ///
    /// A failed or timed-out write retires the connection's sink. A write
    /// still in flight when a reconnect starts is abandoned with
    /// [`Error::ConnectionClosed`].
    pub async fn write(&self, frame: &str) -> Result<()> {
        let mut replacing = self.replacing.subscribe();
        let mut slot = self.sink.lock().await;
        if *replacing.borrow_and_update() {
            return Err(Error::ConnectionClosed);
        }
        let sink = slot.as_mut().ok_or(Error::ConnectionClosed)?;
        tracing::debug!(frame, "write bus frame");

        let send = async {
            match self.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, sink.send(frame)).await {
                    Ok(sent) => sent,
                    Err(_) => Err(Error::Timeout(timeout)),
                },
                None => sink.send(frame).await,
            }
        };
        let preempted = async {
            let _ = replacing.wait_for(|replacing| *replacing).await;
        };
        let sent = tokio::select! {
            sent = send => sent,
            () = preempted => {
                tracing::debug!("write abandoned for reconnect");
                return Err(Error::ConnectionClosed);
            }
        };

        if let Err(e) = &sent {
            tracing::warn!(endpoint = self.endpoint(), error = %e, "bus write failed, dropping connection");
            *slot = None;
            self.broken.send_replace(true);
        }
        sent
    }

    /// Wait for the next inbound event
    pub async fn read(&self) -> Event {
        let mut stream = self.stream.lock().await;
        let mut broken = self.broken.subscribe();
        let retired = async {
            let _ = broken.wait_for(|broken| *broken).await;
        };
        let event = tokio::select! {
            event = stream.receive() => event,
            () = retired => Event::Closed(Error::ConnectionClosed),
        };
        if let Event::Received(frame) = &event {
            tracing::debug!(frame = frame.as_str(), "read bus frame");
        }
        event
    }

    /// Dial until a connection succeeds, then swap it in
    ///
    /// Retries forever with a fixed delay between attempts. Only a shutdown
    /// signal ends the loop early, in which case [`Error::Shutdown`] is
    /// returned and the old connection is left in place.
    pub async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return Err(Error::Shutdown);
            }
            attempt += 1;

            let dialed = tokio::select! {
                dialed = dial_once(self.dialer.as_ref(), self.timeout) => dialed,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(Error::Shutdown);
                    }
                    continue;
                }
            };

            match dialed {
                Ok(conn) => {
                    self.replace(conn).await;
                    self.connected.store(true, Ordering::Release);
                    tracing::info!(endpoint = self.endpoint(), attempt, "reconnected to bus");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = self.endpoint(),
                        attempt,
                        delay = ?self.reconnect_delay,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                return Err(Error::Shutdown);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Close the write half of the current connection
    pub async fn close(&self) -> Result<()> {
        match self.sink.lock().await.as_mut() {
            Some(sink) => sink.close().await,
            None => Ok(()),
        }
    }

    async fn replace(&self, conn: Connection) {
        self.replacing.send_replace(true);

        // lock order: stream, then sink
        let mut stream = self.stream.lock().await;
        let mut sink = self.sink.lock().await;

        let old_sink = sink.replace(conn.sink);
        *stream = conn.stream;
        self.broken.send_replace(false);
        self.replacing.send_replace(false);
        drop(sink);
        drop(stream);

        if let Some(mut old_sink) = old_sink {
            let grace = self.timeout.unwrap_or(STALE_CLOSE_GRACE);
            match tokio::time::timeout(grace, old_sink.close()).await {
                Ok(Err(e)) => tracing::debug!(error = %e, "closing stale connection failed"),
                Err(_) => tracing::debug!("closing stale connection timed out"),
                Ok(Ok(())) => {}
            }
        }
    }
}

/// Bound on closing a replaced connection when no timeout is configured
const STALE_CLOSE_GRACE: Duration = Duration::from_secs(1);

async fn dial_once(dialer: &dyn Dialer, timeout: Option<Duration>) -> Result<Connection> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, dialer.dial())
            .await
            .map_err(|_| Error::dial(dialer.endpoint(), "connect timeout exceeded"))?,
        None => dialer.dial().await,
    }
}
