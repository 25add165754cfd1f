use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Connection, Dialer, Event, FrameSink, FrameStream};

/// What the hub side pushes towards the client
type Inbound = std::result::Result<String, String>;

/// In-process dialer
///
/// Every successful dial hands a [`MemoryPeer`] to the paired [`MemoryHub`],
/// which plays the remote end. The dialer can be switched offline to make
/// dials fail, and counts every attempt.
pub struct MemoryDialer {
    endpoint: String,
    online: AtomicBool,
    attempts: AtomicUsize,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Hub side of a [`MemoryDialer`]
pub struct MemoryHub {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Remote end of one in-process connection
///
/// Dropping the peer closes the connection from the client's point of view.
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryDialer {
    /// Create a dialer and the hub that accepts its connections
    pub fn pair(endpoint: impl Into<String>) -> (Arc<Self>, MemoryHub) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            endpoint: endpoint.into(),
            online: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            accepted,
        });
        (dialer, MemoryHub { incoming })
    }

    /// Make subsequent dials succeed or fail
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of dial attempts so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Dialer for MemoryDialer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::dial(&self.endpoint, "hub offline"));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(MemoryPeer {
                to_client,
                from_client,
            })
            .map_err(|_| Error::dial(&self.endpoint, "hub dropped"))?;

        Ok(Connection::new(
            MemorySink {
                tx: Some(client_tx),
            },
            MemoryStream { rx: client_rx },
        ))
    }
}

impl MemoryHub {
    /// Wait for the next connection; `None` once the dialer is gone
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

impl MemoryPeer {
    /// Push one frame to the client
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.to_client
            .send(Ok(frame.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Make the client's next read report a non-fatal failure
    pub fn fail_read(&self, reason: impl Into<String>) -> Result<()> {
        self.to_client
            .send(Err(reason.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Next frame written by the client; `None` once it closed its side
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait::async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(frame.to_owned())
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait::async_trait]
impl FrameStream for MemoryStream {
    async fn receive(&mut self) -> Event {
        match self.rx.recv().await {
            Some(Ok(frame)) => Event::Received(frame),
            Some(Err(reason)) => Event::ReadFailure(Error::Custom(reason)),
            None => Event::Closed(Error::ConnectionClosed),
        }
    }
}
