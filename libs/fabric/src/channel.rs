use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use vox_core::Message;

use crate::codec::{Codec, LineCodec};
use crate::error::{Error, Result};
use crate::request::Payload;
use crate::transport::{dialer_for, Dialer, Event, Transport};

/// Callback for self-addressed messages that no request is waiting for
pub type Handler = Arc<dyn Fn(Message) + Send + Sync>;

/// Connection settings for a [`Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub endpoint, `ws://`, `wss://` or `tcp://`
    pub url: String,
    /// This node's address; sender of every outgoing frame and the
    /// delivery filter for every inbound one
    pub shard: String,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Bound on each dial and each write
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shard: shard.into(),
            reconnect_delay: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(3)),
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The single "waiting for a reply" registration
#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Pending {
        id: u64,
        tx: oneshot::Sender<Message>,
    },
}

impl Slot {
    /// Install a new waiter
    ///
    /// A waiter whose receiver is already gone is silently replaced; a live
    /// one is never orphaned, the install is refused with [`Error::Busy`].
    fn install(&mut self, id: u64) -> Result<oneshot::Receiver<Message>> {
        if let Self::Pending { tx, .. } = self {
            if !tx.is_closed() {
                return Err(Error::Busy);
            }
        }
        let (tx, rx) = oneshot::channel();
        *self = Self::Pending { id, tx };
        Ok(rx)
    }

    /// Remove the waiter if it is still the one installed as `id`
    fn clear(&mut self, id: u64) {
        if matches!(self, Self::Pending { id: current, .. } if *current == id) {
            *self = Self::Empty;
        }
    }

    /// Hand the message to the waiter, or give it back if there is none
    fn deliver(&mut self, message: Message) -> Option<Message> {
        match std::mem::take(self) {
            Self::Empty => Some(message),
            Self::Pending { tx, .. } => tx.send(message).err(),
        }
    }
}

/// Control-bus protocol client
///
/// Owns one reconnecting [`Transport`] and a single correlation slot. Only
/// one request/reply exchange is in flight at a time: a reply is simply the
/// next frame addressed to this node after the slot was installed, so the
/// bus protocol needs no request ids. [`Client::run`] must be running (see
/// [`Client::spawn`]) for anything to be received.
pub struct Client {
    shard: String,
    transport: Transport,
    codec: LineCodec,
    slot: Mutex<Slot>,
    next_waiter: AtomicU64,
    request_gate: tokio::sync::Mutex<()>,
    handler: RwLock<Option<Handler>>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    /// Connect to the hub named by `config.url`
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let dialer = dialer_for(&config.url)?;
        Self::with_dialer(config, dialer).await
    }

    /// Connect through a caller-supplied dialer; `config.url` is ignored
    pub async fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let transport = Transport::connect(dialer, config.reconnect_delay, config.timeout).await?;
        tracing::info!(
            shard = config.shard.as_str(),
            endpoint = transport.endpoint(),
            "connected to bus"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            shard: config.shard,
            transport,
            codec: LineCodec,
            slot: Mutex::new(Slot::Empty),
            next_waiter: AtomicU64::new(0),
            request_gate: tokio::sync::Mutex::new(()),
            handler: RwLock::new(None),
            shutdown,
        })
    }

    pub fn shard(&self) -> &str {
        &self.shard
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Register the callback for unsolicited messages, replacing any previous one
    pub fn on_unsolicited<F>(&self, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Fire-and-forget send
    pub async fn transmit(&self, payload: impl Into<Payload>) -> Result<()> {
        let frame = payload.into().encode(&self.codec, &self.shard)?;

        self.transport.write(&frame).await.map_err(|e| {
            tracing::error!(frame = frame.as_str(), error = %e, "failed to transmit");
            Error::Write(Box::new(e))
        })
    }

    /// Wait for the next message addressed to this node
    ///
    /// Fails with [`Error::Busy`] if another caller is already waiting.
    pub async fn receive(&self) -> Result<Message> {
        let (_guard, rx) = self.install()?;
        wait(rx, None).await
    }

    /// [`Client::receive`] with a deadline; the slot is removed on expiry
    pub async fn receive_within(&self, deadline: Duration) -> Result<Message> {
        let (_guard, rx) = self.install()?;
        wait(rx, Some(deadline)).await
    }

    /// Send a request and wait for its reply
    ///
    /// Concurrent callers queue behind each other. If the send fails no
    /// waiter is left behind.
    pub async fn transmit_receive(&self, payload: impl Into<Payload>) -> Result<Message> {
        self.exchange(payload.into(), None).await
    }

    /// [`Client::transmit_receive`] with a deadline on the reply
    pub async fn transmit_receive_within(
        &self,
        payload: impl Into<Payload>,
        deadline: Duration,
    ) -> Result<Message> {
        self.exchange(payload.into(), Some(deadline)).await
    }

    /// Tear down the pending waiter, if any; it fails with [`Error::SlotClosed`]
    pub fn abandon_pending(&self) {
        *self.slot() = Slot::Empty;
    }

    /// Background read loop
    ///
    /// Routes every inbound frame and reconnects on closure. Returns only
    /// after [`Client::shutdown`].
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        tracing::info!(shard = self.shard.as_str(), "bus read loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let event = tokio::select! {
                event = self.transport.read() => event,
                _ = shutdown.changed() => continue,
            };

            match event {
                Event::Received(frame) => self.route(&frame),
                Event::ReadFailure(e) => {
                    tracing::error!(error = %e, "failed to read from bus");
                }
                Event::Closed(e) => {
                    tracing::warn!(
                        endpoint = self.transport.endpoint(),
                        error = %e,
                        "bus connection closed, reconnecting"
                    );
                    if self.transport.reconnect(&mut shutdown).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(shard = self.shard.as_str(), "bus read loop stopped");
    }

    /// Run the read loop on a tokio task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.run().await })
    }

    /// Stop the read loop and release any waiting caller
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.abandon_pending();
    }

    /// Shut down and close the connection
    pub async fn close(&self) -> Result<()> {
        self.shutdown();
        self.transport.close().await
    }

    async fn exchange(&self, payload: Payload, deadline: Option<Duration>) -> Result<Message> {
        let _turn = self.request_gate.lock().await;

        // installed before the write so a fast reply cannot slip past
        let (guard, rx) = self.install()?;
        if let Err(e) = self.transmit(payload).await {
            drop(guard);
            return Err(e);
        }
        wait(rx, deadline).await
    }

    fn install(&self) -> Result<(SlotGuard<'_>, oneshot::Receiver<Message>)> {
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let rx = self.slot().install(id)?;
        Ok((SlotGuard { client: self, id }, rx))
    }

    fn route(&self, frame: &str) {
        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(frame, error = %e, "failed to parse bus frame");
                return;
            }
        };

        if message.to != self.shard {
            tracing::trace!(to = message.to.as_str(), "frame not addressed to us");
            return;
        }

        let Some(message) = self.slot().deliver(message) else {
            return;
        };

        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(message),
            None => tracing::debug!(%message, "no handler for unsolicited message, dropping"),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears its own waiter on drop, including when the waiting future is cancelled
struct SlotGuard<'a> {
    client: &'a Client,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.client.slot().clear(self.id);
    }
}

async fn wait(rx: oneshot::Receiver<Message>, deadline: Option<Duration>) -> Result<Message> {
    let reply = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, rx)
            .await
            .map_err(|_| Error::Timeout(deadline))?,
        None => rx.await,
    };
    reply.map_err(|_| Error::SlotClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(noun: &str) -> Message {
        Message::new("VOX", "OK", noun).with_from("VERTEX")
    }

    #[test]
    fn empty_slot_returns_message() {
        let mut slot = Slot::Empty;
        assert_eq!(slot.deliver(msg("A")), Some(msg("A")));
    }

    #[test]
    fn pending_slot_takes_message_once() {
        let mut slot = Slot::Empty;
        let mut rx = slot.install(1).unwrap();

        assert_eq!(slot.deliver(msg("A")), None);
        assert!(matches!(slot, Slot::Empty));
        assert_eq!(rx.try_recv().unwrap(), msg("A"));

        // slot already consumed
        assert_eq!(slot.deliver(msg("B")), Some(msg("B")));
    }

    #[test]
    fn live_waiter_refuses_second_install() {
        let mut slot = Slot::Empty;
        let _rx = slot.install(1).unwrap();
        assert!(matches!(slot.install(2), Err(Error::Busy)));
    }

    #[test]
    fn dead_waiter_is_replaced() {
        let mut slot = Slot::Empty;
        drop(slot.install(1).unwrap());
        let mut rx = slot.install(2).unwrap();

        assert_eq!(slot.deliver(msg("A")), None);
        assert_eq!(rx.try_recv().unwrap(), msg("A"));
    }

    #[test]
    fn message_for_dropped_waiter_is_returned() {
        let mut slot = Slot::Empty;
        drop(slot.install(1).unwrap());
        assert_eq!(slot.deliver(msg("A")), Some(msg("A")));
    }

    #[test]
    fn clear_only_removes_matching_waiter() {
        let mut slot = Slot::Empty;
        let _rx = slot.install(7).unwrap();

        slot.clear(6);
        assert!(matches!(slot, Slot::Pending { id: 7, .. }));

        slot.clear(7);
        assert!(matches!(slot, Slot::Empty));
    }
}
