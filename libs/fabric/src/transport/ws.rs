use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::transport::{Connection, Dialer, Event, FrameSink, FrameStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket dialer; each bus frame is one text message
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Dialer for WsDialer {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn dial(&self) -> Result<Connection> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::dial(&self.url, e))?;
        let (sink, stream) = ws.split();
        Ok(Connection::new(WsSink { inner: sink }, WsFrames { inner: stream }))
    }
}

struct WsSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait::async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.inner.send(WsMessage::Text(frame.to_owned().into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}

struct WsFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl FrameStream for WsFrames {
    async fn receive(&mut self) -> Event {
        loop {
            let message = match self.inner.next().await {
                None => return Event::Closed(Error::ConnectionClosed),
                Some(Err(e)) => return classify(e),
                Some(Ok(message)) => message,
            };

            match message {
                WsMessage::Text(text) => return Event::Received(text.as_str().to_owned()),
                WsMessage::Binary(bytes) => {
                    return match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Event::Received(text),
                        Err(e) => {
                            Event::ReadFailure(Error::custom(format!("non UTF-8 frame: {e}")))
                        }
                    };
                }
                WsMessage::Close(frame) => {
                    tracing::debug!(?frame, "websocket close frame received");
                    return Event::Closed(Error::ConnectionClosed);
                }
                // control frames are answered by tungstenite itself
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            }
        }
    }
}

fn classify(err: tungstenite::Error) -> Event {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Io(_)
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            Event::Closed(err.into())
        }
        other => Event::ReadFailure(other.into()),
    }
}
