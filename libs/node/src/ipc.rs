use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::dispatcher::Intent;
use crate::error::Result;

/// Default control socket location
pub const DEFAULT_SOCKET: &str = "/tmp/vox.sock";

/// One request on the control socket, sent as a single JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Start a listening session
    Trigger,
    /// Cancel the active session
    Stop,
    /// Send an already-classified intent straight to the bus
    Dispatch { intent: Intent },
}

/// Answer to a [`ControlMessage`], one JSON line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
}

impl ControlReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self {
            ok: false,
            message: message.to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, message: ControlMessage) -> ControlReply;
}

/// Unix socket server for [`ControlMessage`]s
///
/// The socket file is removed on bind if stale, and again on drop.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind to a Unix socket path
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Remove existing socket file if it exists
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        tracing::info!(path = %path.display(), "control socket listening");
        Ok(Self { listener, path })
    }

    /// Get the path this server is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Each connection carries one request and gets one reply.
    pub async fn serve(self, handler: Arc<dyn ControlHandler>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_conn(stream, handler.as_ref()).await {
                                tracing::warn!(error = %e, "control connection failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "control accept failed"),
                },
                () = &mut shutdown => break,
            }
        }

        tracing::info!(path = %self.path.display(), "control socket closed");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_conn(stream: UnixStream, handler: &dyn ControlHandler) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await?;

    let reply = match serde_json::from_str::<ControlMessage>(&line) {
        Ok(message) => {
            tracing::debug!(?message, "control message");
            handler.handle(message).await
        }
        Err(e) => ControlReply::error(format!("invalid control message: {e}")),
    };

    let mut out = serde_json::to_vec(&reply)?;
    out.push(b'\n');
    write.write_all(&out).await?;
    write.shutdown().await?;
    Ok(())
}

/// Send one command to a running daemon and wait for its reply
pub async fn send_command(path: impl AsRef<Path>, message: &ControlMessage) -> Result<ControlReply> {
    let stream = UnixStream::connect(path.as_ref()).await?;
    let (read, mut write) = stream.into_split();

    let mut out = serde_json::to_vec(message)?;
    out.push(b'\n');
    write.write_all(&out).await?;

    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await?;
    Ok(serde_json::from_str(&line)?)
}
