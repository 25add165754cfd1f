//! Vox Fabric - control-bus transport and protocol client
//!
//! Provides a self-healing transport (WebSocket, newline TCP, in-memory), the
//! colon-line codec, and the [`Client`] that correlates one request with its
//! reply and hands every other self-addressed message to a callback.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vox_fabric::{Client, ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("ws://localhost:8092", "VOX");
//! let client = Arc::new(Client::connect(config).await?);
//! client.on_unsolicited(|msg| println!("unsolicited: {msg}"));
//! let reader = client.spawn();
//!
//! // Request/response: sends "VERTEX:ON:LAMP:VOX"
//! let reply = client.transmit_receive(["VERTEX", "ON", "LAMP"]).await?;
//! println!("{reply}");
//!
//! // Fire-and-forget
//! client.transmit("VERTEX:OFF:LAMP").await?;
//!
//! client.close().await?;
//! reader.await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod request;
pub mod transport;

// Re-exports for convenience
pub use channel::{Client, ClientConfig, Handler};
pub use error::{Error, Result};
pub use request::Payload;
pub use vox_core::Message;
