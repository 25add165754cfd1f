//! Vox Node - the voice-assistant daemon on the control bus
//!
//! Wires a [`vox_fabric::Client`] to an intent [`Dispatcher`], a
//! [`SessionManager`] that tracks the single listening session, and a Unix
//! control socket that `vox-ctl` talks to.

pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod session;

pub use config::{Config, Overrides};
pub use daemon::Daemon;
pub use dispatcher::{DeviceRoute, Dispatcher, Intent};
pub use error::{Error, Result};
pub use ipc::{send_command, ControlHandler, ControlMessage, ControlReply, ControlServer};
pub use pipeline::SpeechPipeline;
pub use session::{Cancellation, Session, SessionManager, SessionState};
