use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vox_core::Message;
use vox_fabric::{Client, Payload};

use crate::error::{Error, Result};

/// A classified utterance, as produced by the intent classifier
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Intent {
    /// Canonical snake_case intent, e.g. `turn_on`
    pub intent: String,

    /// Named arguments such as `device` or `brightness`
    #[serde(default)]
    pub entities: BTreeMap<String, serde_json::Value>,

    /// The original utterance
    #[serde(default)]
    pub query: String,
}

impl Intent {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    /// Entity value as a bus token; `null` counts as absent
    pub fn entity(&self, key: &str) -> Option<String> {
        match self.entities.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Where a named device lives on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRoute {
    /// Destination node
    pub to: String,
    /// Noun the node knows the device by
    pub noun: String,
}

impl DeviceRoute {
    pub fn new(to: impl Into<String>, noun: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            noun: noun.into(),
        }
    }
}

/// Devices known without any configuration
pub fn default_devices() -> BTreeMap<String, DeviceRoute> {
    BTreeMap::from([("lamp".to_string(), DeviceRoute::new("VERTEX", "LAMP"))])
}

/// Turns intents into bus requests and replies into outcomes
pub struct Dispatcher {
    client: Arc<Client>,
    devices: BTreeMap<String, DeviceRoute>,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<Client>,
        devices: BTreeMap<String, DeviceRoute>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            devices,
            request_timeout,
        }
    }

    /// Build the `{destination, verb, noun, args...}` tokens for an intent
    pub fn route(&self, intent: &Intent) -> Result<Payload> {
        let (verb, args) = match intent.intent.as_str() {
            "turn_on" => ("ON", Vec::new()),
            "turn_off" => ("OFF", Vec::new()),
            "set_brightness" => {
                let level = intent
                    .entity("brightness")
                    .ok_or(Error::MissingEntity("brightness"))?;
                ("SET", vec![level])
            }
            other => return Err(Error::UnknownIntent(other.to_string())),
        };

        let device = intent
            .entity("device")
            .ok_or(Error::MissingEntity("device"))?;
        let route = self
            .devices
            .get(&device)
            .ok_or_else(|| Error::UnknownDevice(device.clone()))?;

        let mut tokens = vec![route.to.clone(), verb.to_string(), route.noun.clone()];
        tokens.extend(args);
        Ok(Payload::Tokens(tokens))
    }

    /// Send the request for `intent` and wait for the bus reply
    pub async fn dispatch(&self, intent: &Intent) -> Result<String> {
        let payload = self.route(intent)?;
        tracing::info!(intent = intent.intent.as_str(), ?payload, "dispatching intent");

        let reply = match self.request_timeout {
            Some(deadline) => self.client.transmit_receive_within(payload, deadline).await?,
            None => self.client.transmit_receive(payload).await?,
        };
        interpret(reply)
    }
}

/// `ERR` replies become [`Error::Rejected`]; anything else is reported as
/// its encoded form
pub fn interpret(reply: Message) -> Result<String> {
    if reply.is_err() {
        return Err(Error::Rejected {
            reason: reply.noun,
            detail: reply.args,
        });
    }
    Ok(reply.to_string())
}
