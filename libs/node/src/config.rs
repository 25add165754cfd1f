//! Daemon configuration
//!
//! Loaded from an optional TOML file (`vox.toml` by default). Every field is
//! optional; command-line flags and their environment variables override the
//! file, and built-in defaults fill the rest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vox_core::{is_token, BROADCAST};
use vox_fabric::ClientConfig;

use crate::dispatcher::{default_devices, DeviceRoute};
use crate::error::{Error, Result};
use crate::ipc::DEFAULT_SOCKET;

pub const DEFAULT_CONFIG_FILE: &str = "vox.toml";
pub const DEFAULT_URL: &str = "ws://localhost:8092";
pub const DEFAULT_SHARD: &str = "VOX";
const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// TOML file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Hub endpoint
    pub url: Option<String>,

    /// This node's bus address
    pub shard: Option<String>,

    /// Seconds between reconnect attempts
    pub reconnect_secs: Option<u64>,

    /// Dial and write timeout in seconds; 0 disables
    pub timeout_secs: Option<u64>,

    /// Reply deadline for dispatched intents in seconds; absent or 0 waits forever
    pub request_timeout_secs: Option<u64>,

    /// Control socket path
    pub socket: Option<PathBuf>,

    /// Extra or overriding device routes, keyed by device name
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceRoute>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }
}

/// Values given on the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub url: Option<String>,
    pub shard: Option<String>,
    pub socket: Option<PathBuf>,
}

/// Resolved daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub request_timeout: Option<Duration>,
    pub socket: PathBuf,
    pub devices: BTreeMap<String, DeviceRoute>,
}

impl Config {
    /// Load from `path`, or from `vox.toml` if it exists when no path is given
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                ConfigFile::read(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file, overrides)
    }

    /// Merge file and overrides over defaults, then validate
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Result<Self> {
        let url = overrides
            .url
            .or(file.url)
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let shard = overrides
            .shard
            .or(file.shard)
            .unwrap_or_else(|| DEFAULT_SHARD.to_string());

        validate_url(&url)?;
        validate_shard(&shard)?;
        for (name, route) in &file.devices {
            validate_route(name, route)?;
        }

        let reconnect = file.reconnect_secs.unwrap_or(DEFAULT_RECONNECT_SECS);
        let timeout = file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let client = ClientConfig::new(url, shard)
            .reconnect_delay(Duration::from_secs(reconnect))
            .timeout(non_zero_secs(timeout));

        let mut devices = default_devices();
        devices.extend(file.devices);

        Ok(Self {
            client,
            request_timeout: file.request_timeout_secs.and_then(non_zero_secs),
            socket: overrides
                .socket
                .or(file.socket)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET)),
            devices,
        })
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn validate_url(url: &str) -> Result<()> {
    let scheme_ok = ["ws://", "wss://", "tcp://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if !scheme_ok {
        return Err(Error::config(format!(
            "url {url:?} must start with ws://, wss:// or tcp://"
        )));
    }
    Ok(())
}

fn validate_shard(shard: &str) -> Result<()> {
    if shard == BROADCAST || !is_token(shard) {
        return Err(Error::config(format!(
            "shard {shard:?} is not a valid bus address"
        )));
    }
    Ok(())
}

fn validate_route(name: &str, route: &DeviceRoute) -> Result<()> {
    if !is_token(&route.to) || !is_token(&route.noun) {
        return Err(Error::config(format!(
            "device {name:?} has an invalid route {}:{}",
            route.to, route.noun
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = Config::resolve(ConfigFile::default(), Overrides::default()).unwrap();

        assert_eq!(config.client.url, DEFAULT_URL);
        assert_eq!(config.client.shard, "VOX");
        assert_eq!(config.client.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.client.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.socket, PathBuf::from("/tmp/vox.sock"));
        assert_eq!(config.devices["lamp"], DeviceRoute::new("VERTEX", "LAMP"));
    }

    #[test]
    fn file_values_and_overrides() {
        let file = ConfigFile::parse(
            r#"
            url = "tcp://hub.local:7000"
            shard = "KITCHEN"
            reconnect_secs = 1
            timeout_secs = 0
            request_timeout_secs = 10

            [devices.fan]
            to = "1F"
            noun = "FAN"
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            shard: Some("VOX2".into()),
            ..Overrides::default()
        };

        let config = Config::resolve(file, overrides).unwrap();
        assert_eq!(config.client.url, "tcp://hub.local:7000");
        assert_eq!(config.client.shard, "VOX2");
        assert_eq!(config.client.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.client.timeout, None);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.devices["fan"], DeviceRoute::new("1F", "FAN"));
        assert!(config.devices.contains_key("lamp"));
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vox.toml");
        std::fs::write(&path, "shard = \"DESK\"\nsocket = \"/run/vox.sock\"\n").unwrap();

        let config = Config::load(Some(path.as_path()), Overrides::default()).unwrap();
        assert_eq!(config.client.shard, "DESK");
        assert_eq!(config.socket, PathBuf::from("/run/vox.sock"));

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            Config::load(Some(missing.as_path()), Overrides::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let bad_shards = ["ALL", "", "V X", "a:b"];
        for shard in bad_shards {
            let overrides = Overrides {
                shard: Some(shard.into()),
                ..Overrides::default()
            };
            assert!(
                matches!(
                    Config::resolve(ConfigFile::default(), overrides),
                    Err(Error::Config(_))
                ),
                "shard {shard:?} accepted"
            );
        }

        let overrides = Overrides {
            url: Some("http://hub".into()),
            ..Overrides::default()
        };
        assert!(matches!(
            Config::resolve(ConfigFile::default(), overrides),
            Err(Error::Config(_))
        ));

        assert!(matches!(
            ConfigFile::parse("colour = \"blue\""),
            Err(Error::Toml(_))
        ));
    }
}
