//! Client configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use couch_core::network::{DEFAULT_CONTROL_PORT, DEFAULT_INPUT_PORT};
use couch_core::{ClientTransportConfig, CouchError};

use crate::keyboard::Layout;

/// Fastest input rate the client will send at.
const MAX_POLL_RATE_HZ: u32 = 1000;

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Keyboard input settings.
    pub input: InputConfig,
    /// Keepalive settings.
    pub keepalive: KeepaliveConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host IP address.
    pub host: String,
    /// Host control port.
    pub control_port: u16,
    /// Host input port.
    pub input_port: u16,
    /// Local port to receive video on (0 = any).
    pub video_port: u16,
    /// Milliseconds between HELLO retries.
    pub hello_interval_ms: u64,
    /// HELLOs sent before giving up.
    pub hello_attempts: u32,
}

/// Keyboard input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Controller states sent per second.
    pub poll_rate_hz: u32,
    /// How long a key counts as held after its last press event, for
    /// terminals that do not report key releases.
    pub key_hold_ms: u64,
    /// Key layout: "wasd" or "arrows".
    pub layout: Layout,
}

/// Keepalive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Milliseconds between PINGs.
    pub interval_ms: u64,
    /// Unanswered PINGs before the host is considered gone.
    pub max_missed: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Log file. The terminal is in raw mode while playing, so an empty
    /// value discards log output.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            control_port: DEFAULT_CONTROL_PORT,
            input_port: DEFAULT_INPUT_PORT,
            video_port: 0,
            hello_interval_ms: 250,
            hello_attempts: 20,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: 120,
            key_hold_ms: 150,
            layout: Layout::Wasd,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            max_missed: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: "couch-client.log".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Input period derived from the poll rate (1..=1000 Hz).
    pub fn input_interval(&self) -> Duration {
        Duration::from_secs(1) / self.input.poll_rate_hz.clamp(1, MAX_POLL_RATE_HZ)
    }

    pub fn key_hold(&self) -> Duration {
        Duration::from_millis(self.input.key_hold_ms)
    }

    /// Build the transport configuration, clamping out-of-range values.
    pub fn to_transport_config(&self) -> Result<ClientTransportConfig, CouchError> {
        let host: IpAddr = self.network.host.parse().map_err(|e| {
            CouchError::InvalidConfig(format!("host address {:?}: {e}", self.network.host))
        })?;

        let mut config = ClientTransportConfig::with_addrs(
            SocketAddr::new(host, self.network.control_port),
            SocketAddr::new(host, self.network.input_port),
        );
        config.video_port = self.network.video_port;
        config.hello_interval = Duration::from_millis(self.network.hello_interval_ms.max(10));
        config.hello_attempts = self.network.hello_attempts.max(1);
        config.input_interval = self.input_interval();
        config.keepalive_interval = Duration::from_millis(self.keepalive.interval_ms.max(100));
        config.max_missed_pongs = self.keepalive.max_missed.max(1);
        Ok(config)
    }
}

// ── Tests ────────────────────────────────────────────────────────
