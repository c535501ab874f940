//! Configuration for the couch host service.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use couch_core::{CouchError, HostTransportConfig, MAX_SLOTS, VideoConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Session liveness settings.
    pub session: SessionConfig,
    /// Video stream settings.
    pub video: VideoSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind all sockets to.
    pub bind: String,
    /// UDP port for handshake and keepalive.
    pub control_port: u16,
    /// UDP port for controller input.
    pub input_port: u16,
    /// UDP port video is sent from.
    pub video_port: u16,
    /// Maximum concurrent clients (1..=4).
    pub max_clients: usize,
    /// Datagram size budget for video fragments.
    pub mtu: usize,
}

/// Session liveness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close a session after this many milliseconds without traffic.
    pub timeout_ms: u64,
    /// How often idle sessions are swept, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Seconds between status log lines (0 disables).
    pub status_interval_secs: u64,
}

/// Video stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Four-character codec tag announced to clients.
    pub codec: String,
    pub width: u16,
    pub height: u16,
    /// Target frames per second.
    pub fps: u16,
    /// Target bitrate in kilobits per second.
    pub bitrate_kbps: u32,
    /// Stream a synthetic test pattern when no encoder is attached.
    pub test_pattern: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let transport = HostTransportConfig::default();
        Self {
            bind: "0.0.0.0".into(),
            control_port: transport.control_port,
            input_port: transport.input_port,
            video_port: transport.video_port,
            max_clients: MAX_SLOTS,
            mtu: transport.mtu,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            sweep_interval_ms: 1_000,
            status_interval_secs: 5,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        let video = VideoConfig::default();
        Self {
            codec: video.codec_name(),
            width: video.width,
            height: video.height,
            fps: video.fps,
            bitrate_kbps: video.bitrate_kbps,
            test_pattern: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
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

    /// The announced stream parameters, with fps clamped to 1..=240.
    pub fn video_config(&self) -> VideoConfig {
        let mut codec = *b"    ";
        for (dst, src) in codec.iter_mut().zip(self.video.codec.bytes()) {
            *dst = src;
        }
        VideoConfig {
            codec,
            width: self.video.width,
            height: self.video.height,
            fps: self.video.fps.clamp(1, 240),
            bitrate_kbps: self.video.bitrate_kbps,
        }
    }

    /// Convert into the transport's configuration, clamping out-of-range
    /// values.
    pub fn to_transport_config(&self) -> Result<HostTransportConfig, CouchError> {
        let bind_ip: IpAddr = self.network.bind.parse().map_err(|e| {
            CouchError::InvalidConfig(format!("bind address {:?}: {e}", self.network.bind))
        })?;

        Ok(HostTransportConfig {
            bind_ip,
            control_port: self.network.control_port,
            input_port: self.network.input_port,
            video_port: self.network.video_port,
            max_clients: self.network.max_clients.clamp(1, MAX_SLOTS),
            session_timeout: Duration::from_millis(self.session.timeout_ms.max(100)),
            sweep_interval: Duration::from_millis(self.session.sweep_interval_ms.max(10)),
            mtu: self.network.mtu.clamp(64, couch_core::MAX_DATAGRAM_SIZE),
            video: Some(self.video_config()),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
