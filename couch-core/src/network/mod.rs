pub mod client;
pub mod host;

pub use client::{ClientExit, ClientSession, ClientStats, ClientTransport, ClientTransportConfig};
pub use host::{
    DEFAULT_CONTROL_PORT, DEFAULT_INPUT_PORT, DEFAULT_VIDEO_PORT, HostAddrs, HostHandle, HostStats,
    HostTransport, HostTransportConfig,
};
