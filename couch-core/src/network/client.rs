//! Client side of the couch transport.
//!
//! ```text
//! Client                                   Host
//!   │──── HELLO(video_port) ────────────────►│  every hello_interval,
//!   │◄─── WELCOME(slot) ─────────────────────│  up to hello_attempts
//!   │◄─── CONTROLLER_ASSIGN(slot) ───────────│
//!   │◄─── VIDEO_CONFIG ──────────────────────│
//!   │                                        │
//!   │──── CONTROLLER_STATE ─────────────────►│  every input_interval
//!   │──── PING ─────────────────────────────►│  every keepalive_interval
//!   │◄─── PONG ──────────────────────────────│
//!   │◄─── VIDEO_FRAME (fragments) ───────────│
//!   │                                        │
//!   │──── DISCONNECT ───────────────────────►│  on quit
//! ```
//!
//! All client traffic leaves from one control socket, so the host sees a
//! single address per client. Video arrives on a second socket whose port
//! is announced in HELLO.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CouchError;
use crate::fragment::{AssemblerStats, EncodedFrame, FrameAssembler};
use crate::message::MessageType;
use crate::network::host::{DEFAULT_CONTROL_PORT, DEFAULT_INPUT_PORT};
use crate::packet::{MAX_DATAGRAM_SIZE, Message};
use crate::protocol::{ControllerState, DisconnectReason, Hello, Slot, VideoConfig, VideoFragment};
use crate::sequence::Seq24;
use crate::state::ClientPhase;

// ── ClientTransportConfig ────────────────────────────────────────

/// Configuration for [`ClientTransport`].
#[derive(Debug, Clone)]
pub struct ClientTransportConfig {
    /// The host's control socket.
    pub host_control: SocketAddr,
    /// The host's input socket.
    pub host_input: SocketAddr,
    /// Local address both client sockets bind to.
    pub bind_ip: IpAddr,
    /// Local port to receive video on (0 = any free port).
    pub video_port: u16,
    /// Delay between HELLO retries.
    pub hello_interval: Duration,
    /// HELLOs sent before giving up.
    pub hello_attempts: u32,
    /// Controller state send period.
    pub input_interval: Duration,
    /// PING period.
    pub keepalive_interval: Duration,
    /// Consecutive unanswered PINGs before the host is declared gone.
    pub max_missed_pongs: u32,
}

impl ClientTransportConfig {
    /// Config for a host on the default ports.
    pub fn for_host(host: IpAddr) -> Self {
        Self::with_addrs(
            SocketAddr::new(host, DEFAULT_CONTROL_PORT),
            SocketAddr::new(host, DEFAULT_INPUT_PORT),
        )
    }

    pub fn with_addrs(host_control: SocketAddr, host_input: SocketAddr) -> Self {
        Self {
            host_control,
            host_input,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            video_port: 0,
            hello_interval: Duration::from_millis(250),
            hello_attempts: 20,
            input_interval: Duration::from_secs(1) / 120,
            keepalive_interval: Duration::from_secs(2),
            max_missed_pongs: 3,
        }
    }
}

// ── Results ──────────────────────────────────────────────────────

/// Why [`ClientSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The local user quit; DISCONNECT was sent.
    Quit,
    /// The host stopped answering keepalives.
    KeepaliveTimeout,
    /// The host ended the session.
    HostClosed(DisconnectReason),
}

impl std::fmt::Display for ClientExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quit => write!(f, "quit"),
            Self::KeepaliveTimeout => write!(f, "host not responding"),
            Self::HostClosed(reason) => write!(f, "host closed the session ({reason})"),
        }
    }
}

/// Receive-side counters, published on a watch channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    /// Frames the decoder channel had no room for.
    pub frames_dropped: u64,
    pub fragments_received: u64,
    /// Video sequence numbers that never arrived.
    pub fragments_lost: u64,
    pub assembler: AssemblerStats,
}

// ── ClientTransport ──────────────────────────────────────────────

/// Entry point for joining a host.
pub struct ClientTransport;

impl ClientTransport {
    /// Bind local sockets and perform the HELLO / WELCOME handshake.
    ///
    /// Returns [`CouchError::ServerFull`] when the host has no free slot and
    /// [`CouchError::HandshakeFailed`] when no WELCOME arrives within the
    /// retry budget.
    pub async fn connect(config: ClientTransportConfig) -> Result<ClientSession, CouchError> {
        let control = UdpSocket::bind(SocketAddr::new(config.bind_ip, 0)).await?;
        let video = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.video_port)).await?;
        let video_port = video.local_addr()?.port();

        let mut phase = ClientPhase::default();
        phase.begin_connect()?;

        let mut hello_seq = Seq24::ZERO;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("connecting to {}", config.host_control);

        let slot = 'attempts: loop {
            let attempt = phase.record_attempt()?;
            if attempt > config.hello_attempts {
                phase.disconnect()?;
                return Err(CouchError::HandshakeFailed {
                    attempts: config.hello_attempts,
                });
            }

            let hello = Hello::new(video_port).into_message(hello_seq.take_next());
            if let Err(e) = control.send_to(&hello.encode(), config.host_control).await {
                warn!("hello {attempt} not sent: {e}");
            } else {
                debug!(attempt, "hello sent");
            }

            let deadline = tokio::time::Instant::now() + config.hello_interval;
            loop {
                let (len, from) =
                    match tokio::time::timeout_at(deadline, control.recv_from(&mut buf)).await {
                        Err(_) => continue 'attempts,
                        Ok(Err(e)) => {
                            debug!("receive error during handshake: {e}");
                            continue;
                        }
                        Ok(Ok(received)) => received,
                    };
                if from.ip() != config.host_control.ip() {
                    continue;
                }

                let msg = match Message::decode(&buf[..len]) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%from, "dropping datagram: {e}");
                        continue;
                    }
                };
                match msg.message_type() {
                    MessageType::Welcome => match Slot::from_payload(MessageType::Welcome, msg.payload()) {
                        Ok(slot) => break 'attempts slot,
                        Err(e) => warn!("malformed welcome: {e}"),
                    },
                    MessageType::Disconnect => {
                        let reason = DisconnectReason::from_bytes(msg.payload())
                            .unwrap_or(DisconnectReason::Requested);
                        if reason == DisconnectReason::ServerFull {
                            phase.disconnect()?;
                            warn!("host {} is full", config.host_control);
                            return Err(CouchError::ServerFull);
                        }
                        debug!("ignoring disconnect ({reason}) during handshake");
                    }
                    other => debug!("ignoring {other} during handshake"),
                }
            }
        };

        phase.activate(slot)?;
        info!("connected to {} on {slot}", config.host_control);

        let (slot_tx, _) = watch::channel(slot);
        let (video_config_tx, _) = watch::channel(None);
        let (stats_tx, _) = watch::channel(ClientStats::default());

        Ok(ClientSession {
            control,
            video,
            config,
            phase,
            slot_tx,
            video_config_tx,
            stats_tx,
            cancel: CancellationToken::new(),
        })
    }
}

// ── ClientSession ────────────────────────────────────────────────

/// An established session with a host.
pub struct ClientSession {
    control: UdpSocket,
    video: UdpSocket,
    config: ClientTransportConfig,
    phase: ClientPhase,
    slot_tx: watch::Sender<Slot>,
    video_config_tx: watch::Sender<Option<VideoConfig>>,
    stats_tx: watch::Sender<ClientStats>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("control", &self.control.local_addr().ok())
            .field("video", &self.video.local_addr().ok())
            .field("host", &self.config.host_control)
            .field("slot", &*self.slot_tx.borrow())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Control,
    Video,
}

impl ClientSession {
    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    /// The slot currently assigned by the host.
    pub fn slot(&self) -> Slot {
        *self.slot_tx.borrow()
    }

    /// Follows CONTROLLER_ASSIGN updates.
    pub fn slot_watch(&self) -> watch::Receiver<Slot> {
        self.slot_tx.subscribe()
    }

    /// Follows VIDEO_CONFIG announcements.
    pub fn video_config_watch(&self) -> watch::Receiver<Option<VideoConfig>> {
        self.video_config_tx.subscribe()
    }

    pub fn stats_watch(&self) -> watch::Receiver<ClientStats> {
        self.stats_tx.subscribe()
    }

    /// Cancel this token to leave the session; `run` then sends DISCONNECT
    /// and returns [`ClientExit::Quit`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Local addresses of the control and video sockets.
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr), CouchError> {
        Ok((self.control.local_addr()?, self.video.local_addr()?))
    }

    /// Drive the session until quit, keepalive timeout or host disconnect.
    ///
    /// `input` is sampled every input interval; the latest value is sent
    /// whether or not it changed. Completed frames go to `frames` with
    /// `try_send`, so a slow decoder loses frames instead of stalling the
    /// receive loop.
    pub async fn run(
        mut self,
        input: watch::Receiver<ControllerState>,
        frames: mpsc::Sender<EncodedFrame>,
    ) -> Result<ClientExit, CouchError> {
        let pong_seen = AtomicBool::new(true);

        let exit = tokio::select! {
            never = self.input_loop(input) => match never {},
            exit = self.keepalive_loop(&pong_seen) => Ok(exit),
            exit = self.receive_loop(&pong_seen, &frames) => exit,
            _ = self.cancel.cancelled() => Ok(ClientExit::Quit),
        };

        if !matches!(exit, Ok(ClientExit::HostClosed(_))) {
            let bye = DisconnectReason::Requested.into_message(Seq24::ZERO);
            if let Err(e) = self.control.send_to(&bye.encode(), self.config.host_control).await {
                warn!("disconnect not sent: {e}");
            }
        }

        self.phase.disconnect()?;
        match &exit {
            Ok(reason) => info!("session ended: {reason}"),
            Err(e) => warn!("session ended with error: {e}"),
        }
        exit
    }

    // ── Loops ────────────────────────────────────────────────────

    async fn input_loop(&self, input: watch::Receiver<ControllerState>) -> Infallible {
        let mut ticker = tokio::time::interval(self.config.input_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seq = Seq24::ZERO;

        loop {
            ticker.tick().await;
            let state = *input.borrow();
            let msg = state.into_message(seq.take_next());
            if let Err(e) = self.control.send_to(&msg.encode(), self.config.host_input).await {
                warn!("controller state not sent: {e}");
            }
        }
    }

    async fn keepalive_loop(&self, pong_seen: &AtomicBool) -> ClientExit {
        let mut ticker = tokio::time::interval(self.config.keepalive_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq = Seq24::ZERO;
        let mut missed = 0u32;

        loop {
            ticker.tick().await;
            if pong_seen.swap(false, Ordering::AcqRel) {
                missed = 0;
            } else {
                missed += 1;
                debug!(missed, "no pong since last ping");
                if missed >= self.config.max_missed_pongs {
                    warn!("host stopped answering after {missed} keepalives");
                    return ClientExit::KeepaliveTimeout;
                }
            }

            let ping = Message::empty(MessageType::Ping, seq.take_next());
            if let Err(e) = self.control.send_to(&ping.encode(), self.config.host_control).await {
                warn!("ping not sent: {e}");
            }
        }
    }

    async fn receive_loop(
        &self,
        pong_seen: &AtomicBool,
        frames: &mpsc::Sender<EncodedFrame>,
    ) -> Result<ClientExit, CouchError> {
        let mut control_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut video_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut assembler = FrameAssembler::new();
        let mut stats = ClientStats::default();
        let mut last_video_seq: Option<Seq24> = None;

        loop {
            let (source, received) = tokio::select! {
                r = self.control.recv_from(&mut control_buf) => (Source::Control, r),
                r = self.video.recv_from(&mut video_buf) => (Source::Video, r),
            };
            let (len, from) = match received {
                Ok(received) => received,
                Err(e) => {
                    debug!("receive error: {e}");
                    continue;
                }
            };
            if from.ip() != self.config.host_control.ip() {
                debug!(%from, "ignoring datagram from unknown sender");
                continue;
            }
            let datagram = match source {
                Source::Control => &control_buf[..len],
                Source::Video => &video_buf[..len],
            };

            let msg = match Message::decode(datagram) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(%from, "dropping datagram: {e}");
                    continue;
                }
            };

            match msg.message_type() {
                MessageType::Pong => pong_seen.store(true, Ordering::Release),
                MessageType::Ping => {
                    let pong = Message::empty(MessageType::Pong, msg.sequence());
                    if let Err(e) = self.control.send_to(&pong.encode(), from).await {
                        warn!("pong not sent: {e}");
                    }
                }
                kind @ (MessageType::Welcome | MessageType::ControllerAssign) => {
                    match Slot::from_payload(kind, msg.payload()) {
                        Ok(slot) => {
                            let previous = self.slot_tx.send_replace(slot);
                            if previous != slot {
                                info!("host assigned {slot}");
                            }
                        }
                        Err(e) => warn!("dropping {kind}: {e}"),
                    }
                }
                MessageType::VideoConfig => match VideoConfig::from_bytes(msg.payload()) {
                    Ok(config) => {
                        info!(
                            codec = %config.codec_name(),
                            width = config.width,
                            height = config.height,
                            fps = config.fps,
                            "video config received"
                        );
                        self.video_config_tx.send_replace(Some(config));
                    }
                    Err(e) => warn!("dropping video config: {e}"),
                },
                MessageType::Disconnect => {
                    let reason = DisconnectReason::from_bytes(msg.payload())
                        .unwrap_or(DisconnectReason::Requested);
                    return Ok(ClientExit::HostClosed(reason));
                }
                MessageType::VideoFrame => {
                    let fragment = match VideoFragment::from_payload(msg.payload()) {
                        Ok(fragment) => fragment,
                        Err(e) => {
                            warn!("dropping video fragment: {e}");
                            continue;
                        }
                    };

                    stats.fragments_received += 1;
                    let seq = msg.sequence();
                    match last_video_seq {
                        Some(prev) if seq.is_newer_than(prev) => {
                            stats.fragments_lost += u64::from(seq.gap_since(prev));
                            last_video_seq = Some(seq);
                        }
                        Some(_) => trace!(%seq, "reordered video fragment"),
                        None => last_video_seq = Some(seq),
                    }

                    if let Some(frame) = assembler.push(fragment) {
                        stats.frames_received += 1;
                        stats.bytes_received += frame.len() as u64;
                        match frames.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(frame)) => {
                                stats.frames_dropped += 1;
                                debug!(frame_id = frame.frame_id, "decoder busy, frame dropped");
                            }
                            Err(TrySendError::Closed(_)) => return Err(CouchError::ChannelClosed),
                        }
                        stats.assembler = assembler.stats();
                        self.stats_tx.send_replace(stats);
                    }
                }
                other => debug!("ignoring unexpected {other} from host"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = ClientTransportConfig::for_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.host_control.port(), 7777);
        assert_eq!(config.host_input.port(), 7779);
        assert_eq!(config.hello_attempts, 20);
        assert_eq!(config.keepalive_interval, Duration::from_secs(2));
        assert_eq!(config.max_missed_pongs, 3);
        assert!(config.input_interval < Duration::from_millis(9));
    }

    #[test]
    fn exit_display() {
        assert_eq!(
            ClientExit::HostClosed(DisconnectReason::Shutdown).to_string(),
            "host closed the session (host shutdown)"
        );
        assert_eq!(ClientExit::KeepaliveTimeout.to_string(), "host not responding");
    }

    #[tokio::test]
    async fn handshake_gives_up_after_budget() {
        // A bound socket that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let mut config = ClientTransportConfig::with_addrs(addr, addr);
        config.bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.hello_interval = Duration::from_millis(20);
        config.hello_attempts = 3;

        let result = ClientTransport::connect(config).await;
        assert!(matches!(
            result,
            Err(CouchError::HandshakeFailed { attempts: 3 })
        ));

        // Every attempt reached the host.
        let mut buf = [0u8; 64];
        for _ in 0..3 {
            let (len, _) = silent.recv_from(&mut buf).await.unwrap();
            let msg = Message::decode(&buf[..len]).unwrap();
            assert_eq!(msg.message_type(), MessageType::Hello);
        }
    }
}
