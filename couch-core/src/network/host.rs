//! Host side of the couch transport.
//!
//! The host listens on three UDP sockets:
//!
//! ```text
//! control (7777)  HELLO / PING / DISCONNECT in, WELCOME / ASSIGN / PONG out
//! input   (7779)  CONTROLLER_STATE in
//! video   (7778)  VIDEO_FRAME out
//! ```
//!
//! Both receive sockets share one dispatcher, the message type decides what
//! happens. [`HostTransport::run`] owns four tasks: two receive loops, the
//! liveness sweep and the video broadcast loop fed by the encoder.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::CouchError;
use crate::fragment::{DEFAULT_MTU, EncodedFrame, Fragmenter};
use crate::message::MessageType;
use crate::packet::{MAX_DATAGRAM_SIZE, Message};
use crate::protocol::{ControllerState, DisconnectReason, Hello, MAX_SLOTS, Slot, VideoConfig};
use crate::sequence::Seq24;
use crate::sink::VirtualControllerSink;
use crate::state::{InputOutcome, SessionInfo, SessionState, SessionTable};

// ── Constants ────────────────────────────────────────────────────

pub const DEFAULT_CONTROL_PORT: u16 = 7777;
pub const DEFAULT_VIDEO_PORT: u16 = 7778;
pub const DEFAULT_INPUT_PORT: u16 = 7779;

/// Host replies that are not echoes carry this sequence number.
const CONTROL_SEQUENCE: Seq24 = Seq24::ZERO;

// ── HostTransportConfig ──────────────────────────────────────────

/// Configuration for [`HostTransport`].
#[derive(Debug, Clone)]
pub struct HostTransportConfig {
    /// Address all three sockets bind to.
    pub bind_ip: IpAddr,
    pub control_port: u16,
    pub input_port: u16,
    pub video_port: u16,
    /// Concurrent sessions allowed (1..=4).
    pub max_clients: usize,
    /// A session silent for longer than this is closed.
    pub session_timeout: Duration,
    /// How often the liveness sweep runs.
    pub sweep_interval: Duration,
    /// Datagram budget for video fragments.
    pub mtu: usize,
    /// Stream parameters announced to clients on join, if known.
    pub video: Option<VideoConfig>,
}

impl Default for HostTransportConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            control_port: DEFAULT_CONTROL_PORT,
            input_port: DEFAULT_INPUT_PORT,
            video_port: DEFAULT_VIDEO_PORT,
            max_clients: MAX_SLOTS,
            session_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            mtu: DEFAULT_MTU,
            video: None,
        }
    }
}

impl HostTransportConfig {
    /// Loopback config with OS-assigned ports, for tests and local runs.
    pub fn localhost() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            control_port: 0,
            input_port: 0,
            video_port: 0,
            ..Self::default()
        }
    }
}

/// Where the host's sockets actually ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAddrs {
    pub control: SocketAddr,
    pub input: SocketAddr,
    pub video: SocketAddr,
}

// ── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HostCounters {
    frames_sent: AtomicU64,
    fragments_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of the host's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Frames broadcast to at least one client.
    pub frames_sent: u64,
    pub fragments_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    /// Datagrams dropped because they failed to decode.
    pub decode_errors: u64,
}

impl HostCounters {
    fn snapshot(&self) -> HostStats {
        HostStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Listener {
    Control,
    Input,
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Input => write!(f, "input"),
        }
    }
}

struct HostShared {
    control: UdpSocket,
    input: UdpSocket,
    video: UdpSocket,
    sessions: Mutex<SessionTable>,
    video_config: Mutex<Option<VideoConfig>>,
    counters: HostCounters,
    cancel: CancellationToken,
}

impl HostShared {
    /// Lock the session table. Callers must drop the guard before awaiting.
    fn table(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_video_config(&self) -> Option<VideoConfig> {
        *self.video_config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn socket(&self, listener: Listener) -> &UdpSocket {
        match listener {
            Listener::Control => &self.control,
            Listener::Input => &self.input,
        }
    }

    /// Send one control message. Failures are logged and counted, never
    /// propagated: one unreachable client must not stall the others.
    async fn send(&self, socket: &UdpSocket, msg: &Message, to: SocketAddr) -> bool {
        match socket.send_to(&msg.encode(), to).await {
            Ok(_) => true,
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!(%to, "failed to send {}: {e}", msg.message_type());
                false
            }
        }
    }
}

// ── HostHandle ───────────────────────────────────────────────────

/// Cloneable handle for controlling a running [`HostTransport`].
#[derive(Clone)]
pub struct HostHandle {
    shared: Arc<HostShared>,
}

impl HostHandle {
    /// Store new stream parameters and announce them to every active client.
    pub async fn set_video_config(&self, config: VideoConfig) {
        *self
            .shared
            .video_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config);

        let targets: Vec<SocketAddr> = self
            .shared
            .table()
            .snapshot()
            .into_iter()
            .filter(|s| s.state == SessionState::Active)
            .map(|s| s.address)
            .collect();

        info!(
            codec = %config.codec_name(),
            width = config.width,
            height = config.height,
            fps = config.fps,
            "video config updated"
        );
        let msg = config.into_message(CONTROL_SEQUENCE);
        for to in targets {
            self.shared.send(&self.shared.control, &msg, to).await;
        }
    }

    pub fn video_config(&self) -> Option<VideoConfig> {
        self.shared.current_video_config()
    }

    /// Status view of every session.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.table().snapshot()
    }

    pub fn stats(&self) -> HostStats {
        self.shared.counters.snapshot()
    }

    /// Ask the transport to stop. [`HostTransport::run`] then disconnects
    /// every client and returns.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Token that fires when the transport is shutting down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

// ── HostTransport ────────────────────────────────────────────────

/// Host-side session and streaming transport.
///
/// # Lifetime
///
/// [`bind`](Self::bind) the sockets, take a [`handle`](Self::handle), then
/// [`run`](Self::run) until the handle's `shutdown` is called or the frame
/// channel closes.
pub struct HostTransport {
    shared: Arc<HostShared>,
    config: HostTransportConfig,
}

impl HostTransport {
    /// Bind the control, input and video sockets.
    pub async fn bind(
        config: HostTransportConfig,
        sink: Arc<dyn VirtualControllerSink>,
    ) -> Result<Self, CouchError> {
        let control = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.control_port)).await?;
        let input = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.input_port)).await?;
        let video = UdpSocket::bind(SocketAddr::new(config.bind_ip, config.video_port)).await?;

        let shared = HostShared {
            control,
            input,
            video,
            sessions: Mutex::new(SessionTable::new(config.max_clients, sink)),
            video_config: Mutex::new(config.video),
            counters: HostCounters::default(),
            cancel: CancellationToken::new(),
        };

        Ok(Self {
            shared: Arc::new(shared),
            config,
        })
    }

    pub fn local_addrs(&self) -> Result<HostAddrs, CouchError> {
        Ok(HostAddrs {
            control: self.shared.control.local_addr()?,
            input: self.shared.input.local_addr()?,
            video: self.shared.video.local_addr()?,
        })
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run until shutdown or until `frames` closes.
    ///
    /// On the way out every client is sent DISCONNECT(shutdown) and every
    /// slot is zeroed.
    pub async fn run(self, frames: mpsc::Receiver<EncodedFrame>) -> Result<(), CouchError> {
        let addrs = self.local_addrs()?;
        info!(
            "host listening: control {}, input {}, video {} ({} slots)",
            addrs.control, addrs.input, addrs.video, self.config.max_clients
        );

        let control = tokio::spawn(receive_loop(Arc::clone(&self.shared), Listener::Control));
        let input = tokio::spawn(receive_loop(Arc::clone(&self.shared), Listener::Input));
        let sweep = tokio::spawn(sweep_loop(
            Arc::clone(&self.shared),
            self.config.sweep_interval,
            self.config.session_timeout,
        ));

        video_loop(&self.shared, frames, Fragmenter::for_mtu(self.config.mtu)).await;

        self.shared.cancel.cancel();
        for (name, task) in [("control", control), ("input", input), ("sweep", sweep)] {
            if let Err(e) = task.await {
                warn!("{name} task ended abnormally: {e}");
            }
        }

        disconnect_everyone(&self.shared).await;
        info!("host transport stopped");
        Ok(())
    }
}

// ── Receive loops ────────────────────────────────────────────────

async fn receive_loop(shared: Arc<HostShared>, listener: Listener) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            r = shared.socket(listener).recv_from(&mut buf) => r,
        };

        match received {
            Ok((len, from)) => dispatch(&shared, listener, from, &buf[..len]).await,
            // ICMP errors from a vanished client surface here on some
            // platforms. They concern one peer, not the socket.
            Err(e) => warn!("{listener} receive error: {e}"),
        }
    }
    debug!("{listener} receive loop stopped");
}

async fn dispatch(shared: &HostShared, listener: Listener, from: SocketAddr, datagram: &[u8]) {
    let msg = match Message::decode(datagram) {
        Ok(msg) => msg,
        Err(e) => {
            shared.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%from, "{listener}: dropping datagram: {e}");
            return;
        }
    };
    trace!(%from, "{listener}: {msg:?}");

    let socket = shared.socket(listener);
    match msg.message_type() {
        MessageType::Hello => handle_hello(shared, socket, from, &msg).await,
        MessageType::Ping => {
            let known = shared.table().touch(from, Instant::now());
            if known {
                let pong = Message::empty(MessageType::Pong, msg.sequence());
                shared.send(socket, &pong, from).await;
            }
        }
        MessageType::ControllerState => handle_input(shared, from, &msg),
        MessageType::Disconnect => {
            let closed = shared.table().disconnect(from, DisconnectReason::Requested);
            if closed.is_none() {
                debug!(%from, "disconnect from unknown peer");
            }
        }
        other => debug!(%from, "ignoring unexpected {other} on {listener}"),
    }
}

async fn handle_hello(shared: &HostShared, socket: &UdpSocket, from: SocketAddr, msg: &Message) {
    let hello = match Hello::from_bytes(msg.payload()) {
        Ok(hello) => hello,
        Err(e) => {
            shared.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%from, "malformed hello: {e}");
            return;
        }
    };

    let video_address = match hello.video_port {
        0 => from,
        port => SocketAddr::new(from.ip(), port),
    };

    let registration = shared.table().register(from, video_address, Instant::now());
    let slot: Slot = match registration {
        Ok(reg) => reg.slot,
        Err(CouchError::ServerFull) => {
            let reject = DisconnectReason::ServerFull.into_message(CONTROL_SEQUENCE);
            shared.send(socket, &reject, from).await;
            return;
        }
        Err(e) => {
            warn!(%from, "hello rejected: {e}");
            return;
        }
    };

    shared
        .send(socket, &slot.into_message(MessageType::Welcome, CONTROL_SEQUENCE), from)
        .await;
    shared
        .send(
            socket,
            &slot.into_message(MessageType::ControllerAssign, CONTROL_SEQUENCE),
            from,
        )
        .await;
    if let Some(config) = shared.current_video_config() {
        shared
            .send(socket, &config.into_message(CONTROL_SEQUENCE), from)
            .await;
    }

    shared.table().activate(from);
}

fn handle_input(shared: &HostShared, from: SocketAddr, msg: &Message) {
    let state = match ControllerState::from_bytes(msg.payload()) {
        Ok(state) => state,
        Err(e) => {
            shared.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%from, "dropping controller state: {e}");
            return;
        }
    };

    let outcome = shared
        .table()
        .apply_input(from, msg.sequence(), &state, Instant::now());
    match outcome {
        InputOutcome::Applied { slot, lost } if lost > 0 => {
            debug!(%from, %slot, lost, "input records lost")
        }
        InputOutcome::Applied { .. } => {}
        InputOutcome::Stale => trace!(%from, seq = %msg.sequence(), "stale input dropped"),
        InputOutcome::NotActive => debug!(%from, "input before handshake completed"),
        InputOutcome::UnknownSession => debug!(%from, "input from unknown peer"),
    }
}

// ── Sweep ────────────────────────────────────────────────────────

async fn sweep_loop(shared: Arc<HostShared>, every: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let closed = shared.table().sweep(Instant::now(), timeout);
        let notice = DisconnectReason::Timeout.into_message(CONTROL_SEQUENCE);
        for session in closed {
            // Best effort: the client is probably gone already.
            shared.send(&shared.control, &notice, session.address).await;
        }
    }
}

// ── Video ────────────────────────────────────────────────────────

async fn video_loop(
    shared: &HostShared,
    mut frames: mpsc::Receiver<EncodedFrame>,
    fragmenter: Fragmenter,
) {
    let mut datagram = BytesMut::with_capacity(MAX_DATAGRAM_SIZE);
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    info!("frame source closed");
                    break;
                }
            },
        };
        broadcast_frame(shared, &fragmenter, &frame, &mut datagram).await;
    }
}

/// Split `frame` once and send every fragment to every active client.
async fn broadcast_frame(
    shared: &HostShared,
    fragmenter: &Fragmenter,
    frame: &EncodedFrame,
    datagram: &mut BytesMut,
) {
    let fragments = match fragmenter.split(frame.frame_id, &frame.data) {
        Ok(fragments) => fragments,
        Err(e) => {
            warn!(frame_id = frame.frame_id, "dropping frame: {e}");
            return;
        }
    };

    let payloads: Vec<Bytes> = fragments
        .iter()
        .map(|f| {
            let mut payload = BytesMut::with_capacity(f.encoded_len());
            f.encode_payload(&mut payload);
            payload.freeze()
        })
        .collect();

    let targets = shared.table().reserve_video_sequences(payloads.len() as u32);
    if targets.is_empty() {
        return;
    }

    // A failing client loses the rest of this frame; the others still get it.
    for (to, first) in targets {
        if let Err(e) = send_fragments(shared, to, first, &payloads, datagram).await {
            shared.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%to, frame_id = frame.frame_id, "video send failed: {e}");
        }
    }
    shared.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
}

/// Send one client its copy of a frame, numbering fragments from `first`.
async fn send_fragments(
    shared: &HostShared,
    to: SocketAddr,
    first: Seq24,
    payloads: &[Bytes],
    datagram: &mut BytesMut,
) -> std::io::Result<()> {
    for (i, payload) in payloads.iter().enumerate() {
        let sequence = first.add(i as u32);
        let msg = Message::with_payload(MessageType::VideoFrame, sequence, payload.clone());
        datagram.clear();
        msg.encode_into(datagram);

        let n = shared.video.send_to(&datagram[..], to).await?;
        shared.counters.fragments_sent.fetch_add(1, Ordering::Relaxed);
        shared.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }
    Ok(())
}

// ── Shutdown ─────────────────────────────────────────────────────

async fn disconnect_everyone(shared: &HostShared) {
    let closed = shared.table().disconnect_all(DisconnectReason::Shutdown);
    let notice = DisconnectReason::Shutdown.into_message(CONTROL_SEQUENCE);
    for session in closed {
        shared.send(&shared.control, &notice, session.address).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FrameAssembler;
    use crate::protocol::VideoFragment;
    use crate::sink::NullSink;

    #[test]
    fn default_ports() {
        let config = HostTransportConfig::default();
        assert_eq!(config.control_port, 7777);
        assert_eq!(config.video_port, 7778);
        assert_eq!(config.input_port, 7779);
        assert_eq!(config.max_clients, 4);
        assert_eq!(config.session_timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn bind_reports_addresses() {
        let host = HostTransport::bind(HostTransportConfig::localhost(), Arc::new(NullSink))
            .await
            .unwrap();
        let addrs = host.local_addrs().unwrap();
        assert!(addrs.control.ip().is_loopback());
        assert_ne!(addrs.control.port(), 0);
        assert_ne!(addrs.control, addrs.input);
        assert_ne!(addrs.input, addrs.video);
    }

    #[tokio::test]
    async fn run_returns_when_frames_close() {
        let host = HostTransport::bind(HostTransportConfig::localhost(), Arc::new(NullSink))
            .await
            .unwrap();
        let handle = host.handle();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), host.run(rx))
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn ping_from_stranger_gets_no_pong() {
        let host = HostTransport::bind(HostTransportConfig::localhost(), Arc::new(NullSink))
            .await
            .unwrap();
        let addrs = host.local_addrs().unwrap();
        let handle = host.handle();
        let (_tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(host.run(rx));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ping = Message::empty(MessageType::Ping, Seq24::new(5)).encode();
        peer.send_to(&ping, addrs.control).await.unwrap();

        let mut buf = [0u8; 64];
        let reply =
            tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await;
        assert!(reply.is_err());

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_target_does_not_starve_others() {
        let host = HostTransport::bind(HostTransportConfig::localhost(), Arc::new(NullSink))
            .await
            .unwrap();
        let good = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let good_addr = good.local_addr().unwrap();
        let bad: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        {
            let mut table = host.shared.table();
            let now = Instant::now();
            // The video socket is IPv4, so an IPv6 destination always fails.
            let slot = table.register(bad, "[::1]:9".parse().unwrap(), now).unwrap().slot;
            assert_eq!(slot, Slot::new(0));
            let slot = table.register(good_addr, good_addr, now).unwrap().slot;
            assert_eq!(slot, Slot::new(1));
            assert!(table.activate(bad));
            assert!(table.activate(good_addr));
        }

        let frame = EncodedFrame::new(3, vec![7u8; 3000]);
        let fragmenter = Fragmenter::new(1000);
        broadcast_frame(&host.shared, &fragmenter, &frame, &mut BytesMut::new()).await;

        let mut assembler = FrameAssembler::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut delivered = None;
        for _ in 0..3 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), good.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            let msg = Message::decode(&buf[..len]).unwrap();
            assert_eq!(msg.message_type(), MessageType::VideoFrame);
            delivered = assembler.push(VideoFragment::from_payload(msg.payload()).unwrap());
        }
        assert_eq!(delivered.unwrap().data, frame.data);

        let stats = host.handle().stats();
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.fragments_sent, 3);
        assert_eq!(stats.frames_sent, 1);
    }
}
