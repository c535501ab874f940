//! Integration tests: full sessions between a real host transport and real
//! clients over UDP on localhost.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use couch_core::{
    Buttons, ClientExit, ClientTransport, ClientTransportConfig, ControllerState, CouchError,
    DisconnectReason, EncodedFrame, HostAddrs, HostHandle, HostTransport, HostTransportConfig,
    MAX_SLOTS, Message, MessageType, Seq24, SessionState, Slot, VideoConfig,
    VirtualControllerSink,
};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

// ── Helpers ──────────────────────────────────────────────────────

/// Sink that remembers the latest state per slot and every zero call.
#[derive(Default)]
struct RecordingSink {
    states: Mutex<[ControllerState; MAX_SLOTS]>,
    zeroed: Mutex<Vec<Slot>>,
}

impl RecordingSink {
    fn state(&self, slot: usize) -> ControllerState {
        self.states.lock().unwrap()[slot]
    }

    fn zeroed(&self) -> Vec<Slot> {
        self.zeroed.lock().unwrap().clone()
    }
}

impl VirtualControllerSink for RecordingSink {
    fn update(&self, slot: Slot, state: &ControllerState) {
        self.states.lock().unwrap()[slot.index()] = *state;
    }

    fn zero(&self, slot: Slot) {
        self.states.lock().unwrap()[slot.index()] = ControllerState::NEUTRAL;
        self.zeroed.lock().unwrap().push(slot);
    }
}

struct TestHost {
    addrs: HostAddrs,
    handle: HostHandle,
    sink: Arc<RecordingSink>,
    frames: mpsc::Sender<EncodedFrame>,
    task: JoinHandle<Result<(), CouchError>>,
}

async fn start_host(config: HostTransportConfig) -> TestHost {
    let sink = Arc::new(RecordingSink::default());
    let host = HostTransport::bind(config, sink.clone()).await.unwrap();
    let addrs = host.local_addrs().unwrap();
    let handle = host.handle();
    let (frames, rx) = mpsc::channel(8);
    let task = tokio::spawn(host.run(rx));
    TestHost {
        addrs,
        handle,
        sink,
        frames,
        task,
    }
}

fn client_config(addrs: &HostAddrs) -> ClientTransportConfig {
    let mut config = ClientTransportConfig::with_addrs(addrs.control, addrs.input);
    config.bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.hello_interval = Duration::from_millis(50);
    config.input_interval = Duration::from_millis(5);
    config.keepalive_interval = Duration::from_millis(100);
    config
}

/// Poll `check` until it holds, failing the test after a few seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn recv_message(socket: &UdpSocket) -> (Message, SocketAddr) {
    let mut buf = vec![0u8; 2048];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timeout")
        .unwrap();
    (Message::decode(&buf[..len]).unwrap(), from)
}

// ── Handshake and input ──────────────────────────────────────────

#[tokio::test]
async fn hello_gets_welcome_and_assignment() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let hello = couch_core::Hello::new(0).into_message(Seq24::ZERO);
    peer.send_to(&hello.encode(), host.addrs.control).await.unwrap();

    let (welcome, _) = recv_message(&peer).await;
    assert_eq!(welcome.message_type(), MessageType::Welcome);
    assert_eq!(welcome.payload().as_ref(), &[0]);

    let (assign, _) = recv_message(&peer).await;
    assert_eq!(assign.message_type(), MessageType::ControllerAssign);
    assert_eq!(assign.payload().as_ref(), &[0]);

    eventually("session to activate", || {
        host.handle
            .sessions()
            .first()
            .is_some_and(|s| s.state == SessionState::Active)
    })
    .await;
}

#[tokio::test]
async fn controller_state_reaches_sink() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let session = assert_ok!(ClientTransport::connect(client_config(&host.addrs)).await);
    assert_eq!(session.slot(), Slot::new(0));

    let (input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, _frames_rx) = mpsc::channel(4);
    let quit = session.shutdown_token();
    let client = tokio::spawn(session.run(input_rx, frames_tx));

    input_tx.send_replace(ControllerState::NEUTRAL.with_buttons(Buttons::A));
    eventually("A on slot 0", || host.sink.state(0).is_pressed(Buttons::A)).await;

    let before = host.handle.sessions()[0].inputs_applied;
    eventually("more input", || host.handle.sessions()[0].inputs_applied > before).await;
    assert!(host.handle.sessions()[0].idle < Duration::from_secs(1));

    quit.cancel();
    assert_eq!(client.await.unwrap().unwrap(), ClientExit::Quit);
}

#[tokio::test]
async fn fifth_client_is_rejected() {
    let host = start_host(HostTransportConfig::localhost()).await;

    let mut sessions = Vec::new();
    for expected in 0..4u8 {
        let session = ClientTransport::connect(client_config(&host.addrs))
            .await
            .unwrap();
        assert_eq!(session.slot(), Slot::new(expected));
        sessions.push(session);
    }

    let fifth = ClientTransport::connect(client_config(&host.addrs)).await;
    assert!(matches!(assert_err!(fifth), CouchError::ServerFull));

    let snapshot = host.handle.sessions();
    assert_eq!(snapshot.len(), 4);
    let mut slots: Vec<_> = snapshot.iter().map(|s| s.slot).collect();
    slots.sort();
    assert_eq!(slots, (0..4).map(Slot::new).collect::<Vec<_>>());
}

#[tokio::test]
async fn garbage_datagram_is_tolerated() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let junk = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    junk.send_to(&[0xFF, 1, 2], host.addrs.control).await.unwrap();
    junk.send_to(&[10, 0, 0, 1, 0, 0, 0, 99], host.addrs.input).await.unwrap();

    let session = assert_ok!(ClientTransport::connect(client_config(&host.addrs)).await);
    assert_eq!(session.slot(), Slot::new(0));
    eventually("decode errors counted", || host.handle.stats().decode_errors >= 2).await;
}

// ── Video ────────────────────────────────────────────────────────

#[tokio::test]
async fn video_frame_is_reassembled() {
    let mut config = HostTransportConfig::localhost();
    config.video = Some(VideoConfig::default());
    let host = start_host(config).await;

    let session = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();
    let mut video_config = session.video_config_watch();
    let client_stats = session.stats_watch();
    let (_input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, mut frames_rx) = mpsc::channel(4);
    let client = tokio::spawn(session.run(input_rx, frames_tx));

    let announced = *tokio::time::timeout(
        Duration::from_secs(5),
        video_config.wait_for(|c| c.is_some()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(announced, Some(VideoConfig::default()));

    let data: Bytes = (0..10_000u32).map(|i| (i % 256) as u8).collect::<Vec<_>>().into();
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        // The session may still be activating, so keep offering frames.
        let mut frame_id = 0;
        loop {
            host.frames
                .send(EncodedFrame::new(frame_id, data.clone()))
                .await
                .unwrap();
            frame_id += 1;
            if let Ok(Some(frame)) =
                tokio::time::timeout(Duration::from_millis(100), frames_rx.recv()).await
            {
                break frame;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(received.data, data);
    assert!(host.handle.stats().fragments_sent >= 8);
    eventually("client stats", || {
        let stats = *client_stats.borrow();
        stats.frames_received >= 1 && stats.assembler.completed >= 1
    })
    .await;
    assert!(client_stats.borrow().fragments_received >= 8);

    host.handle.shutdown();
    assert_eq!(
        client.await.unwrap().unwrap(),
        ClientExit::HostClosed(DisconnectReason::Shutdown)
    );
}

#[tokio::test]
async fn video_config_change_reaches_client() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let session = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();
    let mut video_config = session.video_config_watch();
    let (_input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, _frames_rx) = mpsc::channel(4);
    let quit = session.shutdown_token();
    let client = tokio::spawn(session.run(input_rx, frames_tx));

    eventually("session to activate", || {
        host.handle
            .sessions()
            .first()
            .is_some_and(|s| s.state == SessionState::Active)
    })
    .await;

    let updated = VideoConfig {
        codec: *b"VP90",
        width: 1920,
        height: 1080,
        fps: 30,
        bitrate_kbps: 12_000,
    };
    host.handle.set_video_config(updated).await;
    assert_eq!(host.handle.video_config(), Some(updated));

    let announced = *tokio::time::timeout(
        Duration::from_secs(5),
        video_config.wait_for(|c| *c == Some(updated)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(announced, Some(updated));

    quit.cancel();
    assert_eq!(client.await.unwrap().unwrap(), ClientExit::Quit);
}

// ── Teardown ─────────────────────────────────────────────────────

#[tokio::test]
async fn client_quit_frees_slot() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let session = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();
    let (input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, _frames_rx) = mpsc::channel(4);
    let quit = session.shutdown_token();
    let client = tokio::spawn(session.run(input_rx, frames_tx));

    input_tx.send_replace(ControllerState::NEUTRAL.with_buttons(Buttons::START));
    eventually("START on slot 0", || host.sink.state(0).is_pressed(Buttons::START)).await;

    quit.cancel();
    assert_eq!(client.await.unwrap().unwrap(), ClientExit::Quit);

    eventually("session removed", || host.handle.sessions().is_empty()).await;
    assert_eq!(host.sink.zeroed(), vec![Slot::new(0)]);
    assert!(host.sink.state(0).is_neutral());

    // The slot is available again.
    let again = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();
    assert_eq!(again.slot(), Slot::new(0));
}

#[tokio::test]
async fn silent_client_times_out() {
    let mut config = HostTransportConfig::localhost();
    config.session_timeout = Duration::from_millis(200);
    config.sweep_interval = Duration::from_millis(50);
    let host = start_host(config).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let hello = couch_core::Hello::new(0).into_message(Seq24::ZERO);
    peer.send_to(&hello.encode(), host.addrs.control).await.unwrap();
    let (welcome, _) = recv_message(&peer).await;
    assert_eq!(welcome.message_type(), MessageType::Welcome);

    eventually("timeout sweep", || host.sink.zeroed() == vec![Slot::new(0)]).await;
    assert!(host.handle.sessions().is_empty());

    // Skip the assignment, then expect the timeout notice.
    let (assign, _) = recv_message(&peer).await;
    assert_eq!(assign.message_type(), MessageType::ControllerAssign);
    let (notice, _) = recv_message(&peer).await;
    assert_eq!(notice.message_type(), MessageType::Disconnect);
    assert_eq!(notice.payload().as_ref(), &[DisconnectReason::Timeout as u8]);
}

#[tokio::test]
async fn host_shutdown_zeroes_every_slot() {
    let host = start_host(HostTransportConfig::localhost()).await;
    let _a = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();
    let _b = ClientTransport::connect(client_config(&host.addrs))
        .await
        .unwrap();

    host.handle.shutdown();
    assert_ok!(host.task.await.unwrap());

    let mut zeroed = host.sink.zeroed();
    zeroed.sort();
    assert_eq!(zeroed, vec![Slot::new(0), Slot::new(1)]);
}

// ── Client liveness ──────────────────────────────────────────────

#[tokio::test]
async fn keepalive_timeout_against_silent_host() {
    // A fake host that welcomes once and then never answers.
    let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = fake.local_addr().unwrap();
    let responder = tokio::spawn(async move {
        let (hello, from) = recv_message(&fake).await;
        assert_eq!(hello.message_type(), MessageType::Hello);
        let welcome = Slot::new(2).into_message(MessageType::Welcome, Seq24::ZERO);
        fake.send_to(&welcome.encode(), from).await.unwrap();
        // Keep the socket open so pings are not refused.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut config = ClientTransportConfig::with_addrs(addr, addr);
    config.bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.keepalive_interval = Duration::from_millis(50);
    config.max_missed_pongs = 3;

    let session = ClientTransport::connect(config).await.unwrap();
    assert_eq!(session.slot(), Slot::new(2));

    let (_input_tx, input_rx) = watch::channel(ControllerState::NEUTRAL);
    let (frames_tx, _frames_rx) = mpsc::channel(1);
    let exit = tokio::time::timeout(Duration::from_secs(5), session.run(input_rx, frames_tx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, ClientExit::KeepaliveTimeout);
    responder.abort();
}

#[tokio::test]
async fn handshake_fails_without_host() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    let mut config = ClientTransportConfig::with_addrs(addr, addr);
    config.bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.hello_interval = Duration::from_millis(10);
    config.hello_attempts = 5;

    let result = ClientTransport::connect(config).await;
    assert!(matches!(
        result,
        Err(CouchError::HandshakeFailed { attempts: 5 })
    ));
}
