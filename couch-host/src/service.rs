//! Host service core logic.
//!
//! Wires the transport to its collaborators: the gamepad bank receives
//! controller input, the frame source feeds video, and a status task
//! reports who is connected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use couch_core::{HostHandle, HostTransport};

use crate::config::HostConfig;
use crate::gamepad::{GamepadBank, button_names};
use crate::source::TestPattern;

/// Encoded frames waiting for the broadcast loop.
const FRAME_QUEUE: usize = 4;

// ── HostService ──────────────────────────────────────────────────

/// The top-level host service.
pub struct HostService {
    config: HostConfig,
    cancel: CancellationToken,
    gamepads: Arc<GamepadBank>,
}

impl HostService {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            gamepads: Arc::new(GamepadBank::new()),
        }
    }

    /// Token that stops the service when cancelled (Ctrl-C handler).
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn gamepads(&self) -> &Arc<GamepadBank> {
        &self.gamepads
    }

    /// Run until stopped.
    ///
    /// 1. Binds the transport sockets (failure is returned to the caller).
    /// 2. Starts the frame source and the status reporter.
    /// 3. Runs the transport until the stop handle fires.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let transport_config = self.config.to_transport_config()?;
        let video = self.config.video_config();
        let transport = HostTransport::bind(transport_config, self.gamepads.clone()).await?;
        let handle = transport.handle();

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let source = self.config.video.test_pattern.then(|| {
            tokio::spawn(TestPattern::new(&video).run(frames_tx.clone(), self.cancel.child_token()))
        });

        let status = match self.config.session.status_interval_secs {
            0 => None,
            secs => Some(tokio::spawn(report_status(
                handle.clone(),
                self.gamepads.clone(),
                Duration::from_secs(secs),
            ))),
        };

        let stop = self.cancel.clone();
        let transport_handle = handle.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            transport_handle.shutdown();
        });

        transport.run(frames_rx).await?;

        // The transport is down; stop everything that fed it.
        self.cancel.cancel();
        drop(frames_tx);
        if let Some(task) = source {
            let _ = task.await;
        }
        if let Some(task) = status {
            task.abort();
        }

        info!("host service stopped");
        Ok(())
    }
}

/// Log a status line every `every` until the transport shuts down.
async fn report_status(handle: HostHandle, gamepads: Arc<GamepadBank>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let cancel = handle.cancel_token();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sessions = handle.sessions();
        let stats = handle.stats();
        info!(
            "{} client(s) connected, {} frames sent ({} KiB), {} send errors",
            sessions.len(),
            stats.frames_sent,
            stats.bytes_sent / 1024,
            stats.send_errors
        );
        for s in &sessions {
            debug!(
                "  {} {} [{}] idle {:?}, {} inputs ({} stale, {} lost), holding {}",
                s.slot,
                s.address,
                s.state,
                s.idle,
                s.inputs_applied,
                s.inputs_dropped,
                s.inputs_lost,
                button_names(gamepads.state(s.slot).buttons)
            );
        }
    }
}
