//! Synthetic frame source.
//!
//! Screen capture and encoding live outside this repository. Until an
//! encoder is attached, the host streams a test pattern sized to the
//! configured bitrate so the transport, fragmenting and client statistics
//! can be exercised end to end.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use couch_core::{EncodedFrame, VideoConfig};

/// Every `fps`-th frame is this many times larger, like a keyframe.
const KEYFRAME_SCALE: usize = 4;

/// Generates paced test-pattern frames.
#[derive(Debug, Clone)]
pub struct TestPattern {
    fps: u16,
    frame_size: usize,
    next_id: u32,
}

impl TestPattern {
    pub fn new(config: &VideoConfig) -> Self {
        let fps = config.fps.max(1);
        let bytes_per_second = config.bitrate_kbps as usize * 1000 / 8;
        Self {
            fps,
            frame_size: (bytes_per_second / fps as usize).max(16),
            next_id: 0,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / u32::from(self.fps)
    }

    /// Produce the next frame. The first 4 bytes carry the frame id, the
    /// rest is a gradient that shifts every frame.
    pub fn next_frame(&mut self) -> EncodedFrame {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let keyframe = id % u32::from(self.fps) == 0;
        let size = if keyframe {
            self.frame_size * KEYFRAME_SCALE
        } else {
            self.frame_size
        };

        let mut data = BytesMut::with_capacity(size);
        data.put_u32(id);
        let shift = id as usize;
        data.extend((4..size).map(|i| (i.wrapping_add(shift) & 0xFF) as u8));
        EncodedFrame::new(id, Bytes::from(data))
    }

    /// Feed frames into `frames` at the configured rate until cancelled or
    /// the transport goes away. A full queue drops the frame, as a live
    /// encoder would.
    pub async fn run(mut self, frames: mpsc::Sender<EncodedFrame>, cancel: CancellationToken) {
        let interval = self.frame_interval();
        info!(
            fps = self.fps,
            frame_bytes = self.frame_size,
            "test pattern source started"
        );

        loop {
            let loop_start = Instant::now();
            match frames.try_send(self.next_frame()) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    debug!(frame_id = frame.frame_id, "transport busy, frame skipped")
                }
                Err(TrySendError::Closed(_)) => break,
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = pace(loop_start, interval) => {}
            }
        }
        debug!("test pattern source stopped");
    }
}

/// Sleep for the remainder of the frame interval.
async fn pace(loop_start: Instant, interval: Duration) {
    let elapsed = loop_start.elapsed();
    if elapsed < interval {
        tokio::time::sleep(interval - elapsed).await;
    }
}
