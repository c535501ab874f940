//! Frame statistics consumer.
//!
//! Takes the decoder's place at the end of the frame channel: every
//! reassembled frame is counted, and the smoothed frame rate and byte
//! totals are published on a `watch` channel for the status line.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::info;

use couch_core::EncodedFrame;

/// Frame intervals averaged for the fps estimate.
const FPS_WINDOW: usize = 60;

/// Per-frame statistics exposed to the status line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Current smoothed frames per second.
    pub fps: f64,
    /// Total frames received since start.
    pub total_frames: u64,
    /// Total encoded bytes received.
    pub total_bytes: u64,
    /// Id of the newest frame.
    pub last_frame_id: u32,
}

/// Counts frames and smooths the frame rate.
#[derive(Debug)]
pub struct FrameCounter {
    stats: FrameStats,
    intervals: VecDeque<Duration>,
    last_arrival: Option<Instant>,
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCounter {
    pub fn new() -> Self {
        Self {
            stats: FrameStats::default(),
            intervals: VecDeque::with_capacity(FPS_WINDOW),
            last_arrival: None,
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Record a frame that arrived at `now`.
    pub fn record(&mut self, frame: &EncodedFrame, now: Instant) -> FrameStats {
        self.stats.total_frames += 1;
        self.stats.total_bytes += frame.len() as u64;
        self.stats.last_frame_id = frame.frame_id;

        if let Some(last) = self.last_arrival.replace(now) {
            if self.intervals.len() == FPS_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.duration_since(last));
            let avg = self.intervals.iter().sum::<Duration>().as_secs_f64()
                / self.intervals.len() as f64;
            self.stats.fps = if avg > 0.0 { 1.0 / avg } else { 0.0 };
        }
        self.stats
    }
}

/// Drain `frames`, publishing statistics on `stats` and logging a summary
/// every `report_every` (zero disables the log). Returns the final figures
/// once the channel closes.
pub async fn consume_frames(
    mut frames: mpsc::Receiver<EncodedFrame>,
    stats: watch::Sender<FrameStats>,
    report_every: Duration,
) -> FrameStats {
    let mut counter = FrameCounter::new();
    let mut last_report = Instant::now();
    let mut frames_at_report = 0;

    while let Some(frame) = frames.recv().await {
        let now = Instant::now();
        stats.send_replace(counter.record(&frame, now));

        if !report_every.is_zero() && now.duration_since(last_report) >= report_every {
            let current = counter.stats();
            info!(
                "video: {:.1} fps, {} frames ({} new), {} KiB",
                current.fps,
                current.total_frames,
                current.total_frames - frames_at_report,
                current.total_bytes / 1024
            );
            frames_at_report = current.total_frames;
            last_report = now;
        }
    }
    counter.stats()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn frame(id: u32, len: usize) -> EncodedFrame {
        EncodedFrame::new(id, Bytes::from(vec![0u8; len]))
    }

    #[test]
    fn first_frame_has_no_rate() {
        let mut counter = FrameCounter::new();
        let stats = counter.record(&frame(1, 100), Instant::now());
        assert_eq!(stats.total_frames, 1);
        assert_eq!(stats.total_bytes, 100);
        assert_eq!(stats.fps, 0.0);
    }

    #[test]
    fn fps_follows_arrival_spacing() {
        let mut counter = FrameCounter::new();
        let start = Instant::now();
        for i in 0..10u32 {
            counter.record(&frame(i, 10), start + Duration::from_millis(20) * i);
        }
        let stats = counter.stats();
        assert!((stats.fps - 50.0).abs() < 0.01, "fps = {}", stats.fps);
        assert_eq!(stats.last_frame_id, 9);
        assert_eq!(stats.total_bytes, 100);
    }

    #[test]
    fn window_forgets_old_intervals() {
        let mut counter = FrameCounter::new();
        let mut at = Instant::now();
        counter.record(&frame(0, 1), at);
        // One slow interval, then a full window of fast ones.
        at += Duration::from_secs(1);
        counter.record(&frame(1, 1), at);
        for i in 0..FPS_WINDOW as u32 {
            at += Duration::from_millis(10);
            counter.record(&frame(2 + i, 1), at);
        }
        assert!((counter.stats().fps - 100.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn consumer_publishes_and_returns_totals() {
        let (tx, rx) = mpsc::channel(8);
        let (stats_tx, mut stats_rx) = watch::channel(FrameStats::default());
        let task = tokio::spawn(consume_frames(rx, stats_tx, Duration::ZERO));

        tx.send(frame(7, 300)).await.unwrap();
        stats_rx.changed().await.unwrap();
        assert_eq!(stats_rx.borrow().last_frame_id, 7);

        tx.send(frame(8, 200)).await.unwrap();
        drop(tx);
        let totals = task.await.unwrap();
        assert_eq!(totals.total_frames, 2);
        assert_eq!(totals.total_bytes, 500);
    }
}
