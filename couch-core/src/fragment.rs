//! Video frame fragmentation and reassembly.
//!
//! Encoded frames are usually larger than one datagram, so the host splits
//! each frame into self-describing [`VideoFragment`]s and the client puts
//! them back together. Delivery is best-effort: at most one frame is being
//! assembled at a time, and the first fragment of a newer frame abandons
//! whatever is left of an older one. A late frame is worth nothing to a
//! live stream.

use bytes::{Bytes, BytesMut};

use crate::error::CouchError;
use crate::header::HEADER_SIZE;
use crate::packet::{MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE};
use crate::protocol::VideoFragment;
use crate::sequence::frame_is_newer;

// ── Constants ────────────────────────────────────────────────────

/// Datagram budget that avoids IP fragmentation on common links.
pub const DEFAULT_MTU: usize = 1400;

/// Largest chunk that fits in one VIDEO_FRAME datagram at [`DEFAULT_MTU`].
pub const DEFAULT_MAX_CHUNK: usize = DEFAULT_MTU - HEADER_SIZE - VideoFragment::HEADER_SIZE;

/// Largest chunk any single datagram can carry.
pub const MAX_CHUNK: usize = MAX_PAYLOAD_SIZE - VideoFragment::HEADER_SIZE;

// ── EncodedFrame ─────────────────────────────────────────────────

/// One opaque encoded video frame, as produced by the encoder and consumed
/// by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub frame_id: u32,
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn new(frame_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            frame_id,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Fragmenter ───────────────────────────────────────────────────

/// Splits frames into MTU-sized fragments.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    max_chunk: usize,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK)
    }
}

impl Fragmenter {
    /// Chunk size is kept within 1..=[`MAX_CHUNK`].
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.clamp(1, MAX_CHUNK),
        }
    }

    /// Build a fragmenter for a datagram budget of `mtu` bytes. Budgets
    /// beyond the UDP datagram limit are capped to it.
    pub fn for_mtu(mtu: usize) -> Self {
        let mtu = mtu.min(MAX_DATAGRAM_SIZE);
        Self::new(mtu.saturating_sub(HEADER_SIZE + VideoFragment::HEADER_SIZE))
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Split `data` into ordered fragments of `frame_id`.
    ///
    /// Chunks are slices of `data`, nothing is copied. An empty frame still
    /// produces one (empty) fragment so the receiver sees it.
    pub fn split(&self, frame_id: u32, data: &Bytes) -> Result<Vec<VideoFragment>, CouchError> {
        let count = data.len().div_ceil(self.max_chunk).max(1);
        let fragment_count = u16::try_from(count).map_err(|_| CouchError::PayloadTooLarge {
            size: data.len(),
            max: self.max_chunk * u16::MAX as usize,
        })?;

        let fragments = (0..fragment_count)
            .map(|index| {
                let start = index as usize * self.max_chunk;
                let end = (start + self.max_chunk).min(data.len());
                VideoFragment {
                    frame_id,
                    fragment_index: index,
                    fragment_count,
                    data: data.slice(start..end),
                }
            })
            .collect();
        Ok(fragments)
    }
}

// ── FrameAssembler ───────────────────────────────────────────────

/// Counters describing what the assembler did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames delivered whole.
    pub completed: u64,
    /// Partial frames dropped because a newer frame started.
    pub abandoned: u64,
    /// Fragments of frames older than the current or last delivered one.
    pub stale: u64,
    /// Fragments with an impossible index or count.
    pub invalid: u64,
}

#[derive(Debug)]
struct PartialFrame {
    frame_id: u32,
    chunks: Vec<Option<Bytes>>,
    received: usize,
    size: usize,
}

impl PartialFrame {
    fn new(frame_id: u32, count: u16) -> Self {
        Self {
            frame_id,
            chunks: vec![None; count as usize],
            received: 0,
            size: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn into_frame(self) -> EncodedFrame {
        let mut data = BytesMut::with_capacity(self.size);
        for chunk in self.chunks.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }
        EncodedFrame::new(self.frame_id, data.freeze())
    }
}

/// Reassembles fragments into frames, one frame at a time.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    current: Option<PartialFrame>,
    last_completed: Option<u32>,
    stats: AssemblerStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Id of the frame currently being assembled, if any.
    pub fn in_progress(&self) -> Option<u32> {
        self.current.as_ref().map(|p| p.frame_id)
    }

    pub fn last_completed(&self) -> Option<u32> {
        self.last_completed
    }

    /// Feed one fragment. Returns the frame when this fragment completed it.
    pub fn push(&mut self, fragment: VideoFragment) -> Option<EncodedFrame> {
        if fragment.fragment_count == 0 || fragment.fragment_index >= fragment.fragment_count {
            self.stats.invalid += 1;
            return None;
        }

        if let Some(last) = self.last_completed
            && !frame_is_newer(fragment.frame_id, last)
        {
            self.stats.stale += 1;
            return None;
        }

        match &self.current {
            Some(partial) if partial.frame_id == fragment.frame_id => {}
            Some(partial) if frame_is_newer(fragment.frame_id, partial.frame_id) => {
                tracing::trace!(
                    abandoned = partial.frame_id,
                    received = partial.received,
                    expected = partial.chunks.len(),
                    "partial frame superseded"
                );
                self.stats.abandoned += 1;
                self.current = None;
            }
            Some(_) => {
                self.stats.stale += 1;
                return None;
            }
            None => {}
        }

        // A partial frame with the same id means the counts disagree; that
        // case is rejected below.
        if fragment.fragment_count == 1 && self.current.is_none() {
            return Some(self.complete(EncodedFrame::new(fragment.frame_id, fragment.data)));
        }

        let partial = self
            .current
            .get_or_insert_with(|| PartialFrame::new(fragment.frame_id, fragment.fragment_count));

        if partial.chunks.len() != fragment.fragment_count as usize {
            tracing::debug!(
                frame_id = fragment.frame_id,
                expected = partial.chunks.len(),
                got = fragment.fragment_count,
                "fragment count disagrees with partial frame"
            );
            self.stats.invalid += 1;
            return None;
        }

        let slot = &mut partial.chunks[fragment.fragment_index as usize];
        if slot.is_some() {
            return None; // duplicate
        }
        partial.size += fragment.data.len();
        partial.received += 1;
        *slot = Some(fragment.data);

        if !partial.is_complete() {
            return None;
        }
        let frame = self.current.take()?.into_frame();
        Some(self.complete(frame))
    }

    fn complete(&mut self, frame: EncodedFrame) -> EncodedFrame {
        self.last_completed = Some(frame.frame_id);
        self.stats.completed += 1;
        frame
    }
}
