//! Video stream payloads.
//!
//! # Wire Protocol
//!
//! ```text
//! Host ──[VIDEO_CONFIG]─────────────────────► Client   (on join and on change)
//!   Payload: VideoConfig (14 bytes)
//!
//! Host ──[VIDEO_FRAME]──────────────────────► Client   (repeated, per fragment)
//!   Payload: VideoFragment (8 byte header + chunk)
//! ```
//!
//! ## VideoFragment layout (big-endian)
//! ```text
//! frame_id:        u32  (4)
//! fragment_index:  u16  (2)
//! fragment_count:  u16  (2)
//! chunk:           [u8] (remaining)
//! ```
//!
//! ## VideoConfig layout (big-endian)
//! ```text
//! codec:         [u8; 4]  fourcc, opaque to the transport
//! width:         u16
//! height:        u16
//! fps:           u16
//! bitrate_kbps:  u32
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::message::MessageType;
use crate::packet::Message;
use crate::sequence::Seq24;

// ── VideoFragment ────────────────────────────────────────────────

/// One self-describing chunk of an encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFragment {
    pub frame_id: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub data: Bytes,
}

impl VideoFragment {
    /// Fragment header size on the wire.
    pub const HEADER_SIZE: usize = 8;

    /// Decode from a VIDEO_FRAME payload. The chunk shares the payload's
    /// allocation.
    pub fn from_payload(payload: &Bytes) -> Result<Self, DecodeError> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: Self::HEADER_SIZE,
                actual: payload.len(),
            });
        }
        let mut header = &payload[..Self::HEADER_SIZE];
        let frame_id = header.get_u32();
        let fragment_index = header.get_u16();
        let fragment_count = header.get_u16();

        if fragment_count == 0 || fragment_index >= fragment_count {
            return Err(DecodeError::InvalidPayload {
                kind: MessageType::VideoFrame,
                reason: "fragment index outside fragment count",
            });
        }

        Ok(Self {
            frame_id,
            fragment_index,
            fragment_count,
            data: payload.slice(Self::HEADER_SIZE..),
        })
    }

    /// Encoded payload length (header + chunk).
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    pub fn encode_payload(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32(self.frame_id);
        dst.put_u16(self.fragment_index);
        dst.put_u16(self.fragment_count);
        dst.put_slice(&self.data);
    }

    pub fn to_message(&self, sequence: Seq24) -> Message {
        let mut payload = BytesMut::with_capacity(self.encoded_len());
        self.encode_payload(&mut payload);
        Message::with_payload(MessageType::VideoFrame, sequence, payload.freeze())
    }
}

// ── VideoConfig ──────────────────────────────────────────────────

/// Stream parameters announced by the host. The transport never
/// interprets them; they are relayed for the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoConfig {
    pub codec: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub fps: u16,
    pub bitrate_kbps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: *b"H264",
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 8_000,
        }
    }
}

impl VideoConfig {
    pub const SIZE: usize = 14;

    /// The fourcc as text, with non-printable bytes replaced.
    pub fn codec_name(&self) -> String {
        String::from_utf8_lossy(&self.codec).into_owned()
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut dst = &mut buf[..];
        dst.put_slice(&self.codec);
        dst.put_u16(self.width);
        dst.put_u16(self.height);
        dst.put_u16(self.fps);
        dst.put_u32(self.bitrate_kbps);
        buf
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::SIZE {
            return Err(DecodeError::InvalidPayload {
                kind: MessageType::VideoConfig,
                reason: "video config must be exactly 14 bytes",
            });
        }
        let mut codec = [0u8; 4];
        data.copy_to_slice(&mut codec);
        Ok(Self {
            codec,
            width: data.get_u16(),
            height: data.get_u16(),
            fps: data.get_u16(),
            bitrate_kbps: data.get_u32(),
        })
    }

    pub fn into_message(self, sequence: Seq24) -> Message {
        Message::with_payload(
            MessageType::VideoConfig,
            sequence,
            Bytes::copy_from_slice(&self.to_bytes()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_layout() {
        let frag = VideoFragment {
            frame_id: 0x0102_0304,
            fragment_index: 1,
            fragment_count: 3,
            data: Bytes::from_static(b"xy"),
        };
        let msg = frag.to_message(Seq24::new(9));
        assert_eq!(
            msg.payload().as_ref(),
            &[1, 2, 3, 4, 0, 1, 0, 3, b'x', b'y']
        );
        assert_eq!(VideoFragment::from_payload(msg.payload()).unwrap(), frag);
    }

    #[test]
    fn fragment_index_out_of_range() {
        let payload = Bytes::from_static(&[0, 0, 0, 1, 0, 3, 0, 3]);
        assert!(VideoFragment::from_payload(&payload).is_err());

        let zero_count = Bytes::from_static(&[0, 0, 0, 1, 0, 0, 0, 0]);
        assert!(VideoFragment::from_payload(&zero_count).is_err());
    }

    #[test]
    fn fragment_header_truncated() {
        let payload = Bytes::from_static(&[0, 0, 0]);
        assert!(matches!(
            VideoFragment::from_payload(&payload),
            Err(DecodeError::Truncated { needed: 8, actual: 3 })
        ));
    }

    #[test]
    fn config_roundtrip() {
        let cfg = VideoConfig {
            codec: *b"HEVC",
            width: 1920,
            height: 1080,
            fps: 144,
            bitrate_kbps: 25_000,
        };
        assert_eq!(VideoConfig::from_bytes(&cfg.to_bytes()).unwrap(), cfg);
        assert_eq!(cfg.codec_name(), "HEVC");
        assert!(VideoConfig::from_bytes(&[0u8; 10]).is_err());
    }
}
