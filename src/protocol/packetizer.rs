//! Incremental packetization of the raw byte stream.
//!
//! The standard wire framing used by adapter devices:
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────────────────┬────────────┐
//! │  0xAA    │  netid   │  size (LE)   │    payload      │  checksum  │
//! │  1 byte  │  1 byte  │   2 bytes    │   size bytes    │   1 byte   │
//! └──────────┴──────────┴──────────────┴─────────────────┴────────────┘
//! ```
//! The checksum is the XOR of the netid, the two size bytes and the payload.
//! A recovered packet is the de-framed body `netid + payload`; the decoder
//! reads its dispatch tag from offset 0.
//!
//! Different device families frame differently, so the [`Communication`]
//! orchestrator constructs its packetizer through a [`PacketizerFactory`]
//! rather than naming a concrete type.
//!
//! [`Communication`]: crate::Communication

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FrameError;

/// Frame sync byte.
pub const SYNC_BYTE: u8 = 0xAA;

/// Maximum frame payload size.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Frame overhead: sync + netid + 2-byte length + checksum.
const FRAME_OVERHEAD: usize = 5;

/// Incremental byte-stream to packet-boundary detection.
///
/// `input` feeds newly read bytes; `next_packet` yields one complete
/// de-framed packet at a time, buffering any trailing partial data. A packet
/// may arrive split across many reads or packed together with others in one
/// read; the output packet sequence is the same either way.
pub trait Packetizer: Send {
    /// Feeds newly received bytes into the packetizer.
    fn input(&mut self, data: &[u8]);

    /// Attempts to extract the next complete packet.
    ///
    /// Returns `Ok(Some(body))` when a packet is available, `Ok(None)` when
    /// more data is needed, or a [`FrameError`] when corrupt framing was
    /// detected. Errors are recoverable: the packetizer has already skipped
    /// past the corrupt region, and the caller should simply try again.
    fn next_packet(&mut self) -> Result<Option<Bytes>, FrameError>;
}

/// Zero-argument constructor for a device family's packetizer,
/// supplied at [`Communication`](crate::Communication) construction time.
pub type PacketizerFactory = Arc<dyn Fn() -> Box<dyn Packetizer> + Send + Sync>;

/// Returns a factory producing [`StandardPacketizer`]s.
#[must_use]
pub fn standard_packetizer_factory() -> PacketizerFactory {
    Arc::new(|| Box::new(StandardPacketizer::new()))
}

/// Packetizer for the standard sync-byte framing.
#[derive(Debug, Default)]
pub struct StandardPacketizer {
    buffer: BytesMut,
}

impl StandardPacketizer {
    /// Creates a new packetizer with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Packetizer for StandardPacketizer {
    fn input(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_packet(&mut self) -> Result<Option<Bytes>, FrameError> {
        // Resynchronize: drop everything up to the next sync byte.
        if !self.buffer.is_empty() && self.buffer[0] != SYNC_BYTE {
            let skipped = self
                .buffer
                .iter()
                .position(|&b| b == SYNC_BYTE)
                .unwrap_or(self.buffer.len());
            self.buffer.advance(skipped);
            return Err(FrameError::Desync { skipped });
        }

        // Need sync + netid + length before the frame size is known.
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let network = self.buffer[1];
        let length = u16::from_le_bytes([self.buffer[2], self.buffer[3]]) as usize;

        if length > MAX_PACKET_SIZE {
            // Treat the sync byte as spurious and rescan from the next byte.
            self.buffer.advance(1);
            return Err(FrameError::TooLarge {
                size: length,
                max: MAX_PACKET_SIZE,
            });
        }

        let total = FRAME_OVERHEAD + length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let expected = self.buffer[total - 1];
        let actual = self.buffer[1..total - 1]
            .iter()
            .fold(0u8, |acc, &b| acc ^ b);
        if actual != expected {
            self.buffer.advance(1);
            return Err(FrameError::BadChecksum { network });
        }

        // Body is netid + payload; strip sync, length and checksum.
        self.buffer.advance(1);
        let mut body = self.buffer.split_to(total - 2);
        let _ = self.buffer.split_to(1); // checksum
        let netid = body.split_to(1);
        let mut packet = BytesMut::with_capacity(1 + length);
        packet.extend_from_slice(&netid);
        packet.extend_from_slice(&body[2..]); // skip the two length bytes
        Ok(Some(packet.freeze()))
    }
}
