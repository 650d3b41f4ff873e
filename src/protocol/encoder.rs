//! Outbound frame construction.
//!
//! The encoder is the transmit half of the codec: it turns a [`Command`] plus
//! argument bytes into a transport-ready frame that the packetizer/decoder
//! pair on the device end reconstructs byte-for-byte.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::command::Command;
use crate::protocol::network::NetId;
use crate::protocol::packetizer::{MAX_PACKET_SIZE, SYNC_BYTE};

/// Wraps a payload for one network in the standard framing.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds the maximum
/// packet size.
pub fn encode_frame(network: u8, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PACKET_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    let length = payload.len() as u16;
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(SYNC_BYTE);
    buf.put_u8(network);
    buf.put_u16_le(length);
    buf.put_slice(payload);

    let checksum = buf[1..].iter().fold(0u8, |acc, &b| acc ^ b);
    buf.put_u8(checksum);
    Ok(buf.freeze())
}

/// Encoder for outbound commands.
///
/// Pure and stateless; kept as a value so device families with different
/// command framing can swap it out alongside their packetizer.
#[derive(Debug, Default)]
pub struct Encoder;

impl Encoder {
    /// Creates a new encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encodes a command and its argument bytes into a transport-ready frame.
    ///
    /// Commands travel on the Main51 endpoint as `[opcode][args...]`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the arguments do not fit in one
    /// frame.
    pub fn encode(&self, command: Command, arguments: &[u8]) -> Result<Bytes, FrameError> {
        let mut payload = Vec::with_capacity(1 + arguments.len());
        payload.push(command as u8);
        payload.extend_from_slice(arguments);
        encode_frame(NetId::Main51 as u8, &payload)
    }
}
