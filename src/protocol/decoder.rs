//! Packet to message decoding.
//!
//! The decoder is the receive half of the codec: it turns one de-framed
//! packet into a typed [`Message`], dispatching on the network tag at offset
//! 0. Unknown tags yield a typed [`DecodeError`] so unsupported traffic never
//! breaks the pipeline.

use std::time::SystemTime;

use bytes::{Buf, Bytes};

use crate::error::DecodeError;
use crate::message::{BusFrame, Message, MessageKind, SerialNumber};
use crate::protocol::command::Command;
use crate::protocol::network::NetId;

/// Minimum bus frame payload: 4-byte arbitration id + 1-byte data length.
const BUS_FRAME_HEADER: usize = 5;

/// Decoder for inbound packets.
#[derive(Debug, Default)]
pub struct Decoder;

impl Decoder {
    /// Creates a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decodes one packet (`netid + payload`) into a message.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for empty packets, unknown network tags,
    /// unknown Main51 commands, or payloads shorter than their fixed fields.
    pub fn decode(&self, packet: &Bytes) -> Result<Message, DecodeError> {
        if packet.is_empty() {
            return Err(DecodeError::Empty);
        }

        let tag = packet[0];
        let network = NetId::from_byte(tag).ok_or(DecodeError::UnknownNetwork(tag))?;
        let payload = packet.slice(1..);
        let timestamp = SystemTime::now();

        tracing::trace!(
            "decoding packet on {network:?}: {}",
            hex::encode(&payload)
        );

        let kind = match network {
            NetId::Main51 => decode_main51(&payload)?,
            NetId::Device => MessageKind::Main51 {
                // Device status traffic shares the Main51 layout.
                command: command_from_payload(&payload)?,
                data: payload.slice(1..),
            },
            NetId::Hscan | NetId::Mscan | NetId::Swcan | NetId::Lin => {
                decode_bus_frame(&payload)?
            }
        };

        Ok(Message {
            network,
            timestamp,
            kind,
        })
    }
}

fn command_from_payload(payload: &Bytes) -> Result<Command, DecodeError> {
    let first = *payload.first().ok_or(DecodeError::Truncated { need: 1, got: 0 })?;
    Command::from_byte(first).ok_or(DecodeError::UnknownCommand(first))
}

/// Decodes a Main51 payload: `[command][data...]`.
///
/// The serial number response gets its own message family so consumers never
/// parse the raw bytes themselves.
fn decode_main51(payload: &Bytes) -> Result<MessageKind, DecodeError> {
    let command = command_from_payload(payload)?;
    let data = payload.slice(1..);

    if command == Command::RequestSerialNumber {
        let serial = String::from_utf8_lossy(&data).into_owned();
        return Ok(MessageKind::SerialNumber(SerialNumber { serial }));
    }

    Ok(MessageKind::Main51 { command, data })
}

/// Decodes a bus frame payload: `[arbid:4 LE][dlc:1][data...]`.
fn decode_bus_frame(payload: &Bytes) -> Result<MessageKind, DecodeError> {
    if payload.len() < BUS_FRAME_HEADER {
        return Err(DecodeError::Truncated {
            need: BUS_FRAME_HEADER,
            got: payload.len(),
        });
    }

    let mut cursor = &payload[..];
    let arbitration_id = cursor.get_u32_le();
    let dlc = cursor.get_u8() as usize;

    if cursor.len() < dlc {
        return Err(DecodeError::Truncated {
            need: BUS_FRAME_HEADER + dlc,
            got: payload.len(),
        });
    }

    Ok(MessageKind::Frame(BusFrame {
        arbitration_id,
        data: payload.slice(BUS_FRAME_HEADER..BUS_FRAME_HEADER + dlc),
    }))
}
