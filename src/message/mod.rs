//! Decoded protocol messages.
//!
//! A [`Message`] is the typed representation of one de-framed packet. It is
//! immutable once constructed and is shared read-only (as `Arc<Message>`)
//! among every callback that receives it.

pub mod callback;
pub mod filter;

use std::time::SystemTime;

use bytes::Bytes;

use crate::protocol::command::Command;
use crate::protocol::network::NetId;

pub use callback::{CallbackRegistry, MessageCallback, MessageHandler};
pub use filter::MessageFilter;

/// One decoded protocol unit.
#[derive(Debug, Clone)]
pub struct Message {
    /// Network the packet arrived on.
    pub network: NetId,
    /// Wall-clock arrival time, captured at decode.
    pub timestamp: SystemTime,
    /// Family-specific contents.
    pub kind: MessageKind,
}

/// The closed set of message families.
#[derive(Debug, Clone)]
pub enum MessageKind {
    /// Internal-diagnostic response: the echoed command plus its data.
    Main51 { command: Command, data: Bytes },
    /// Device serial number response.
    SerialNumber(SerialNumber),
    /// A frame captured from (or destined for) a bridged bus.
    Frame(BusFrame),
}

impl Message {
    /// Returns the dispatch subtype byte, where the family has one.
    ///
    /// Main51 messages are subtyped by their command opcode (a serial number
    /// response keeps the `RequestSerialNumber` subtype it answered); bus
    /// frames are identified by network alone.
    #[must_use]
    pub const fn subtype(&self) -> Option<u8> {
        match &self.kind {
            MessageKind::Main51 { command, .. } => Some(*command as u8),
            MessageKind::SerialNumber(_) => Some(Command::RequestSerialNumber as u8),
            MessageKind::Frame(_) => None,
        }
    }
}

/// Device serial number, decoded from the `RequestSerialNumber` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialNumber {
    /// Printable serial string, e.g. `"CB24007"`.
    pub serial: String,
}

/// A generic bus frame (CAN/LIN payload with its arbitration identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    /// Arbitration identifier.
    pub arbitration_id: u32,
    /// Frame data bytes.
    pub data: Bytes,
}
