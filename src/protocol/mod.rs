//! Protocol definitions for adapter-device communication.
//!
//! This module contains the low-level codec:
//! - Network identifiers and command opcodes
//! - Incremental packetization (framing boundary detection and resync)
//! - Frame encoding for outbound commands
//! - Packet decoding into typed messages

pub mod command;
pub mod decoder;
pub mod encoder;
pub mod network;
pub mod packetizer;

pub use command::Command;
pub use decoder::Decoder;
pub use encoder::{Encoder, encode_frame};
pub use network::NetId;
pub use packetizer::{
    MAX_PACKET_SIZE, Packetizer, PacketizerFactory, SYNC_BYTE, StandardPacketizer,
    standard_packetizer_factory,
};
