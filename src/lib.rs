//! # canbridge
//!
//! A Rust communication core for vehicle-network adapter devices (CAN/LIN
//! bridges) attached over USB, Ethernet or serial.
//!
//! The library turns a raw, possibly fragmented byte stream into typed,
//! filtered protocol messages delivered to interested consumers, and turns
//! typed commands back into correctly framed bytes for transmission.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Single background read task per open channel
//! - Filtered message callbacks with stable integer ids
//! - Bounded-time request/response waits atop the asynchronous read path
//! - Recoverable handling of corrupt frames and unknown traffic
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use canbridge::{Communication, SerialDriver, tracing_report};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), canbridge::Error> {
//!     let driver = Box::new(SerialDriver::with_port("/dev/ttyACM0"));
//!     let comm = Communication::standard(tracing_report(), driver);
//!
//!     comm.open().await?;
//!
//!     if let Some(serial) = comm.get_serial_number(Duration::from_millis(50)).await? {
//!         println!("Connected to: {}", serial.serial);
//!     }
//!
//!     comm.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - The codec: network tags, commands, packetizer, encoder, decoder
//! - [`message`] - Decoded messages, filters and the callback registry
//! - [`driver`] - Transport drivers (currently USB/serial)
//! - [`event`] - Report sink for recoverable device events
//! - [`communication`] - The [`Communication`] orchestrator

pub mod communication;
pub mod driver;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;

// Re-exports for convenience
pub use communication::{Communication, SYNC_MESSAGE_TIMEOUT, State};
pub use driver::{Driver, DriverReader, SerialDriver, serial::list_ports};
pub use error::{DecodeError, Error, FrameError, Result};
pub use event::{DeviceEvent, DeviceEventHandler, tracing_report};
pub use message::{
    BusFrame, CallbackRegistry, Message, MessageCallback, MessageFilter, MessageKind, SerialNumber,
};
pub use protocol::{
    Command, Decoder, Encoder, NetId, Packetizer, PacketizerFactory, StandardPacketizer,
    standard_packetizer_factory,
};
