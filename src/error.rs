//! Error types for the canbridge library.

use thiserror::Error;

/// The main error type for canbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Packet could not be decoded to a message.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The communication channel is already open.
    #[error("already open")]
    AlreadyOpen,

    /// The communication channel is not open.
    #[error("not open")]
    NotOpen,

    /// The outbound write queue is full (non-blocking write mode).
    #[error("write queue full")]
    WriteQueueFull,
}

/// Framing-level errors raised by a packetizer.
///
/// All of these are recoverable: the packetizer resynchronizes on the next
/// sync byte and the read pipeline continues.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// Stream was not aligned on a sync byte; bytes were skipped to recover.
    #[error("lost framing sync, skipped {skipped} bytes")]
    Desync { skipped: usize },

    /// Frame checksum did not match its contents.
    #[error("frame checksum mismatch on network 0x{network:02x}")]
    BadChecksum { network: u8 },

    /// Frame payload exceeds the maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Decode-level errors for packets that framed correctly but carry
/// unrecognized or malformed contents. The offending packet is dropped and
/// the pipeline continues.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Packet was empty (no network tag byte).
    #[error("empty packet")]
    Empty,

    /// Network tag is not a known network.
    #[error("unknown network tag 0x{0:02x}")]
    UnknownNetwork(u8),

    /// Main51 command byte is not a known command.
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    /// Payload was shorter than its fixed fields require.
    #[error("truncated payload: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
}

/// Result type alias for canbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
