//! Driver layer for adapter-device communication.
//!
//! A [`Driver`] is the opaque byte-stream capability the core builds on:
//! open/close, write, and a read half the background task takes ownership of.
//! The core never assumes a specific transport; USB, Ethernet and serial
//! bridges all fit behind this trait.

pub mod serial;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::Result;

/// The byte stream handed to the background read task.
pub type DriverReader = Box<dyn AsyncRead + Send + Unpin>;

/// Trait for transport driver implementations.
pub trait Driver: Send {
    /// Opens the transport.
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Closes the transport.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes raw bytes to the device.
    ///
    /// Failure is reported to the caller; the core never retries writes.
    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if the transport is open.
    fn is_open(&self) -> bool;

    /// Selects blocking or non-blocking write mode.
    ///
    /// In non-blocking mode a write that cannot be accepted immediately
    /// fails instead of waiting.
    fn set_write_blocks(&mut self, blocks: bool);

    /// Takes the read half for use by the background read task.
    ///
    /// Returns `Some` exactly once per open.
    fn take_reader(&mut self) -> Option<DriverReader>;
}

pub use serial::SerialDriver;
