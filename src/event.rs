//! Device event reporting.
//!
//! Recoverable conditions discovered on the read path (corrupt frames,
//! undecodable packets, transport loss) are surfaced to the owning
//! application through a report sink rather than raised as errors. The sink
//! is a plain callback capability supplied at [`Communication`] construction.
//!
//! [`Communication`]: crate::Communication

use std::sync::Arc;

use crate::error::{DecodeError, FrameError};

/// A recoverable condition reported by the communication core.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The packetizer hit corrupt framing and resynchronized.
    FramingError(FrameError),
    /// A well-framed packet could not be decoded and was dropped.
    DecodeError(DecodeError),
    /// The transport reported a read failure.
    TransportError { detail: String },
    /// The transport was lost; the channel is now disconnected.
    Disconnected,
    /// A registered message handler panicked during dispatch.
    CallbackPanicked { id: u64 },
}

/// Report sink invoked for every [`DeviceEvent`].
///
/// Called from the background read task; implementations must be cheap and
/// must not call back into [`Communication::close`].
///
/// [`Communication::close`]: crate::Communication::close
pub type DeviceEventHandler = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// A report sink that forwards events to `tracing` at warn level.
#[must_use]
pub fn tracing_report() -> DeviceEventHandler {
    Arc::new(|event| tracing::warn!(?event, "device event"))
}
