//! Communication orchestrator.
//!
//! [`Communication`] owns the driver, codec and callback registry, runs the
//! background read task, and layers a bounded-time wait-for-reply primitive
//! on top of the asynchronous dispatch path.
//!
//! Inbound flow: driver bytes → packetizer → decoder → dispatch to every
//! matching callback. Outbound flow: command + arguments → encoder → driver.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::driver::{Driver, DriverReader};
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, DeviceEventHandler};
use crate::message::callback::invoke_snapshot;
use crate::message::{CallbackRegistry, Message, MessageCallback, MessageFilter, MessageKind,
    SerialNumber};
use crate::protocol::{
    Command, Decoder, Encoder, PacketizerFactory, standard_packetizer_factory,
};

/// Default timeout for the synchronous wait operations.
pub const SYNC_MESSAGE_TIMEOUT: Duration = Duration::from_millis(50);

/// Read buffer size for the background read task.
const READ_BUFFER_SIZE: usize = 1024;

/// Lifecycle state of a communication channel.
///
/// `Disconnected` is reached when the transport is lost underneath an open
/// channel; it is distinct from an application-requested `Closed` so
/// consumers can tell intentional shutdown from device loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Not open; no read task running.
    Closed = 0,
    /// Open; the background read task is running.
    Open = 1,
    /// Transport lost while open; reopen to recover.
    Disconnected = 2,
}

impl State {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::Disconnected,
            _ => Self::Closed,
        }
    }
}

/// State shared between the orchestrator and its read task.
struct Shared {
    registry: StdMutex<CallbackRegistry>,
    state: AtomicU8,
    closing: AtomicBool,
    report: DeviceEventHandler,
}

impl Shared {
    /// Locks the registry, recovering from a poisoned lock.
    ///
    /// Handlers run outside this lock, so poisoning cannot leave the map in
    /// a torn state.
    fn registry(&self) -> MutexGuard<'_, CallbackRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Communication channel to one adapter device.
///
/// Exactly one background read task exists per open instance. All other
/// operations may be invoked concurrently from any number of tasks.
///
/// Handlers registered through [`add_message_callback`] run on the read
/// task; they must not call [`close`], since doing so would deadlock the
/// join.
///
/// [`add_message_callback`]: Communication::add_message_callback
/// [`close`]: Communication::close
pub struct Communication {
    driver: Mutex<Box<dyn Driver>>,
    make_packetizer: PacketizerFactory,
    encoder: Encoder,
    decoder: Arc<Decoder>,
    shared: Arc<Shared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Communication {
    /// Creates a communication channel with an explicit codec.
    ///
    /// The packetizer factory lets a device family plug in its own framing
    /// without changing the orchestrator; a fresh packetizer is built on
    /// every open.
    #[must_use]
    pub fn new(
        report: DeviceEventHandler,
        driver: Box<dyn Driver>,
        make_packetizer: PacketizerFactory,
        encoder: Encoder,
        decoder: Decoder,
    ) -> Self {
        Self {
            driver: Mutex::new(driver),
            make_packetizer,
            encoder,
            decoder: Arc::new(decoder),
            shared: Arc::new(Shared {
                registry: StdMutex::new(CallbackRegistry::new()),
                state: AtomicU8::new(State::Closed as u8),
                closing: AtomicBool::new(false),
                report,
            }),
            read_task: Mutex::new(None),
        }
    }

    /// Creates a communication channel using the standard framing codec.
    #[must_use]
    pub fn standard(report: DeviceEventHandler, driver: Box<dyn Driver>) -> Self {
        Self::new(
            report,
            driver,
            standard_packetizer_factory(),
            Encoder::new(),
            Decoder::new(),
        )
    }

    // ==================== Lifecycle ====================

    /// Opens the channel and starts the background read task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyOpen`] if the channel is already open, or the
    /// driver's error if the transport fails to open. A second open never
    /// spawns a second reader.
    pub async fn open(&self) -> Result<()> {
        // The task slot doubles as the lifecycle lock: holding it across the
        // whole open keeps a concurrent open from spawning a second reader.
        let mut slot = self.read_task.lock().await;
        if self.shared.state() == State::Open {
            return Err(Error::AlreadyOpen);
        }

        // A previous session's task may still be parked after a disconnect.
        if let Some(task) = slot.take() {
            task.abort();
            let _ = task.await;
        }

        let reader = {
            let mut driver = self.driver.lock().await;
            // After a transport loss the driver still holds the dead
            // session's state; tear it down before reopening.
            if driver.is_open() {
                driver.close().await?;
            }
            driver.open().await?;
            driver.take_reader().ok_or(Error::NotOpen)?
        };

        let packetizer = (self.make_packetizer)();
        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.set_state(State::Open);

        let decoder = Arc::clone(&self.decoder);
        let shared = Arc::clone(&self.shared);
        *slot = Some(tokio::spawn(read_task(reader, packetizer, decoder, shared)));

        tracing::info!("communication open");
        Ok(())
    }

    /// Closes the channel.
    ///
    /// Idempotent and safe to call in any state. The background read task is
    /// stopped and joined before the driver is closed, so no callback fires
    /// after this returns.
    pub async fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::SeqCst);

        if let Some(task) = self.read_task.lock().await.take() {
            // Handlers are synchronous, so the abort lands at an await point
            // and never interrupts one mid-call.
            task.abort();
            let _ = task.await;
        }

        // Stored after the join: a transport loss racing this close may have
        // written Disconnected from the read task, and Closed must win.
        self.shared.set_state(State::Closed);

        self.driver.lock().await.close().await?;
        tracing::info!("communication closed");
        Ok(())
    }

    /// Returns true if the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.state() == State::Open
    }

    /// Returns true if the transport was lost underneath an open channel.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shared.state() == State::Disconnected
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.shared.state()
    }

    // ==================== Outbound ====================

    /// Encodes a command and writes it to the driver.
    ///
    /// Does not wait for a reply; pair with [`wait_for_message_with`] for
    /// request/response exchanges.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the driver write fails. Writes are
    /// never retried by the core.
    ///
    /// [`wait_for_message_with`]: Communication::wait_for_message_with
    pub async fn send_command(&self, command: Command, arguments: &[u8]) -> Result<()> {
        let frame = self.encoder.encode(command, arguments)?;
        tracing::trace!("sending {command:?}: {}", hex::encode(&frame));
        self.raw_write(frame).await
    }

    /// Sends a command with a single boolean argument byte.
    pub async fn send_command_bool(&self, command: Command, value: bool) -> Result<()> {
        self.send_command(command, &[u8::from(value)]).await
    }

    /// Writes pre-framed bytes directly to the driver.
    pub async fn raw_write(&self, data: Bytes) -> Result<()> {
        self.driver.lock().await.write(data).await
    }

    /// Selects blocking or non-blocking driver write mode.
    pub async fn set_write_blocks(&self, blocks: bool) {
        self.driver.lock().await.set_write_blocks(blocks);
    }

    // ==================== Callback registry ====================

    /// Registers a message callback, returning its id.
    ///
    /// Ids are strictly increasing and never reused. Multiple callbacks with
    /// overlapping filters all fire, in registration order.
    pub fn add_message_callback(&self, callback: MessageCallback) -> u64 {
        self.shared.registry().add(callback)
    }

    /// Removes a message callback by id, returning whether it existed.
    pub fn remove_message_callback(&self, id: u64) -> bool {
        self.shared.registry().remove(id)
    }

    /// Returns the number of registered callbacks (including internal
    /// one-shot waiters). Diagnostic.
    #[must_use]
    pub fn message_callback_count(&self) -> usize {
        self.shared.registry().len()
    }

    // ==================== Synchronous waits ====================

    /// Waits for the first message matching `filter`, up to `timeout`.
    ///
    /// Returns `None` on timeout, a normal outcome rather than an error.
    /// The timeout is a best-effort wall-clock lower bound on the wait.
    pub async fn wait_for_message(
        &self,
        filter: MessageFilter,
        timeout: Duration,
    ) -> Option<Arc<Message>> {
        match self
            .wait_for_message_with(std::future::ready(Ok(())), filter, timeout)
            .await
        {
            Ok(message) => message,
            Err(_) => None,
        }
    }

    /// Waits for a matching message, running `trigger` once the waiter is
    /// registered.
    ///
    /// The internal one-shot callback is registered *before* `trigger` runs,
    /// eliminating the race where a fast reply could arrive before the
    /// waiter is listening. `trigger` is intended to issue the request that
    /// provokes the reply; if it fails, the wait is abandoned immediately
    /// and its error is returned. The internal callback is deregistered on
    /// every path.
    ///
    /// The timeout window opens once `trigger` has completed, so a slow
    /// trigger does not eat into the wait; replies arriving while the
    /// trigger runs are still captured.
    ///
    /// # Errors
    ///
    /// Returns `trigger`'s error if it fails. Timeout is `Ok(None)`.
    pub async fn wait_for_message_with<F>(
        &self,
        trigger: F,
        filter: MessageFilter,
        timeout: Duration,
    ) -> Result<Option<Arc<Message>>>
    where
        F: Future<Output = Result<()>>,
    {
        let (tx, rx) = oneshot::channel();
        let slot = StdMutex::new(Some(tx));
        let id = self.add_message_callback(MessageCallback::new(filter, move |message| {
            if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(Arc::clone(message));
            }
        }));

        if let Err(e) = trigger.await {
            self.remove_message_callback(id);
            return Err(e);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.remove_message_callback(id);

        match result {
            Ok(Ok(message)) => Ok(Some(message)),
            // Timed out, or the channel closed without a match.
            _ => Ok(None),
        }
    }

    /// Requests and returns the device serial number.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent; `Ok(None)` if no
    /// reply arrived within `timeout`.
    pub async fn get_serial_number(&self, timeout: Duration) -> Result<Option<SerialNumber>> {
        let reply = self
            .wait_for_message_with(
                self.send_command(Command::RequestSerialNumber, &[]),
                MessageFilter::main51(Command::RequestSerialNumber),
                timeout,
            )
            .await?;

        Ok(reply.and_then(|message| match &message.kind {
            MessageKind::SerialNumber(serial) => Some(serial.clone()),
            _ => None,
        }))
    }

    /// Requests and returns the device settings blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent; `Ok(None)` if no
    /// reply arrived within `timeout`.
    pub async fn get_settings(&self, timeout: Duration) -> Result<Option<Bytes>> {
        let reply = self
            .wait_for_message_with(
                self.send_command(Command::ReadSettings, &[]),
                MessageFilter::main51(Command::ReadSettings),
                timeout,
            )
            .await?;

        Ok(reply.and_then(|message| match &message.kind {
            MessageKind::Main51 { data, .. } => Some(data.clone()),
            _ => None,
        }))
    }
}

impl Drop for Communication {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.read_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Background read task: the single reader for one open channel.
///
/// All transport reads, packetization, decoding and dispatch happen here.
/// Per-packet failures are reported and skipped; only transport failure ends
/// the loop.
async fn read_task(
    mut reader: DriverReader,
    mut packetizer: Box<dyn crate::protocol::Packetizer>,
    decoder: Arc<Decoder>,
    shared: Arc<Shared>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                transport_lost(&shared, "end of stream");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                transport_lost(&shared, &e.to_string());
                return;
            }
        };

        tracing::trace!("received {} bytes", n);
        packetizer.input(&buf[..n]);

        loop {
            match packetizer.next_packet() {
                Ok(Some(packet)) => match decoder.decode(&packet) {
                    Ok(message) => dispatch(&shared, &Arc::new(message)),
                    Err(e) => {
                        tracing::warn!("dropping undecodable packet: {}", e);
                        (shared.report)(&DeviceEvent::DecodeError(e));
                    }
                },
                Ok(None) => break, // Need more data
                Err(e) => {
                    tracing::warn!("framing error: {}", e);
                    (shared.report)(&DeviceEvent::FramingError(e));
                    // Packetizer has already resynchronized; keep draining.
                }
            }
        }
    }
}

/// Delivers a message to every matching callback.
///
/// The registry lock is held only to snapshot the matching handlers; the
/// handlers themselves run outside it, so a handler may freely add or
/// remove callbacks.
fn dispatch(shared: &Shared, message: &Arc<Message>) {
    let snapshot = shared.registry().matching(message);
    for id in invoke_snapshot(&snapshot, message) {
        (shared.report)(&DeviceEvent::CallbackPanicked { id });
    }
}

fn transport_lost(shared: &Shared, detail: &str) {
    if shared.closing.load(Ordering::SeqCst) {
        tracing::debug!("read task exiting after close");
        return;
    }

    shared.set_state(State::Disconnected);

    // A close may have started between the check above and the store; it
    // joins this task and then stores Closed, so the store order is safe,
    // but the shutdown should not surface as a device loss.
    if shared.closing.load(Ordering::SeqCst) {
        tracing::debug!("read task exiting after close");
        return;
    }

    tracing::warn!("transport lost: {}", detail);
    (shared.report)(&DeviceEvent::TransportError {
        detail: detail.to_owned(),
    });
    (shared.report)(&DeviceEvent::Disconnected);
}
