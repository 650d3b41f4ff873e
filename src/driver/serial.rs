//! Serial/USB driver implementation.
//!
//! Adapter devices enumerate as USB CDC serial ports; this driver speaks to
//! them through `tokio-serial`. Outbound writes go through a bounded queue
//! drained by a writer task, so the blocking-write toggle maps cleanly onto
//! queue semantics: blocking mode waits for space, non-blocking mode fails
//! on a full queue.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;

use crate::driver::{Driver, DriverReader};
use crate::error::{Error, Result};

/// Default baud rate for adapter devices.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening before the device accepts commands.
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(300);

/// Outbound write queue depth.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Configuration for the serial driver.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before traffic is accepted.
    pub open_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            open_delay: DEFAULT_OPEN_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the open delay.
    #[must_use]
    pub const fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

/// Serial driver for adapter devices.
pub struct SerialDriver {
    config: SerialConfig,
    write_tx: Option<mpsc::Sender<Bytes>>,
    write_task: Option<JoinHandle<()>>,
    reader: Option<DriverReader>,
    write_blocks: bool,
}

impl SerialDriver {
    /// Creates a new serial driver with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            write_tx: None,
            write_task: None,
            reader: None,
            write_blocks: true,
        }
    }

    /// Creates a new serial driver for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }
}

impl Driver for SerialDriver {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.write_tx.is_some() {
                return Err(Error::AlreadyOpen);
            }

            tracing::info!("opening serial port: {}", self.config.port);

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Deasserted RTS is required for the device bootloader to hand
            // off to the application firmware.
            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {}", e);
            }

            tokio::time::sleep(self.config.open_delay).await;

            // Drain stale bytes left in the USB buffer from a prior session.
            let mut buf = [0u8; 1024];
            let mut total_drained = 0usize;
            while let Ok(Ok(n)) =
                tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await
            {
                if n == 0 {
                    break;
                }
                total_drained += n;
            }
            if total_drained > 0 {
                tracing::debug!("drained {} stale bytes from buffer", total_drained);
            }

            let (reader, mut writer) = tokio::io::split(stream);
            self.reader = Some(Box::new(reader));

            let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_DEPTH);
            let write_task = tokio::spawn(async move {
                while let Some(data) = write_rx.recv().await {
                    tracing::trace!("writing {} bytes", data.len());
                    if let Err(e) = writer.write_all(&data).await {
                        tracing::error!("serial write error: {}", e);
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        tracing::error!("serial flush error: {}", e);
                        break;
                    }
                }
            });

            self.write_tx = Some(write_tx);
            self.write_task = Some(write_task);

            tracing::info!("serial port open");
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.write_tx.is_some() {
                tracing::info!("closing serial port");
            }
            // Dropping the queue sender ends the writer task after it
            // drains the remaining entries.
            self.write_tx = None;
            if let Some(task) = self.write_task.take() {
                let _ = task.await;
            }
            self.reader = None;
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.write_tx.clone();
        let blocks = self.write_blocks;
        Box::pin(async move {
            let tx = tx.ok_or(Error::NotOpen)?;
            if blocks {
                tx.send(data).await.map_err(|_| Error::NotOpen)
            } else {
                tx.try_send(data).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => Error::WriteQueueFull,
                    mpsc::error::TrySendError::Closed(_) => Error::NotOpen,
                })
            }
        })
    }

    fn is_open(&self) -> bool {
        self.write_tx.is_some()
    }

    fn set_write_blocks(&mut self, blocks: bool) {
        self.write_blocks = blocks;
    }

    fn take_reader(&mut self) -> Option<DriverReader> {
        self.reader.take()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
