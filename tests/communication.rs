//! End-to-end tests for the communication pipeline over an in-memory driver.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

use canbridge::{
    Command, Communication, DeviceEvent, DeviceEventHandler, Driver, DriverReader, Encoder, Error,
    MessageCallback, MessageFilter, MessageKind, NetId, Result, State, protocol::encode_frame,
};

/// In-memory driver backed by duplex pipes, one per session. The test holds
/// the device ends and plays the adapter: it reads outbound frames and
/// injects inbound ones.
struct MockDriver {
    pending: VecDeque<DuplexStream>,
    reader: Option<DriverReader>,
    writer: Option<WriteHalf<DuplexStream>>,
}

impl MockDriver {
    fn new() -> (Self, DuplexStream) {
        let (driver, mut devices) = Self::with_sessions(1);
        (driver, devices.remove(0))
    }

    /// Pre-arms `sessions` pipes; each open consumes the next one.
    fn with_sessions(sessions: usize) -> (Self, Vec<DuplexStream>) {
        let mut pending = VecDeque::new();
        let mut devices = Vec::new();
        for _ in 0..sessions {
            let (host, device) = tokio::io::duplex(4096);
            pending.push_back(host);
            devices.push(device);
        }
        (
            Self {
                pending,
                reader: None,
                writer: None,
            },
            devices,
        )
    }
}

impl Driver for MockDriver {
    fn open(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Err(Error::AlreadyOpen);
            }
            let host = self.pending.pop_front().ok_or(Error::NotOpen)?;
            let (reader, writer) = tokio::io::split(host);
            self.reader = Some(Box::new(reader));
            self.writer = Some(writer);
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.writer = None;
            self.reader = None;
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::NotOpen)?;
            writer.write_all(&data).await.map_err(Error::Io)
        })
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn set_write_blocks(&mut self, _blocks: bool) {}

    fn take_reader(&mut self) -> Option<DriverReader> {
        self.reader.take()
    }
}

/// Report sink that collects events for later inspection.
fn collecting_report() -> (DeviceEventHandler, Arc<Mutex<Vec<DeviceEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler: DeviceEventHandler =
        Arc::new(move |event: &DeviceEvent| sink.lock().unwrap().push(event.clone()));
    (handler, events)
}

fn main51_frame(command: Command, data: &[u8]) -> Bytes {
    let mut payload = vec![command as u8];
    payload.extend_from_slice(data);
    encode_frame(NetId::Main51 as u8, &payload).unwrap()
}

async fn open_standard() -> (Communication, DuplexStream, Arc<Mutex<Vec<DeviceEvent>>>) {
    let (report, events) = collecting_report();
    let (driver, device) = MockDriver::new();
    let comm = Communication::standard(report, Box::new(driver));
    comm.open().await.unwrap();
    (comm, device, events)
}

#[tokio::test]
async fn dispatch_by_subtype_and_removal() {
    let (comm, mut device, _events) = open_standard().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = comm.add_message_callback(MessageCallback::new(
        MessageFilter::main51(Command::EnableNetworkCommunication),
        move |message| {
            let _ = tx.send(message.subtype());
        },
    ));

    // Subtype 0x07 matches, 0x08 must be skipped.
    device
        .write_all(&main51_frame(Command::EnableNetworkCommunication, &[1]))
        .await
        .unwrap();
    device
        .write_all(&main51_frame(Command::EnableNetworkCommunicationEx, &[1]))
        .await
        .unwrap();
    device
        .write_all(&main51_frame(Command::EnableNetworkCommunication, &[0]))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, Some(0x07));
    assert_eq!(second, Some(0x07));

    // After removal the callback never fires again.
    assert!(comm.remove_message_callback(id));
    assert!(!comm.remove_message_callback(id));
    device
        .write_all(&main51_frame(Command::EnableNetworkCommunication, &[1]))
        .await
        .unwrap();
    let silent = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(silent.is_err() || silent.unwrap().is_none());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn overlapping_callbacks_all_fire() {
    let (comm, mut device, _events) = open_standard().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for label in ["network", "subtype"] {
        let tx = tx.clone();
        let filter = if label == "network" {
            MessageFilter::network(NetId::Main51)
        } else {
            MessageFilter::main51(Command::ReadSettings)
        };
        comm.add_message_callback(MessageCallback::new(filter, move |_| {
            let _ = tx.send(label);
        }));
    }

    device
        .write_all(&main51_frame(Command::ReadSettings, &[0xAB]))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    // Registration order.
    assert_eq!(first, "network");
    assert_eq!(second, "subtype");

    comm.close().await.unwrap();
}

#[tokio::test]
async fn send_command_frames_bytes_on_the_wire() {
    let (comm, mut device, _events) = open_standard().await;

    comm.send_command_bool(Command::EnableNetworkCommunication, true)
        .await
        .unwrap();

    // Sync + netid + len + [opcode, arg] + checksum.
    let mut frame = [0u8; 7];
    device.read_exact(&mut frame).await.unwrap();
    let expected = Encoder::new()
        .encode(Command::EnableNetworkCommunication, &[1])
        .unwrap();
    assert_eq!(&frame[..], &expected[..]);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn wait_observes_reply_raced_with_trigger() {
    let (comm, device, _events) = open_standard().await;
    let device = Arc::new(tokio::sync::Mutex::new(device));

    // The trigger injects the reply and waits for it to be fully dispatched
    // before returning: the waiter must still observe it (no lost wakeup).
    let trigger_device = Arc::clone(&device);
    let reply = comm
        .wait_for_message_with(
            async move {
                let mut device = trigger_device.lock().await;
                device
                    .write_all(&main51_frame(Command::ReadSettings, &[0x01, 0x02]))
                    .await
                    .map_err(Error::Io)?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            },
            MessageFilter::main51(Command::ReadSettings),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
        .expect("reply dispatched during trigger must be observed");

    match &reply.kind {
        MessageKind::Main51 { command, data } => {
            assert_eq!(*command, Command::ReadSettings);
            assert_eq!(&data[..], &[0x01, 0x02]);
        }
        other => panic!("unexpected kind: {other:?}"),
    }

    comm.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_leaves_no_residual_registration() {
    let (comm, _device, _events) = open_standard().await;

    let before = comm.message_callback_count();
    let start = tokio::time::Instant::now();
    let reply = comm
        .wait_for_message(
            MessageFilter::main51(Command::ReadSettings),
            Duration::from_millis(50),
        )
        .await;

    assert!(reply.is_none());
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(comm.message_callback_count(), before);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn failed_trigger_bails_and_deregisters() {
    let (comm, _device, _events) = open_standard().await;

    let result = comm
        .wait_for_message_with(
            async { Err(Error::NotOpen) },
            MessageFilter::any(),
            Duration::from_secs(5),
        )
        .await;

    assert!(matches!(result, Err(Error::NotOpen)));
    assert_eq!(comm.message_callback_count(), 0);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn get_serial_number_round_trip() {
    let (comm, mut device, _events) = open_standard().await;

    // Play the device: consume the request, answer with the serial.
    let responder = tokio::spawn(async move {
        let mut request = [0u8; 6];
        device.read_exact(&mut request).await.unwrap();
        assert_eq!(request[4], Command::RequestSerialNumber as u8);
        device
            .write_all(&main51_frame(Command::RequestSerialNumber, b"CB24007"))
            .await
            .unwrap();
        device
    });

    let serial = comm
        .get_serial_number(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("device answered");
    assert_eq!(serial.serial, "CB24007");
    assert_eq!(comm.message_callback_count(), 0);

    let _device = responder.await.unwrap();
    comm.close().await.unwrap();
}

#[tokio::test]
async fn get_settings_round_trip() {
    let (comm, mut device, _events) = open_standard().await;

    let responder = tokio::spawn(async move {
        let mut request = [0u8; 6];
        device.read_exact(&mut request).await.unwrap();
        assert_eq!(request[4], Command::ReadSettings as u8);
        device
            .write_all(&main51_frame(Command::ReadSettings, &[0xDE, 0xAD, 0xBE, 0xEF]))
            .await
            .unwrap();
        device
    });

    let settings = comm
        .get_settings(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("device answered");
    assert_eq!(&settings[..], &[0xDE, 0xAD, 0xBE, 0xEF]);

    let _device = responder.await.unwrap();
    comm.close().await.unwrap();
}

#[tokio::test]
async fn corrupt_framing_is_reported_and_recovered() {
    let (comm, mut device, events) = open_standard().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    comm.add_message_callback(MessageCallback::all(move |message| {
        let _ = tx.send(message.network);
    }));

    // Garbage, then a valid frame: the pipeline must recover.
    let mut stream = vec![0x13, 0x37, 0x42];
    stream.extend_from_slice(&main51_frame(Command::ReadSettings, &[]));
    device.write_all(&stream).await.unwrap();

    let network = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(network, NetId::Main51);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| matches!(event, DeviceEvent::FramingError(_))));

    comm.close().await.unwrap();
}

#[tokio::test]
async fn unknown_network_is_reported_and_skipped() {
    let (comm, mut device, events) = open_standard().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    comm.add_message_callback(MessageCallback::all(move |message| {
        let _ = tx.send(message.network);
    }));

    device
        .write_all(&encode_frame(0x7F, &[0x01]).unwrap())
        .await
        .unwrap();
    device
        .write_all(&main51_frame(Command::ReadSettings, &[]))
        .await
        .unwrap();

    let network = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(network, NetId::Main51);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| matches!(event, DeviceEvent::DecodeError(_))));

    comm.close().await.unwrap();
}

#[tokio::test]
async fn bus_frame_traffic_is_dispatched() {
    let (comm, mut device, _events) = open_standard().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    comm.add_message_callback(MessageCallback::new(
        MessageFilter::network(NetId::Hscan),
        move |message| {
            if let MessageKind::Frame(frame) = &message.kind {
                let _ = tx.send(frame.clone());
            }
        },
    ));

    let mut payload = 0x7DF_u32.to_le_bytes().to_vec();
    payload.push(2);
    payload.extend_from_slice(&[0x01, 0x02]);
    device
        .write_all(&encode_frame(NetId::Hscan as u8, &payload).unwrap())
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.arbitration_id, 0x7DF);
    assert_eq!(&frame.data[..], &[0x01, 0x02]);

    comm.close().await.unwrap();
}

#[tokio::test]
async fn double_open_is_rejected() {
    let (comm, _device, _events) = open_standard().await;

    assert!(matches!(comm.open().await, Err(Error::AlreadyOpen)));
    assert!(comm.is_open());

    comm.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_stops_dispatch() {
    let (comm, mut device, _events) = open_standard().await;

    let count = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&count);
    comm.add_message_callback(MessageCallback::all(move |_| {
        *counter.lock().unwrap() += 1;
    }));

    // Close while the read task is blocked on the transport.
    comm.close().await.unwrap();
    assert_eq!(comm.state(), State::Closed);
    assert!(!comm.is_open());
    assert!(!comm.is_disconnected());

    // Traffic arriving after close must never reach callbacks.
    let _ = device
        .write_all(&main51_frame(Command::ReadSettings, &[]))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*count.lock().unwrap(), 0);

    comm.close().await.unwrap(); // idempotent
}

#[tokio::test]
async fn transport_loss_transitions_to_disconnected() {
    let (comm, device, events) = open_standard().await;

    // Dropping the device end closes the stream under the read task.
    drop(device);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !comm.is_disconnected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(comm.state(), State::Disconnected);
    assert!(!comm.is_open());
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| matches!(event, DeviceEvent::Disconnected)));

    // An explicit close from Disconnected is still fine.
    comm.close().await.unwrap();
    assert_eq!(comm.state(), State::Closed);
}

#[tokio::test]
async fn reopen_after_disconnect() {
    let (report, _events) = collecting_report();
    let (driver, mut devices) = MockDriver::with_sessions(2);
    let second = devices.pop().unwrap();
    let first = devices.pop().unwrap();
    let comm = Communication::standard(report, Box::new(driver));

    comm.open().await.unwrap();
    drop(first);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !comm.is_disconnected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(comm.is_disconnected());

    // Reopening tears down the dead session inside open(); no intervening
    // close() is required.
    comm.open().await.unwrap();
    assert_eq!(comm.state(), State::Open);

    // Traffic flows on the fresh session.
    let (tx, mut rx) = mpsc::unbounded_channel();
    comm.add_message_callback(MessageCallback::all(move |message| {
        let _ = tx.send(message.network);
    }));
    let mut device = second;
    device
        .write_all(&main51_frame(Command::ReadSettings, &[]))
        .await
        .unwrap();
    let network = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(network, NetId::Main51);

    comm.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_racing_transport_loss_ends_closed() {
    // Drop the device end and close immediately, so the read task's loss
    // handling races the explicit close. Whoever wins, a completed close
    // must leave the channel Closed, never Disconnected.
    for _ in 0..16 {
        let (report, _events) = collecting_report();
        let (driver, device) = MockDriver::new();
        let comm = Communication::standard(report, Box::new(driver));
        comm.open().await.unwrap();

        drop(device);
        comm.close().await.unwrap();

        assert_eq!(comm.state(), State::Closed);
        assert!(!comm.is_disconnected());
    }
}
