//! # Serial Port Reader Module
//!
//! Owns the serial connection to the accelerometer. Runs on a dedicated
//! thread: bytes from the port go through the packet codec and decoded
//! samples are pushed into the history's staging buffer.
//!
//! ## Key Components
//! - `PortReader`: start/stop handle used by the consumer side
//! - `Transport`: any blocking byte stream with a read timeout
//! - Outgoing command queue drained by the reader thread
//!
//! ## Loop
//! ```text
//! while !stop_requested:
//!     write queued commands
//!     read (returns after at most the read timeout)
//!     split into frames, decode, push samples
//! ```
//! Commands are therefore applied before the next read, not immediately.
//! Commands whose write fails stay queued for the next connection.
//! The read timeout bounds how long `stop` waits for the thread.
//!
//! ## Errors
//! Malformed frames and unrecognized packets are counted and dropped.
//! A failing or closed transport ends the loop and is reported as a
//! `ReaderEvent`.

use crate::codec::{decode_frame, encode_command, FrameAccumulator, Packet};
use crate::error::ReaderError;
use crate::history::SampleSink;
use crate::sensor::{Command, ReaderEvent, ReaderStats, ReaderStatsSnapshot, SensorRange};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serial2::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Baud rate the firmware talks at
pub const BAUD_RATE: u32 = 921_600;

/// Default bound on a single blocking read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 512;

/// Blocking byte stream the reader runs on.
///
/// Reads must return within a bounded time: either with data or with a
/// `TimedOut`/`WouldBlock` error. `Ok(0)` means the stream was closed.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Open a serial port in raw 8N1 mode with a read timeout
pub fn open_serial(port: &str, settings: &PortSettings) -> Result<SerialPort, ReaderError> {
    let mut serial = SerialPort::open(port, settings.baud_rate).map_err(|source| {
        ReaderError::Open {
            port: port.to_string(),
            source,
        }
    })?;
    serial
        .set_read_timeout(settings.read_timeout)
        .map_err(|source| ReaderError::Configure {
            port: port.to_string(),
            source,
        })?;
    Ok(serial)
}

/// Handle to the reader thread.
///
/// The command queue outlives individual connections: commands queued
/// while stopped are sent once the next connection starts.
pub struct PortReader {
    sink: SampleSink,
    settings: PortSettings,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
    event_tx: Sender<ReaderEvent>,
    stats: Arc<ReaderStats>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PortReader {
    /// Creates a reader that pushes into `sink`.
    ///
    /// Returns the reader and the receiving end of its status events.
    pub fn new(sink: SampleSink) -> (Self, Receiver<ReaderEvent>) {
        Self::with_settings(sink, PortSettings::default())
    }

    pub fn with_settings(sink: SampleSink, settings: PortSettings) -> (Self, Receiver<ReaderEvent>) {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let reader = PortReader {
            sink,
            settings,
            command_tx,
            command_rx,
            event_tx,
            stats: Arc::new(ReaderStats::default()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        };

        (reader, event_rx)
    }

    /// Open `port` and start reading on a new thread
    pub fn start(&mut self, port: &str) -> Result<(), ReaderError> {
        self.reap_finished()?;
        log::info!("Port reader: opening {} at {} baud", port, self.settings.baud_rate);
        let serial = open_serial(port, &self.settings)?;
        self.start_with_transport(port, serial)
    }

    /// Start reading from an already opened transport
    pub fn start_with_transport<T>(&mut self, name: &str, transport: T) -> Result<(), ReaderError>
    where
        T: Transport + 'static,
    {
        self.reap_finished()?;

        // Each connection gets its own stop flag
        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flag = stop_flag.clone();

        let reader_loop = ReaderLoop {
            transport,
            port: name.to_string(),
            sink: self.sink.clone(),
            commands: self.command_rx.clone(),
            requeue: self.command_tx.clone(),
            events: self.event_tx.clone(),
            stats: self.stats.clone(),
            stop_flag,
        };

        let handle = thread::Builder::new()
            .name("port-reader".to_string())
            .spawn(move || reader_loop.run())
            .map_err(ReaderError::Io)?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Request the reader to stop and wait for its thread.
    ///
    /// Once this returns the transport is closed and no further samples
    /// are pushed.
    pub fn stop(&mut self) -> Result<(), ReaderError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };

        log::debug!("Port reader: setting stop flag");
        self.stop_flag.store(true, Ordering::Relaxed);
        handle.join().map_err(|_| ReaderError::ThreadPanicked)
    }

    /// Whether the reader thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Queue a sensor range change
    pub fn set_range(&self, range: SensorRange) {
        self.send_command(Command::SetRange(range));
    }

    /// Queue a command for the reader thread
    pub fn send_command(&self, command: Command) {
        // Receiver lives in self, the queue cannot be disconnected
        let _ = self.command_tx.send(command);
    }

    /// Commands waiting to be sent
    pub fn pending_commands(&self) -> usize {
        self.command_tx.len()
    }

    pub fn stats(&self) -> ReaderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Join a thread that already ended on its own
    fn reap_finished(&mut self) -> Result<(), ReaderError> {
        match self.thread.take() {
            Some(handle) if handle.is_finished() => {
                handle.join().map_err(|_| ReaderError::ThreadPanicked)
            }
            Some(handle) => {
                self.thread = Some(handle);
                Err(ReaderError::AlreadyRunning)
            }
            None => Ok(()),
        }
    }
}

impl Drop for PortReader {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Port reader: {}", e);
        }
    }
}

/// State owned by the reader thread
struct ReaderLoop<T> {
    transport: T,
    port: String,
    sink: SampleSink,
    commands: Receiver<Command>,
    requeue: Sender<Command>,
    events: Sender<ReaderEvent>,
    stats: Arc<ReaderStats>,
    stop_flag: Arc<AtomicBool>,
}

impl<T: Transport> ReaderLoop<T> {
    fn run(mut self) {
        log::info!("Port reader: connected to {}", self.port);
        let _ = self.events.send(ReaderEvent::Connected(self.port.clone()));

        match self.read_until_stopped() {
            Ok(()) => {
                log::info!("Port reader: {} disconnected", self.port);
                let _ = self.events.send(ReaderEvent::Disconnected);
            }
            Err(e) => {
                log::error!("Port reader: {}", e);
                let _ = self.events.send(ReaderEvent::Error(e.to_string()));
            }
        }
    }

    fn read_until_stopped(&mut self) -> Result<(), ReaderError> {
        let mut framer = FrameAccumulator::new();
        let mut buffer = [0u8; READ_CHUNK];

        while !self.stop_flag.load(Ordering::Relaxed) {
            self.send_pending_commands()?;

            let count = match self.transport.read(&mut buffer) {
                Ok(0) => {
                    log::info!("Port reader: {} closed by peer", self.port);
                    return Ok(());
                }
                Ok(count) => count,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(ReaderError::Io(e)),
            };

            let overflowed = framer.overflow_count();
            framer.extend(&buffer[..count], |frame| self.handle_frame(frame));
            for _ in overflowed..framer.overflow_count() {
                self.stats.record_dropped_frame();
            }
        }

        Ok(())
    }

    fn send_pending_commands(&mut self) -> Result<(), ReaderError> {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    log::info!("Port reader: sending {:?}", command);
                    let written = self
                        .transport
                        .write_all(&encode_command(&command))
                        .and_then(|()| self.transport.flush());
                    if let Err(e) = written {
                        self.requeue(command);
                        return Err(ReaderError::Io(e));
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Put `failed` and everything queued behind it back on the queue, in
    /// order, so the next connection sends them
    fn requeue(&self, failed: Command) {
        let unsent: Vec<Command> = std::iter::once(failed)
            .chain(self.commands.try_iter())
            .collect();
        log::warn!("Port reader: {} command(s) left unsent", unsent.len());
        for command in unsent {
            let _ = self.requeue.send(command);
        }
    }

    fn handle_frame(&self, frame: &[u8]) {
        match decode_frame(frame) {
            Ok(Some(Packet::Sample(raw))) => {
                self.sink.push(raw.to_g());
                self.stats.record_sample();
            }
            Ok(Some(Packet::Error(message))) => {
                log::warn!("Device error: {}", message);
                self.stats.record_device_error();
                let _ = self.events.send(ReaderEvent::DeviceError(message));
            }
            Ok(Some(Packet::Unrecognized { tag, len })) => {
                log::debug!("Dropping packet with tag {} ({} bytes)", tag, len);
                self.stats.record_dropped_packet();
            }
            Ok(None) => self.stats.record_dropped_packet(),
            Err(e) => {
                log::debug!("Dropping malformed frame: {}", e);
                self.stats.record_dropped_frame();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_error, encode_sample, RawSample, FRAME_DELIMITER, TAG_SET_RANGE};
    use crate::history::SampleHistory;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Replays a fixed byte stream, then reports end of stream
    struct ScriptedTransport {
        input: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let transport = ScriptedTransport {
                input: Cursor::new(input),
                written: written.clone(),
            };
            (transport, written)
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            // Small reads so frames straddle read boundaries
            let limit = buf.len().min(5);
            self.input.read(&mut buf[..limit])
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Never delivers data, times out like an idle serial port
    struct IdleTransport;

    impl Read for IdleTransport {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_millis(5));
            Err(std::io::Error::new(ErrorKind::TimedOut, "read timed out"))
        }
    }

    impl Write for IdleTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Fails on the first read, like an unplugged adapter
    struct BrokenTransport;

    impl Read for BrokenTransport {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged"))
        }
    }

    impl Write for BrokenTransport {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn wait_until_finished(reader: &PortReader) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!reader.is_running(), "reader did not finish");
    }

    #[test]
    fn test_three_samples_end_to_end() {
        let raw = RawSample {
            range: 4,
            x: 1000,
            y: -1000,
            z: 0,
        };
        let stream: Vec<u8> = (0..3).flat_map(|_| encode_sample(&raw)).collect();

        let mut history = SampleHistory::new();
        let (mut reader, events) = PortReader::new(history.sink());
        let (transport, _) = ScriptedTransport::new(stream);
        reader.start_with_transport("scripted", transport).unwrap();
        wait_until_finished(&reader);
        reader.stop().unwrap();

        assert_eq!(history.flush(), 3);
        let expected_x = 4.0 / 32767.0 * 1000.0;
        for sample in history.snapshot_all() {
            assert_eq!(sample.x, expected_x);
            assert_eq!(sample.y, -expected_x);
            assert_eq!(sample.z, 0.0);
        }
        assert_eq!(reader.stats().samples, 3);

        let received: Vec<ReaderEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                ReaderEvent::Connected("scripted".to_string()),
                ReaderEvent::Disconnected
            ]
        );
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let raw = RawSample {
            range: 2,
            x: 1,
            y: 2,
            z: 3,
        };
        let mut stream = encode_sample(&raw);
        // Truncated stuffing
        stream.extend_from_slice(&[0x06, 0x01, 0x02, FRAME_DELIMITER]);
        // Sample tag with the wrong length
        stream.extend_from_slice(&[0x04, 0x01, 0x02, 0x03, FRAME_DELIMITER]);
        // Unknown tag from newer firmware
        stream.extend_from_slice(&[0x03, 0x09, 0x01, FRAME_DELIMITER]);
        stream.extend_from_slice(&encode_error("FIFO overrun"));
        stream.extend(encode_sample(&raw));

        let mut history = SampleHistory::new();
        let (mut reader, events) = PortReader::new(history.sink());
        let (transport, _) = ScriptedTransport::new(stream);
        reader.start_with_transport("scripted", transport).unwrap();
        wait_until_finished(&reader);
        reader.stop().unwrap();

        assert_eq!(history.flush(), 2);
        let stats = reader.stats();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(stats.dropped_packets, 2);
        assert_eq!(stats.device_errors, 1);
        assert!(events
            .try_iter()
            .any(|event| event == ReaderEvent::DeviceError("FIFO overrun".to_string())));
    }

    #[test]
    fn test_queued_range_command_is_written() {
        let history = SampleHistory::new();
        let (mut reader, _events) = PortReader::new(history.sink());
        reader.set_range(SensorRange::G16);
        assert_eq!(reader.pending_commands(), 1);

        let (transport, written) = ScriptedTransport::new(Vec::new());
        reader.start_with_transport("scripted", transport).unwrap();
        wait_until_finished(&reader);
        reader.stop().unwrap();

        assert_eq!(reader.pending_commands(), 0);
        assert_eq!(
            *written.lock().unwrap(),
            vec![0x03, TAG_SET_RANGE, 16, FRAME_DELIMITER]
        );
    }

    #[test]
    fn test_stop_returns_promptly_without_data() {
        let history = SampleHistory::new();
        let (mut reader, events) = PortReader::new(history.sink());
        reader.start_with_transport("idle", IdleTransport).unwrap();
        assert!(reader.is_running());
        assert!(matches!(
            reader.start_with_transport("idle", IdleTransport),
            Err(ReaderError::AlreadyRunning)
        ));

        let started = Instant::now();
        reader.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!reader.is_running());
        assert_eq!(events.try_iter().last(), Some(ReaderEvent::Disconnected));
    }

    #[test]
    fn test_transport_failure_ends_reader() {
        let history = SampleHistory::new();
        let (mut reader, events) = PortReader::new(history.sink());
        reader.start_with_transport("broken", BrokenTransport).unwrap();
        wait_until_finished(&reader);

        let last = events.try_iter().last();
        assert!(matches!(last, Some(ReaderEvent::Error(ref msg)) if msg.contains("unplugged")));

        // A finished reader can be restarted
        reader.start_with_transport("idle", IdleTransport).unwrap();
        reader.stop().unwrap();
    }

    #[test]
    fn test_commands_survive_failed_write() {
        let history = SampleHistory::new();
        let (mut reader, _events) = PortReader::new(history.sink());
        reader.set_range(SensorRange::G8);
        reader.set_range(SensorRange::G2);

        reader.start_with_transport("broken", BrokenTransport).unwrap();
        wait_until_finished(&reader);
        reader.stop().unwrap();
        assert_eq!(reader.pending_commands(), 2);

        // Order is kept, so the newest range is applied last
        let (transport, written) = ScriptedTransport::new(Vec::new());
        reader.start_with_transport("scripted", transport).unwrap();
        wait_until_finished(&reader);
        reader.stop().unwrap();
        assert_eq!(reader.pending_commands(), 0);
        assert_eq!(
            *written.lock().unwrap(),
            vec![
                0x03,
                TAG_SET_RANGE,
                8,
                FRAME_DELIMITER,
                0x03,
                TAG_SET_RANGE,
                2,
                FRAME_DELIMITER
            ]
        );
    }

    #[test]
    fn test_open_missing_port_fails() {
        let history = SampleHistory::new();
        let (mut reader, _events) = PortReader::new(history.sink());
        let result = reader.start("/dev/does-not-exist-spectrograph");
        assert!(matches!(result, Err(ReaderError::Open { .. })));
        assert!(!reader.is_running());
    }
}
