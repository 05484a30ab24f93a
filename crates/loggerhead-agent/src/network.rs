//! Network messenger: live packet streaming to a viewer/collection server.
//!
//! Outbound, the sink writes the same framed packets the file sink writes.
//! Inbound, a reader thread answers command messages: pause/resume gate
//! transmission, clock-drift probes are echoed back with the receive time
//! stamped, and a session-send request is surfaced for the collection
//! layer. On shutdown the sink announces the session closed.

use std::io::BufWriter;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use loggerhead_core::errors::SinkError;
use loggerhead_core::{
    CommandMessage, FrameReader, NetworkMessengerConfig, Packet, PacketStreamWriter, Result,
    SessionId, SessionStatus, Timestamp,
};

use crate::messenger::Messenger;

type SharedWriter = Arc<Mutex<PacketStreamWriter<BufWriter<TcpStream>>>>;

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

struct Connection {
    writer: SharedWriter,
    shutdown_handle: TcpStream,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    fn open(
        config: &NetworkMessengerConfig,
        session_id: SessionId,
        paused: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut last_error = None;
        let addrs = config
            .endpoint
            .to_socket_addrs()
            .map_err(|err| SinkError::unreachable(format!("{}: {err}", config.endpoint)))?;

        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let stream = stream.ok_or_else(|| {
            SinkError::unreachable(format!(
                "{}: {}",
                config.endpoint,
                last_error.map_or_else(|| "no addresses".into(), |err| err.to_string())
            ))
        })?;

        stream
            .set_nodelay(true)
            .map_err(|err| SinkError::io("network", err))?;
        let read_half = stream
            .try_clone()
            .map_err(|err| SinkError::io("network", err))?;
        let shutdown_handle = stream
            .try_clone()
            .map_err(|err| SinkError::io("network", err))?;

        let writer: SharedWriter =
            Arc::new(Mutex::new(PacketStreamWriter::new(BufWriter::new(stream))));
        let reader = {
            let writer = writer.clone();
            std::thread::Builder::new()
                .name("loggerhead-net-commands".into())
                .spawn(move || run_command_reader(read_half, writer, paused, session_id))
                .map_err(|err| SinkError::io("network", err))?
        };

        Ok(Self {
            writer,
            shutdown_handle,
            reader: Some(reader),
        })
    }

    fn close(mut self, session_id: SessionId) {
        {
            let mut writer = self.writer.lock();
            let notice = CommandMessage::SessionClosedNotice {
                session_id,
                status: SessionStatus::Normal,
            };
            let _ = notice.write(writer.get_mut());
            let _ = writer.flush();
        }
        let _ = self.shutdown_handle.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// Inbound command loop; exits when the peer closes the channel.
fn run_command_reader(
    stream: TcpStream,
    writer: SharedWriter,
    paused: Arc<AtomicBool>,
    session_id: SessionId,
) {
    let mut frames = FrameReader::new(stream);
    loop {
        match CommandMessage::read(&mut frames) {
            Ok(Some(command)) => match command {
                CommandMessage::PauseHeaderStream => {
                    tracing::debug!("viewer paused the stream");
                    paused.store(true, Ordering::Release);
                }
                CommandMessage::ResumeHeaderStream => {
                    tracing::debug!("viewer resumed the stream");
                    paused.store(false, Ordering::Release);
                }
                CommandMessage::StartLiveView { viewer_id, .. } => {
                    tracing::info!(%viewer_id, "live view started");
                    paused.store(false, Ordering::Release);
                }
                CommandMessage::StopLiveView { viewer_id } => {
                    tracing::info!(%viewer_id, "live view stopped");
                    paused.store(true, Ordering::Release);
                }
                CommandMessage::ClockDriftProbe { sent_at, .. } => {
                    let echo = CommandMessage::ClockDriftProbe {
                        sent_at,
                        echoed_at: Timestamp::now(),
                    };
                    let mut writer = writer.lock();
                    if echo.write(writer.get_mut()).is_err() || writer.flush().is_err() {
                        break;
                    }
                }
                CommandMessage::RequestSessionSend { session_id: requested } => {
                    tracing::info!(%requested, "server requested session send");
                }
                CommandMessage::SessionClosedNotice { .. } => {}
            },
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "command channel failed");
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Network Messenger
// ----------------------------------------------------------------------------

/// The live-view/collection network sink.
pub struct NetworkMessenger {
    config: NetworkMessengerConfig,
    session_id: SessionId,
    connection: Option<Connection>,
    paused: Arc<AtomicBool>,
    unflushed_bytes: u64,
}

impl NetworkMessenger {
    pub fn new(config: NetworkMessengerConfig, session_id: SessionId) -> Self {
        Self {
            config,
            session_id,
            connection: None,
            paused: Arc::new(AtomicBool::new(false)),
            unflushed_bytes: 0,
        }
    }

    /// True while a viewer has transmission paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.connection.is_none() {
            self.connection = Some(Connection::open(
                &self.config,
                self.session_id,
                self.paused.clone(),
            )?);
            tracing::info!(endpoint = %self.config.endpoint, "network sink connected");
        }
        Ok(())
    }
}

impl Messenger for NetworkMessenger {
    fn name(&self) -> &str {
        "network"
    }

    fn write_batch(&mut self, batch: &[Arc<Packet>]) -> Result<()> {
        self.ensure_connected()?;
        if self.is_paused() {
            // The viewer asked for silence; the data stays durable in the
            // file sink, so skipping here is not loss.
            return Ok(());
        }

        let writer = self
            .connection
            .as_ref()
            .expect("connection present")
            .writer
            .clone();
        let mut writer = writer.lock();
        for packet in batch {
            match writer.write_packet(packet) {
                Ok(written) => self.unflushed_bytes += written,
                Err(err) => {
                    // Broken pipe: drop the connection so the next attempt
                    // reconnects from scratch.
                    drop(writer);
                    self.connection = None;
                    self.unflushed_bytes = 0;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn buffered_bytes(&self) -> u64 {
        self.unflushed_bytes
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.as_ref() {
            connection.writer.lock().flush()?;
            self.unflushed_bytes = 0;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close(self.session_id);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loggerhead_core::{Marker, PacketRegistry, PacketStreamReader};
    use std::net::TcpListener;
    use std::time::Duration;

    fn test_config(port: u16) -> NetworkMessengerConfig {
        NetworkMessengerConfig {
            enabled: true,
            endpoint: format!("127.0.0.1:{port}"),
            connect_timeout: Duration::from_secs(2),
        }
    }

    fn marker(label: &str) -> Arc<Packet> {
        Arc::new(Packet::Marker(Marker::new(Timestamp::now(), label)))
    }

    #[test]
    fn test_packets_reach_the_viewer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = PacketStreamReader::new(stream, PacketRegistry::with_builtins());
            let mut labels = Vec::new();
            while let Ok(Some(packet)) = reader.next_packet() {
                if let Packet::Marker(marker) = packet.as_ref() {
                    labels.push(marker.label.clone());
                }
            }
            labels
        });

        let mut sink = NetworkMessenger::new(test_config(port), SessionId::generate());
        sink.write_batch(&[marker("one"), marker("two")]).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        let labels = server.join().unwrap();
        assert_eq!(labels, ["one", "two"]);
    }

    #[test]
    fn test_session_closed_notice_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let session_id = SessionId::generate();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut frames = FrameReader::new(stream);
            CommandMessage::read(&mut frames).unwrap()
        });

        let mut sink = NetworkMessenger::new(test_config(port), session_id);
        sink.write_batch(&[marker("x")]).unwrap();
        sink.close().unwrap();

        match server.join().unwrap() {
            Some(CommandMessage::SessionClosedNotice { session_id: sent, status }) => {
                assert_eq!(sent, session_id);
                assert_eq!(status, SessionStatus::Normal);
            }
            other => panic!("expected session-closed notice, got {other:?}"),
        }
    }

    #[test]
    fn test_pause_gates_transmission() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut sink = NetworkMessenger::new(test_config(port), SessionId::generate());
        sink.write_batch(&[marker("before")]).unwrap();

        let (server_stream, _) = listener.accept().unwrap();
        CommandMessage::PauseHeaderStream
            .write(&mut (&server_stream))
            .unwrap();

        // Wait for the reader thread to apply the pause.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !sink.is_paused() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.is_paused());

        // Paused writes succeed but transmit nothing.
        let buffered_before = sink.buffered_bytes();
        sink.write_batch(&[marker("suppressed")]).unwrap();
        assert_eq!(sink.buffered_bytes(), buffered_before);

        sink.close().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint_is_sink_error() {
        // Port 1 on localhost is essentially never listening.
        let mut sink = NetworkMessenger::new(test_config(1), SessionId::generate());
        let err = sink.write_batch(&[marker("x")]).unwrap_err();
        assert!(matches!(
            err,
            loggerhead_core::LoggerheadError::Sink(SinkError::Unreachable { .. })
        ));
    }
}
