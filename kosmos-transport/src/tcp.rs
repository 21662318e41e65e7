//! TCP transport to the Kosmos board's control daemon

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::FrameAssembler;
use crate::types::{TransportInfo, TransportType};
use crate::Transport;

/// Channel capacity for reassembled reply frames
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// How often the reader thread checks the shutdown flag when idle
const READER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// TCP link to a Kosmos board
///
/// Writes go straight to the socket. A dedicated reader thread reassembles
/// reply frames from the byte stream and hands them over a channel.
pub struct TcpTransport {
    writer: Mutex<TcpStream>,
    frames: flume::Receiver<Vec<u8>>,
    info: TransportInfo,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl TcpTransport {
    /// Connect to `address` (`host:port`)
    pub fn connect(address: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let addr = resolve(address)?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| TransportError::Unreachable(format!("{address}: {e}")))?;
        stream.set_nodelay(true)?;
        debug!("Connected to Kosmos board at {}", addr);

        let reader = stream.try_clone()?;
        reader.set_read_timeout(Some(READER_POLL_INTERVAL))?;

        let (tx, rx) = flume::bounded(FRAME_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let connected_clone = connected.clone();
        let shutdown_clone = shutdown.clone();
        std::thread::Builder::new()
            .name("kosmos-link-reader".into())
            .spawn(move || run_reader_loop(reader, tx, connected_clone, shutdown_clone))?;

        Ok(Self {
            writer: Mutex::new(stream),
            frames: rx,
            info: TransportInfo::new(TransportType::Tcp, addr.to_string()),
            connected,
            shutdown,
        })
    }
}

fn resolve(address: &str) -> Result<SocketAddr, TransportError> {
    address
        .to_socket_addrs()
        .map_err(|e| TransportError::Unreachable(format!("{address}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Unreachable(format!("{address}: no address")))
}

fn run_reader_loop(
    mut stream: TcpStream,
    tx: flume::Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Link reader thread started");
    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; 1024];

    while !shutdown.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Kosmos board closed the connection");
                break;
            }
            Ok(len) => {
                assembler.push(&buf[..len]);
                while let Some(frame) = assembler.next_frame() {
                    if tx.send(frame).is_err() {
                        // Transport dropped
                        shutdown.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!("Link reader error: {}", e);
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    debug!("Link reader thread exiting");
}

impl Transport for TcpTransport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut writer = self.writer.lock();
        writer.write_all(frame)?;
        writer.flush()?;
        Ok(())
    }

    fn read_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(flume::RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(flume::RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn info(&self) -> &TransportInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.writer.lock().shutdown(Shutdown::Both)?;
        Ok(())
    }

    fn discard_pending(&self) {
        let stale = self.frames.drain().count();
        if stale > 0 {
            debug!("Discarded {} stale reply frames", stale);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        debug!("TcpTransport dropped, signaling reader shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_reply, build_request, cmd, msg, ReplyCode};
    use std::net::TcpListener;

    #[test]
    fn test_frames_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 7];
            sock.read_exact(&mut req).unwrap();
            let reply = build_reply(msg::SEQUENCER, cmd::STATUS, ReplyCode::Ok, &[7; 4]).unwrap();
            // Split the reply to exercise reassembly
            sock.write_all(&reply[..3]).unwrap();
            sock.flush().unwrap();
            std::thread::sleep(Duration::from_millis(20));
            sock.write_all(&reply[3..]).unwrap();
            req
        });

        let transport = TcpTransport::connect(&addr, Duration::from_secs(1)).unwrap();
        let request = build_request(msg::SEQUENCER, cmd::STATUS, &[]).unwrap();
        transport.send_frame(&request).unwrap();
        let frame = transport.read_frame(Duration::from_secs(2)).unwrap();

        let reply = crate::protocol::parse_reply(&frame).unwrap();
        assert_eq!(reply.payload, vec![7; 4]);
        assert_eq!(server.join().unwrap().to_vec(), request);
        assert_eq!(transport.info().transport_type, TransportType::Tcp);
    }

    #[test]
    fn test_unreachable_address() {
        assert!(matches!(
            TcpTransport::connect("not a socket address", Duration::from_millis(10)),
            Err(TransportError::Unreachable(_))
        ));
    }
}
