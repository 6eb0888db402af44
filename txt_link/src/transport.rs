//! Transport trait and the TCP transport.
//!
//! The engine runs on top of a connection-style byte channel. A
//! transport moves whole frames: it owns the length framing on the stream
//! and reports a bounded-wait timeout as `Ok(None)` so the worker can count
//! a miss instead of failing.
//!
//! # Lifecycle
//!
//! 1. `connect()` - called once while the engine is `Starting`
//! 2. `send_frame()` / `recv_frame()` - called every cycle by the worker
//! 3. `disconnect()` - called once while the engine is `Stopping`

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use txt_common::consts::MAX_FRAME_LEN;
use txt_common::error::{TxtError, TxtResult};

/// Length prefix size on the byte stream.
const LEN_PREFIX: usize = 4;

/// Frame transport used by the communication worker.
pub trait Transport: Send {
    /// Short transport identifier for logs (e.g. "tcp", "simulation").
    fn name(&self) -> &'static str;

    /// Establish the channel.
    ///
    /// # Errors
    /// Return `TxtError::Connect` if the peer cannot be reached.
    fn connect(&mut self, timeout: Duration) -> TxtResult<()>;

    /// Send one complete frame.
    fn send_frame(&mut self, frame: &[u8]) -> TxtResult<()>;

    /// Receive one complete frame, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when no complete frame arrived in time.
    fn recv_frame(&mut self, timeout: Duration) -> TxtResult<Option<Vec<u8>>>;

    /// Orderly shutdown of the channel. Must be idempotent.
    fn disconnect(&mut self) -> TxtResult<()>;
}

/// Length-prefixed frames over a TCP stream.
///
/// Each frame on the wire is a `u32` little-endian payload length followed
/// by the payload.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    rx: Vec<u8>,
}

impl TcpTransport {
    /// Transport for `host:port`; nothing is opened until `connect()`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            rx: Vec::with_capacity(4096),
        }
    }

    fn connect_error(&self, reason: impl Into<String>) -> TxtError {
        TxtError::Connect {
            host: self.host.clone(),
            port: self.port,
            reason: reason.into(),
        }
    }

    fn stream(&mut self) -> TxtResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| TxtError::InvalidState("transport not connected".to_string()))
    }

    /// Pop one complete frame from the receive buffer, if present.
    ///
    /// An oversized length prefix means the stream lost frame sync. The
    /// connection is closed so later exchanges fail fast as transport misses
    /// instead of misparsing the remaining bytes.
    fn take_buffered_frame(&mut self) -> TxtResult<Option<Vec<u8>>> {
        if self.rx.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.rx[0], self.rx[1], self.rx[2], self.rx[3]]) as usize;
        if len > MAX_FRAME_LEN {
            warn!("Frame sync lost on {}:{}, closing the connection", self.host, self.port);
            self.rx.clear();
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            return Err(TxtError::MalformedFrame(format!(
                "announced frame length {len} exceeds {MAX_FRAME_LEN}"
            )));
        }
        if self.rx.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        let frame = self.rx[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.rx.drain(..LEN_PREFIX + len);
        Ok(Some(frame))
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn connect(&mut self, timeout: Duration) -> TxtResult<()> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_error(format!("address resolution failed: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            debug!("Connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| self.connect_error(e.to_string()))?;
                    info!("Connected to {}:{} ({})", self.host, self.port, addr);
                    self.rx.clear();
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(self.connect_error(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no address resolved".to_string()),
        ))
    }

    fn send_frame(&mut self, frame: &[u8]) -> TxtResult<()> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TxtError::MalformedFrame(format!(
                "outgoing frame of {} bytes exceeds {MAX_FRAME_LEN}",
                frame.len()
            )));
        }
        let stream = self.stream()?;
        let mut buf = Vec::with_capacity(LEN_PREFIX + frame.len());
        buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        buf.extend_from_slice(frame);
        stream.write_all(&buf)?;
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> TxtResult<Option<Vec<u8>>> {
        if let Some(frame) = self.take_buffered_frame()? {
            return Ok(Some(frame));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 2048];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let stream = self.stream()?;
            stream.set_read_timeout(Some(remaining))?;
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(TxtError::Transport {
                        source: std::io::Error::new(
                            ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        ),
                    });
                }
                Ok(n) => {
                    self.rx.extend_from_slice(&chunk[..n]);
                    if let Some(frame) = self.take_buffered_frame()? {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn disconnect(&mut self) -> TxtResult<()> {
        if let Some(stream) = self.stream.take() {
            info!("Disconnecting from {}:{}", self.host, self.port);
            // Peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.rx.clear();
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Write one length-prefixed frame to any byte sink.
///
/// Used by firmware-side peers (tests, the simulated controller server).
pub fn write_framed<W: Write>(sink: &mut W, frame: &[u8]) -> std::io::Result<()> {
    sink.write_all(&(frame.len() as u32).to_le_bytes())?;
    sink.write_all(frame)
}

/// Read one length-prefixed frame from any blocking byte source.
pub fn read_framed<R: Read>(source: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; LEN_PREFIX];
    source.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("frame length {len} exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut frame = vec![0u8; len];
    source.read_exact(&mut frame)?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    #[test]
    fn framed_helpers_roundtrip() {
        let mut buf = Vec::new();
        write_framed(&mut buf, b"abc").unwrap();
        write_framed(&mut buf, b"").unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_framed(&mut cursor).unwrap(), b"abc");
        assert!(read_framed(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(read_framed(&mut cursor).is_err());
    }

    #[test]
    fn send_before_connect_is_invalid_state() {
        let mut transport = TcpTransport::new("127.0.0.1", 1);
        assert!(matches!(
            transport.send_frame(b"x"),
            Err(TxtError::InvalidState(_))
        ));
    }

    #[test]
    fn tcp_frames_are_reassembled() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let frame = read_framed(&mut sock).unwrap();
            // Echo back split into two writes.
            let mut out = Vec::new();
            write_framed(&mut out, &frame).unwrap();
            let (a, b) = out.split_at(3);
            sock.write_all(a).unwrap();
            sock.flush().unwrap();
            std::thread::sleep(Duration::from_millis(20));
            sock.write_all(b).unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();
        transport.send_frame(b"hello").unwrap();
        let got = transport.recv_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
        peer.join().unwrap();

        // Peer is gone: nothing more arrives.
        let next = transport.recv_frame(Duration::from_millis(50));
        assert!(matches!(next, Ok(None) | Err(TxtError::Transport { .. })));
        transport.disconnect().unwrap();
    }

    #[test]
    fn oversized_prefix_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&1_000_000u32.to_le_bytes()).unwrap();
            sock.write_all(b"trailing bytes").unwrap();
            // Hold the socket until the client hangs up.
            let _ = read_framed(&mut sock);
        });

        let mut transport = TcpTransport::new("127.0.0.1", port);
        transport.connect(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            transport.recv_frame(Duration::from_secs(1)),
            Err(TxtError::MalformedFrame(_))
        ));
        assert!(matches!(
            transport.send_frame(b"next"),
            Err(TxtError::InvalidState(_))
        ));
        peer.join().unwrap();
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port);
        let result = transport.connect(Duration::from_millis(200));
        assert!(matches!(result, Err(TxtError::Connect { .. })));
    }
}
