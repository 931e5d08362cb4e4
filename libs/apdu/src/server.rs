//! TCP transport for the command core
//!
//! Framing below the APDU layer belongs to the transport, not the core: each
//! packet and each reply crosses the socket as a two-byte big-endian length
//! followed by that many bytes, one reply per packet. Every connection gets
//! its own [`CommandProcessor`] so no request state is ever shared between
//! channels.

use crate::dispatch::{CommandProcessor, ProcessorConfig, SigningBackend};
use crate::envelope::{MAX_PACKET_DATA, PACKET_MIN_LEN};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// RAII guard for connection counting
/// Automatically increments counter on creation and decrements on drop
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        let count = counter.fetch_add(1, Ordering::Relaxed);
        log::debug!("Connection established - count: {} -> {}", count, count + 1);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.counter.fetch_sub(1, Ordering::Relaxed);
        log::debug!("Connection closed - count: {} -> {}", count, count - 1);
    }
}

/// Server error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Connection timeout")]
    Timeout,

    /// Framed packet larger than any valid APDU
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// TCP APDU server
pub struct ApduServer<B> {
    /// Listen address
    address: SocketAddr,
    /// Signing backend, cloned into each connection's processor
    backend: B,
    /// Processor limits and policy
    config: ProcessorConfig,
    /// Optional timeout for client connections
    timeout: Option<Duration>,
    /// Maximum concurrent connections (default: 4)
    max_connections: usize,
    /// Connection counter (incremented on connect, decremented on disconnect)
    connection_count: Arc<AtomicUsize>,
}

impl<B: SigningBackend + Clone + Send + 'static> ApduServer<B> {
    /// Create new APDU server
    #[must_use]
    pub fn new(address: SocketAddr, backend: B, timeout: Option<Duration>) -> Self {
        Self {
            address,
            backend,
            config: ProcessorConfig::default(),
            timeout,
            max_connections: 4,
            connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set processor limits and policy
    #[must_use]
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set maximum concurrent connections
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Run the server accept loop.
    ///
    /// Runs indefinitely until an error occurs. Signal handling belongs to
    /// the calling application.
    pub fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.address)?;
        eprintln!("Listening on {}", self.address);
        self.accept_loop(&listener)
    }

    /// Main accept loop for incoming connections
    fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept()?;

            // Check connection limit before spawning thread
            let current = self.connection_count.load(Ordering::Relaxed);
            if current >= self.max_connections {
                log::warn!(
                    "Connection limit reached ({current}/{}), rejecting connection from {addr}",
                    self.max_connections
                );
                drop(socket);
                continue;
            }

            // One processor per connection: the in-flight request state is
            // exclusively owned by this channel
            let mut processor =
                CommandProcessor::with_config(self.backend.clone(), self.config.clone());
            let timeout = self.timeout;
            let guard = ConnectionGuard::new(Arc::clone(&self.connection_count));

            std::thread::spawn(move || {
                let _guard = guard;
                if let Err(e) = handle_connection(socket, addr, &mut processor, timeout) {
                    eprintln!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Handle a single TCP connection
fn handle_connection<B: SigningBackend>(
    mut socket: TcpStream,
    addr: SocketAddr,
    processor: &mut CommandProcessor<B>,
    timeout: Option<Duration>,
) -> Result<()> {
    log::debug!("handle_connection started for {addr}");
    configure_socket(&socket, timeout)?;

    let mut packet_count = 0u32;
    loop {
        packet_count += 1;
        log::debug!("Waiting for packet #{packet_count} from {addr}");

        let Some(packet) = read_packet(&mut socket, addr, packet_count)? else {
            // A dropped connection abandons any in-progress request; the
            // processor dies with the connection, but reset explicitly so a
            // panic-free teardown is observable in tests.
            processor.reset();
            return Ok(());
        };

        let reply = processor.handle_packet(&packet).to_bytes();
        log::debug!("=> SEND ({} bytes): {}", reply.len(), hex::encode(&reply));

        let reply_len = u16::try_from(reply.len())
            .map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "reply exceeds frame size")
            })?
            .to_be_bytes();
        socket.write_all(&reply_len)?;
        socket.write_all(&reply)?;
        socket.flush()?;
    }
}

fn configure_socket(socket: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    socket.set_nodelay(true)?;
    if let Some(timeout_duration) = timeout {
        socket.set_read_timeout(Some(timeout_duration))?;
        socket.set_write_timeout(Some(timeout_duration))?;
    }
    Ok(())
}

/// Read one length-framed packet. Returns None if the client closed the
/// connection.
fn read_packet(
    socket: &mut TcpStream,
    addr: SocketAddr,
    packet_count: u32,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    if let Err(e) = socket.read_exact(&mut len_buf) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            log::debug!(
                "Client {} closed connection after {} packets",
                addr,
                packet_count - 1
            );
            return Ok(None);
        }
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
            log::debug!("Timeout reading from {addr}: {e}");
            return Err(ServerError::Timeout);
        }
        log::debug!("Read error from {addr}: {e}");
        return Err(e.into());
    }

    let packet_len = u16::from_be_bytes(len_buf) as usize;
    if packet_len > PACKET_MIN_LEN + MAX_PACKET_DATA {
        return Err(ServerError::PacketTooLarge(packet_len));
    }

    let mut packet = vec![0u8; packet_len];
    socket.read_exact(&mut packet)?;
    log::debug!("<= RECV ({} bytes): {}", packet.len(), hex::encode(&packet));
    Ok(Some(packet))
}
