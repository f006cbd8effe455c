//! A TLS-wrapped, non-blocking TCP stream (spec.md §4.2). Ciphertext flows through a plain
//! `mio::net::TcpStream`; `rustls` is hand-pumped (`read_tls`/`write_tls`/`process_new_packets`)
//! rather than driven through an async runtime, matching the synchronous pumping idiom shown in
//! the reference `oasis-os` TLS adapter.

use crate::buffer::NetworkMessage;
use crate::error::{NetworkError, NetworkResult};
use crate::logging::{debug, warn, Logger};
use mio::net::TcpStream;
use mio::{Poll, PollOpt, Ready, Token};
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

/// Which side of the handshake a socket plays, and the config it plays it with. Built once per
/// `NetworkThread` and shared (via `Arc`) with every session that thread owns.
#[derive(Clone)]
pub enum TlsRole {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>, rustls::ServerName),
}

enum Conn {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl Conn {
    fn new(role: &TlsRole) -> NetworkResult<Conn> {
        match role {
            TlsRole::Server(config) => {
                Ok(Conn::Server(ServerConnection::new(Arc::clone(config))?))
            }
            TlsRole::Client(config, name) => Ok(Conn::Client(ClientConnection::new(
                Arc::clone(config),
                name.clone(),
            )?)),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Conn::Server(c) => c.is_handshaking(),
            Conn::Client(c) => c.is_handshaking(),
        }
    }

    fn wants_read(&self) -> bool {
        match self {
            Conn::Server(c) => c.wants_read(),
            Conn::Client(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Conn::Server(c) => c.wants_write(),
            Conn::Client(c) => c.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Conn::Server(c) => c.read_tls(rd),
            Conn::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Conn::Server(c) => c.write_tls(wr),
            Conn::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            Conn::Server(c) => c.process_new_packets(),
            Conn::Client(c) => c.process_new_packets(),
        }
    }

    fn reader(&mut self) -> rustls::Reader {
        match self {
            Conn::Server(c) => c.reader(),
            Conn::Client(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer {
        match self {
            Conn::Server(c) => c.writer(),
            Conn::Client(c) => c.writer(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Conn::Server(c) => c.send_close_notify(),
            Conn::Client(c) => c.send_close_notify(),
        }
    }

    fn negotiated_cipher_suite(&self) -> Option<rustls::SupportedCipherSuite> {
        match self {
            Conn::Server(c) => c.negotiated_cipher_suite(),
            Conn::Client(c) => c.negotiated_cipher_suite(),
        }
    }
}

/// The two-phase graceful-shutdown state machine from spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Open,
    /// `close_notify` sent, awaiting the peer's.
    Phase1,
    /// Peer's `close_notify` observed; flushing the last bytes out.
    Phase2,
    Done,
}

/// A TLS-wrapped non-blocking socket. Owns its `NetworkMessage` inbound buffer and an outbound
/// FIFO of fully-built reply messages (spec.md §3 "out-buffers live in an ordered queue from
/// enqueue to fully-written").
pub struct TlsSocket {
    stream: TcpStream,
    conn: Conn,
    peer_addr: SocketAddr,
    inbound: NetworkMessage,
    out_queue: VecDeque<NetworkMessage>,
    shutdown: ShutdownState,
    handshake_logged: bool,
}

impl TlsSocket {
    /// `peer_addr` is supplied by the caller rather than read back off `stream` because a freshly
    /// dialed client-role stream hasn't necessarily completed its TCP handshake yet — `getpeername`
    /// on it would fail — whereas the caller (the connector) already knows the address it dialed.
    pub fn new(stream: TcpStream, role: &TlsRole, peer_addr: SocketAddr) -> NetworkResult<TlsSocket> {
        let conn = Conn::new(role)?;

        Ok(TlsSocket {
            stream,
            conn,
            peer_addr,
            inbound: NetworkMessage::new(),
            out_queue: VecDeque::new(),
            shutdown: ShutdownState::Open,
            handshake_logged: false,
        })
    }

    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[inline]
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    #[inline]
    pub fn inbound(&self) -> &NetworkMessage {
        &self.inbound
    }

    #[inline]
    pub fn inbound_mut(&mut self) -> &mut NetworkMessage {
        &mut self.inbound
    }

    /// Readable interest always; writable interest only while there is something queued to send,
    /// so idle connections don't generate a storm of spurious writable events.
    #[inline]
    fn interest(&self) -> Ready {
        if self.has_pending_writes() {
            Ready::readable() | Ready::writable()
        } else {
            Ready::readable()
        }
    }

    pub fn register(&self, poll: &Poll, token: Token) -> io::Result<()> {
        poll.register(&self.stream, token, self.interest(), PollOpt::edge())
    }

    pub fn reregister(&self, poll: &Poll, token: Token) -> io::Result<()> {
        poll.reregister(&self.stream, token, self.interest(), PollOpt::edge())
    }

    pub fn deregister(&self, poll: &Poll) -> io::Result<()> {
        poll.deregister(&self.stream)
    }

    /// Appends a reply to the outbound FIFO; the caller (`NetworkThread`) is responsible for
    /// driving `async_write` afterwards. Mirrors `queueOutbound` from spec.md §4.2.
    pub fn queue_outbound(&mut self, msg: NetworkMessage) {
        self.out_queue.push_back(msg);
    }

    #[inline]
    pub fn has_pending_writes(&self) -> bool {
        !self.out_queue.is_empty() || self.conn.wants_write()
    }

    /// Pumps ciphertext in, decrypts, and moves any resulting plaintext into `inbound`. Returns
    /// the number of plaintext bytes newly available.
    pub fn async_read(&mut self, log: &Logger) -> NetworkResult<usize> {
        if self.shutdown == ShutdownState::Done {
            return Err(NetworkError::Wait);
        }

        match self.conn.read_tls(&mut self.stream) {
            Ok(0) => {
                return Err(NetworkError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed connection",
                )));
            }
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(self.fail_transport(e)),
        }

        if let Err(e) = self.conn.process_new_packets() {
            return Err(self.fail_transport(io::Error::new(io::ErrorKind::InvalidData, e)));
        }

        if !self.handshake_logged && !self.conn.is_handshaking() {
            self.handshake_logged = true;
            debug!(log, "tls handshake complete";
                "peer" => %self.peer_addr,
                "cipher_suite" => ?self.conn.negotiated_cipher_suite().map(|cs| cs.suite()));
        }

        self.pump_peer_close_notify();

        self.inbound.ensure_writable(1);
        let mut total = 0usize;
        loop {
            let slot = self.inbound.writable_slice_mut();
            if slot.is_empty() {
                self.inbound.ensure_writable(1);
                continue;
            }
            match self.conn.reader().read(slot) {
                Ok(0) => break,
                Ok(n) => {
                    self.inbound.write_completed(n);
                    total += n;
                    self.inbound.ensure_writable(1);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        if total == 0 {
            return Err(NetworkError::Wait);
        }
        Ok(total)
    }

    /// Flushes as much of the outbound FIFO as the socket will currently accept.
    pub fn async_write(&mut self) -> NetworkResult<()> {
        if self.shutdown == ShutdownState::Done {
            return Err(NetworkError::Wait);
        }

        while let Some(msg) = self.out_queue.front_mut() {
            let slice = msg.readable_slice();
            if slice.is_empty() {
                self.out_queue.pop_front();
                continue;
            }

            match self.conn.writer().write(slice) {
                Ok(0) => break,
                Ok(n) => msg.consume(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(self.fail_transport(e)),
            }

            if self.out_queue.front().map(|m| m.is_empty()).unwrap_or(false) {
                self.out_queue.pop_front();
            }
        }

        while self.conn.wants_write() {
            match self.conn.write_tls(&mut self.stream) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(self.fail_transport(e)),
            }
        }

        if self.shutdown == ShutdownState::Phase2 && !self.conn.wants_write() {
            self.shutdown = ShutdownState::Done;
        }

        Ok(())
    }

    /// Idempotent graceful close: send `close_notify`, then wait for the peer's. A transport
    /// error observed while in `Phase2` collapses straight to `Done` rather than hanging.
    pub fn close(&mut self, log: &Logger) {
        if self.shutdown != ShutdownState::Open {
            return;
        }

        self.shutdown = ShutdownState::Phase1;
        self.conn.send_close_notify();
        if let Err(e) = self.async_write() {
            debug!(log, "abrupt close during shutdown"; "peer" => %self.peer_addr, "error" => ?e);
            self.shutdown = ShutdownState::Done;
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shutdown == ShutdownState::Done
    }

    fn pump_peer_close_notify(&mut self) {
        if self.shutdown == ShutdownState::Phase1 {
            self.shutdown = ShutdownState::Phase2;
        }
    }

    fn fail_transport(&mut self, e: io::Error) -> NetworkError {
        if self.shutdown == ShutdownState::Phase1 || self.shutdown == ShutdownState::Phase2 {
            self.shutdown = ShutdownState::Done;
        }
        NetworkError::Transport(e)
    }
}

/// Builds the server-role TLS config from `server.pem` / `pkey.pem`, TLS 1.3 minimum, matching
/// spec.md §6 "TLS materials".
pub fn build_server_config(cert_path: &std::path::Path, key_path: &std::path::Path) -> io::Result<Arc<ServerConfig>> {
    let cert_file = std::fs::File::open(cert_path)?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader)?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    let key_file = std::fs::File::open(key_path)?;
    let mut key_reader = io::BufReader::new(key_file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_reader)?;
    let key = rustls::PrivateKey(keys.remove(0));

    let config = ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3 is always a supported protocol version")
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    Ok(Arc::new(config))
}

/// Builds the client-role TLS config, trusting only `server.pem` (the hammer's "trust anchor" in
/// spec.md §6 rather than a system root store).
pub fn build_client_config(trust_anchor_path: &std::path::Path) -> io::Result<Arc<ClientConfig>> {
    let file = std::fs::File::open(trust_anchor_path)?;
    let mut reader = io::BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots
            .add(&rustls::Certificate(cert))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }

    let config = ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS13])
        .expect("TLS 1.3 is always a supported protocol version")
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

pub fn log_transport_warn(log: &Logger, peer: SocketAddr, err: &NetworkError) {
    warn!(log, "transport error"; "peer" => %peer, "error" => ?err);
}
