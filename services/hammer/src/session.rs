//! `HammerSession` (spec.md §9): the client-role counterpart to `authenticator::session::AuthSession`,
//! replaying one login handshake per connection and recording its outcome. Grounded on
//! `NECROHammer::HammerSocket::AsyncReadCallback`/`HandlePacketAuthLoginGatherInfoResponse`/
//! `HandlePacketAuthLoginProofResponse` — same two-reply handshake, driven here by `flux`'s
//! generic executor instead of a hand-rolled `boost::asio` callback chain.

use crate::protocol::{self, LoginAttemptReply};
use crate::report::{Outcome, Report};
use flux::buffer::NetworkMessage;
use flux::crypto;
use flux::error::{NetworkError, NetworkResult};
use flux::logging::{debug, warn, Logger};
use flux::time::elapsed_since;
use flux::tls::{TlsRole, TlsSocket};
use mio::net::TcpStream;
use mio::{Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshaking,
    AwaitingGatherReply,
    AwaitingLoginReply,
    Finished,
}

pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_version: (u8, u8, u8),
}

pub struct HammerSession {
    socket: TlsSocket,
    phase: Phase,
    creds: Credentials,
    iv_prefix: u32,
    started_at: Instant,
    handshake_timeout: Duration,
    reply_timeout: Duration,
    report: Arc<Mutex<Report>>,
    log: Logger,
}

impl HammerSession {
    pub fn connect(
        target: SocketAddr,
        role: &TlsRole,
        creds: Credentials,
        handshake_timeout: Duration,
        reply_timeout: Duration,
        report: Arc<Mutex<Report>>,
        log: Logger,
    ) -> NetworkResult<HammerSession> {
        let stream = TcpStream::connect(&target)?;
        let socket = TlsSocket::new(stream, role, target)?;

        Ok(HammerSession {
            socket,
            phase: Phase::Handshaking,
            creds,
            iv_prefix: crypto::random_u32(),
            started_at: Instant::now(),
            handshake_timeout,
            reply_timeout,
            report,
            log,
        })
    }

    fn finish(&mut self, outcome: Outcome) {
        if self.phase == Phase::Finished {
            return;
        }
        self.phase = Phase::Finished;
        self.report.lock().expect("report mutex poisoned").record(outcome, self.started_at.elapsed());
        self.socket.close(&self.log);
    }

    fn send_gather_info(&mut self) {
        let (major, minor, revision) = self.creds.client_version;
        let msg = protocol::encode_gather_info_request(major, minor, revision, self.creds.username.as_bytes());
        self.queue(msg);
        self.phase = Phase::AwaitingGatherReply;
    }

    fn send_login_attempt(&mut self) {
        let msg = protocol::encode_login_attempt(self.iv_prefix, self.creds.password.as_bytes());
        self.queue(msg);
        self.phase = Phase::AwaitingLoginReply;
    }

    fn queue(&mut self, msg: NetworkMessage) {
        self.socket.queue_outbound(msg);
        if let Err(e) = self.socket.async_write() {
            warn!(self.log, "write failed sending request"; "peer" => %self.socket.peer_addr(), "error" => ?e);
        }
    }

    fn process_inbound(&mut self) -> NetworkResult<()> {
        match self.phase {
            Phase::AwaitingGatherReply => {
                if self.socket.inbound().readable() < 2 {
                    return Ok(());
                }
                let reply = {
                    let mut cursor = self.socket.inbound().reader();
                    protocol::parse_gather_info_reply(&mut cursor)
                        .map_err(|_| NetworkError::ProtocolViolation("truncated gather_info reply"))?
                };
                self.socket.inbound_mut().consume(2);

                if reply.result == protocol::RESULT_SUCCESS {
                    self.send_login_attempt();
                } else if reply.result == 1 {
                    self.finish(Outcome::UnknownAccount);
                } else {
                    self.finish(Outcome::WrongClientVersion);
                }
                Ok(())
            }
            Phase::AwaitingLoginReply => {
                let readable = self.socket.inbound().readable();
                if readable < 4 {
                    return Ok(());
                }

                let tail_size = u16::from_le_bytes([
                    self.socket.inbound().readable_slice()[2],
                    self.socket.inbound().readable_slice()[3],
                ]) as usize;
                let total = 4 + tail_size;
                if readable < total {
                    return Ok(());
                }

                let reply = {
                    let mut cursor = self.socket.inbound().reader();
                    protocol::parse_login_attempt_reply(&mut cursor)
                        .map_err(|_| NetworkError::ProtocolViolation("truncated login_attempt reply"))?
                };
                self.socket.inbound_mut().consume(total);

                match reply {
                    LoginAttemptReply::Success { session_key, greetcode } => {
                        debug!(self.log, "authenticated";
                            "peer" => %self.socket.peer_addr(),
                            "session_key_head" => session_key[0],
                            "greetcode_head" => greetcode[0]);
                        self.finish(Outcome::Success);
                    }
                    LoginAttemptReply::Failed => self.finish(Outcome::WrongPassword),
                }
                Ok(())
            }
            Phase::Handshaking | Phase::Finished => Ok(()),
        }
    }
}

impl flux::session::Session for HammerSession {
    fn on_readable(&mut self) -> NetworkResult<()> {
        match self.socket.async_read(&self.log) {
            Ok(_) => self.process_inbound(),
            Err(NetworkError::Wait) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn on_writable(&mut self) -> NetworkResult<()> {
        self.socket.async_write()
    }

    fn update(&mut self, now: Instant) -> Result<(), ()> {
        if self.socket.is_closed() {
            return Err(());
        }

        match self.phase {
            Phase::Handshaking => {
                if elapsed_since(self.started_at, now, self.handshake_timeout) {
                    self.finish(Outcome::TransportFailure);
                    return Err(());
                }
                if !self.socket.is_handshaking() {
                    self.send_gather_info();
                }
            }
            Phase::AwaitingGatherReply | Phase::AwaitingLoginReply => {
                if elapsed_since(self.started_at, now, self.reply_timeout) {
                    self.finish(Outcome::TransportFailure);
                    return Err(());
                }
            }
            Phase::Finished => return Err(()),
        }

        Ok(())
    }

    fn close(&mut self) {
        self.finish(Outcome::TransportFailure);
    }

    fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    fn register(&self, poll: &Poll, token: Token) -> io::Result<()> {
        self.socket.register(poll, token)
    }

    fn reregister(&self, poll: &Poll, token: Token) -> io::Result<()> {
        self.socket.reregister(poll, token)
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        self.socket.deregister(poll)
    }
}
