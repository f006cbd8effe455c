//! `AuthSession`, the per-connection protocol state machine (spec.md C6). One `AuthSession` is
//! constructed per accepted TLS connection and lives exclusively on one `NetworkThread` for its
//! whole life; DB callbacks reach back into it only through a [`crate::db::CancelToken`].

use crate::account::{AccountData, ClientVersion};
use crate::db::{CancelToken, DBRequest, DatabaseWorker, QueryId, SqlResult, SqlValue};
use crate::protocol::{self, GatherInfoResult};
use flux::buffer::NetworkMessage;
use flux::crypto;
use flux::error::{NetworkError, NetworkResult};
use flux::logging::{info, warn, Logger};
use flux::time::elapsed_since;
use flux::tls::{TlsRole, TlsSocket};
use mio::net::TcpStream;
use mio::{Poll, Token};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// `HANDSHAKING → GATHER_INFO → LOGIN_ATTEMPT → AUTHED` (spec.md §3). Transitions are one-way;
/// `Ord` lets callers sanity-check monotonicity in tests without hand-rolling a state graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SocketStatus {
    Handshaking,
    GatherInfo,
    LoginAttempt,
    Authed,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A monotonic id distinguishing one session from any later session that might reuse the same
/// `Weak` allocation slot — see [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> SessionId {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Server-wide parameters that don't change per-connection, shared read-only across every
/// session (spec.md §6 config keys).
pub struct AuthConfig {
    pub expected_version: ClientVersion,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_accepted_size: usize,
}

pub struct AuthSession {
    id: SessionId,
    socket: TlsSocket,
    status: SocketStatus,
    data: AccountData,
    close_after_send: bool,
    handshake_start: Instant,
    last_activity: Instant,
    config: Arc<AuthConfig>,
    db: Arc<DatabaseWorker>,
    log: Logger,
    self_ref: Weak<Mutex<AuthSession>>,
}

impl AuthSession {
    /// Builds a handshaking session and wraps it in the `Arc<Mutex<_>>` its whole life is spent
    /// in — `Arc::new_cyclic` lets the session capture a `Weak` to itself up front for DB
    /// callbacks to close over (Design Note §9).
    pub fn construct(
        stream: TcpStream,
        role: &TlsRole,
        config: Arc<AuthConfig>,
        db: Arc<DatabaseWorker>,
        log: Logger,
    ) -> NetworkResult<Arc<Mutex<AuthSession>>> {
        let peer_addr = stream.peer_addr()?;
        let socket = TlsSocket::new(stream, role, peer_addr)?;
        let now = Instant::now();

        Ok(Arc::new_cyclic(|weak| {
            Mutex::new(AuthSession {
                id: SessionId::next(),
                socket,
                status: SocketStatus::Handshaking,
                data: AccountData::new(),
                close_after_send: false,
                handshake_start: now,
                last_activity: now,
                config,
                db,
                log,
                self_ref: weak.clone(),
            })
        }))
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn cancel_token(&self) -> CancelToken {
        let strong = self.self_ref.upgrade().expect("cancel_token called while session is being dropped");
        CancelToken::new(&strong, self.id)
    }

    /// Queues a reply and makes an immediate best-effort attempt to flush it — the owning
    /// `NetworkThread`'s next tick will pick up any remainder since a non-empty out-queue adds
    /// `writable` to the socket's registered interest.
    fn send(&mut self, msg: NetworkMessage) {
        self.socket.queue_outbound(msg);
        if let Err(e) = self.socket.async_write() {
            warn!(self.log, "write failed while sending reply"; "peer" => %self.socket.peer_addr(), "error" => ?e);
        }
        self.last_activity = Instant::now();
        self.maybe_finish_close_after_send();
    }

    fn maybe_finish_close_after_send(&mut self) {
        if self.close_after_send && !self.socket.has_pending_writes() {
            self.socket.close(&self.log);
        }
    }

    fn fail(&mut self, reason: &'static str, kind: u8) -> NetworkError {
        warn!(self.log, "rejecting packet"; "peer" => %self.socket.peer_addr(), "opcode" => kind, "reason" => reason);
        NetworkError::ProtocolViolation(reason)
    }

    /// spec.md §4.6 "Receive loop": drains as many complete frames as are buffered.
    fn process_inbound(&mut self) -> NetworkResult<()> {
        loop {
            let readable = self.socket.inbound().readable();
            if readable == 0 {
                break;
            }

            let kind = self.socket.inbound().readable_slice()[0];
            let spec = match protocol::spec_for(kind) {
                Some(spec) => spec,
                None => return Err(self.fail("unknown opcode", kind)),
            };

            if self.status != spec.expected_status {
                return Err(self.fail("status/opcode mismatch", kind));
            }
            if readable < spec.fixed_header_len {
                break;
            }

            // The length-prefix byte is always the last byte of the fixed header for both
            // packet kinds, so it tells us the true total length regardless of the (redundant,
            // and in practice unreliable — see DESIGN.md) on-wire `varSize` field.
            let payload_len = self.socket.inbound().readable_slice()[spec.fixed_header_len - 1] as usize;
            let total = spec.fixed_header_len + payload_len;

            if total > self.config.max_accepted_size {
                return Err(self.fail("oversized payload", kind));
            }
            if readable < total {
                break;
            }

            let result = match kind {
                protocol::KIND_GATHER_INFO => self.handle_gather_info(),
                protocol::KIND_LOGIN_ATTEMPT => self.handle_login_attempt(),
                _ => unreachable!("spec_for only returns known opcodes"),
            };
            result?;

            self.socket.inbound_mut().consume(total);
        }

        Ok(())
    }

    fn handle_gather_info(&mut self) -> NetworkResult<()> {
        let parsed = {
            let mut cursor = self.socket.inbound().reader();
            protocol::parse_gather_info(&mut cursor).map_err(|_| NetworkError::ProtocolViolation("truncated gather_info"))?
        };

        if !protocol::is_valid_identifier(&parsed.username, protocol::MAX_USERNAME) {
            return Err(self.fail("invalid username", protocol::KIND_GATHER_INFO));
        }

        self.data.username = String::from_utf8_lossy(&parsed.username).into_owned();
        self.data.client_version = ClientVersion { major: parsed.major, minor: parsed.minor, revision: parsed.revision };

        let cancel = self.cancel_token();
        let username = self.data.username.clone();

        self.db.enqueue(
            DBRequest::new(QueryId::SelAccountIdByName, vec![SqlValue::Str(username)])
                .with_callback(cancel.clone(), gather_info_callback(cancel)),
        );

        Ok(())
    }

    fn handle_login_attempt(&mut self) -> NetworkResult<()> {
        let parsed = {
            let mut cursor = self.socket.inbound().reader();
            protocol::parse_login_attempt(&mut cursor).map_err(|_| NetworkError::ProtocolViolation("truncated login_attempt"))?
        };

        if !protocol::is_valid_identifier(&parsed.password, protocol::MAX_PASSWORD) {
            return Err(self.fail("invalid password", protocol::KIND_LOGIN_ATTEMPT));
        }

        self.data.client_iv_prefix = parsed.client_iv_prefix;
        self.data.password = Some(String::from_utf8_lossy(&parsed.password).into_owned());

        let account_id = self.data.account_id.expect("account_id set before entering LoginAttempt status");
        let cancel = self.cancel_token();
        let remote_ip = self.socket.peer_addr().ip().to_string();

        self.db.enqueue(
            DBRequest::new(QueryId::CheckPassword, vec![SqlValue::U64(account_id)])
                .with_callback(cancel.clone(), login_attempt_callback(cancel, remote_ip)),
        );

        Ok(())
    }
}

impl flux::session::Session for AuthSession {
    fn on_readable(&mut self) -> NetworkResult<()> {
        match self.socket.async_read(&self.log) {
            Ok(_) => {
                self.last_activity = Instant::now();
                // A single `async_read` can both finish the TLS handshake and decrypt the
                // client's first application-data record (its LOGIN_GATHER_INFO frame).
                // Promote the status here, before draining frames, so `process_inbound`
                // doesn't reject that frame as arriving during `Handshaking`.
                if self.status == SocketStatus::Handshaking && !self.socket.is_handshaking() {
                    self.status = SocketStatus::GatherInfo;
                }
                self.process_inbound()
            }
            Err(NetworkError::Wait) => Ok(()),
            Err(e) => {
                flux::tls::log_transport_warn(&self.log, self.socket.peer_addr(), &e);
                Err(e)
            }
        }
    }

    fn on_writable(&mut self) -> NetworkResult<()> {
        self.socket.async_write()?;
        self.maybe_finish_close_after_send();
        Ok(())
    }

    fn update(&mut self, now: Instant) -> Result<(), ()> {
        if self.socket.is_closed() {
            return Err(());
        }

        if self.status == SocketStatus::Handshaking {
            if elapsed_since(self.handshake_start, now, self.config.handshake_timeout) {
                warn!(self.log, "handshake timeout"; "peer" => %self.socket.peer_addr());
                return Err(());
            }
            if !self.socket.is_handshaking() {
                self.status = SocketStatus::GatherInfo;
                self.last_activity = now;
            }
        } else if elapsed_since(self.last_activity, now, self.config.idle_timeout) {
            info!(self.log, "idle timeout"; "peer" => %self.socket.peer_addr(), "status" => ?self.status);
            return Err(());
        }

        Ok(())
    }

    fn close(&mut self) {
        self.socket.close(&self.log);
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

/// Builds the callback closures for `handle_gather_info`/`handle_login_attempt`. Split out of
/// the `&mut self` handler methods because the closures need to own a strong reference acquired
/// *after* the DB call completes, not at enqueue time (spec.md §9: "pass only a weak clone into
/// the callback; re-upgrade inside the callback and early-return on failure").
pub fn gather_info_callback(
    cancel: CancelToken,
) -> impl FnOnce(SqlResult) + Send + 'static {
    move |result| {
        let session = match cancel.upgrade() {
            Some(s) => s,
            None => return,
        };
        let mut session = session.lock().expect("session mutex poisoned");

        let account_id = match result {
            SqlResult::AccountId(id) => id,
            _ => return,
        };

        match account_id {
            None => {
                session.close_after_send = true;
                let reply = protocol::encode_gather_info_reply(GatherInfoResult::FailedUnknownAccount);
                session.send(reply);
            }
            Some(id) => {
                if session.data.client_version != session.config.expected_version {
                    // Corrected per Design Note §9: both terminal failure replies close after send.
                    session.close_after_send = true;
                    let reply = protocol::encode_gather_info_reply(GatherInfoResult::FailedWrongClientVersion);
                    session.send(reply);
                    return;
                }

                session.data.account_id = Some(id);
                session.status = SocketStatus::LoginAttempt;
                let reply = protocol::encode_gather_info_reply(GatherInfoResult::Success);
                session.send(reply);
            }
        }
    }
}

pub fn login_attempt_callback(cancel: CancelToken, remote_ip: String) -> impl FnOnce(SqlResult) + Send + 'static {
    move |result| {
        let session = match cancel.upgrade() {
            Some(s) => s,
            None => return,
        };
        let mut session = session.lock().expect("session mutex poisoned");

        let stored_password = match result {
            SqlResult::Password(password) => password,
            _ => return,
        };

        let matches = match (&stored_password, &session.data.password) {
            (Some(stored), Some(given)) => stored == given,
            _ => false,
        };
        session.data.password = None;

        if !matches {
            let username = session.data.username.clone();
            session.db.enqueue(DBRequest::new(
                QueryId::InsLogWrongPassword,
                vec![SqlValue::Str(remote_ip.clone()), SqlValue::Str(username)],
            ));
            session.close_after_send = true;
            session.send(protocol::encode_login_failure());
            return;
        }

        let account_id = session.data.account_id.expect("account_id set while authenticating");

        let mut server_iv;
        loop {
            server_iv = crypto::random_u32();
            if server_iv != session.data.client_iv_prefix {
                break;
            }
        }
        session.data.server_iv_prefix = server_iv;
        session.data.iv_counter = 0;

        let mut session_key = [0u8; 16];
        crypto::random_bytes(&mut session_key);
        let mut greetcode = [0u8; 16];
        crypto::random_bytes(&mut greetcode);
        session.data.session_key = Some(session_key);

        session.db.enqueue(DBRequest::new(QueryId::DelPrevSessions, vec![SqlValue::U64(account_id)]));
        session.db.enqueue(DBRequest::new(
            QueryId::InsNewSession,
            vec![
                SqlValue::U64(account_id),
                SqlValue::Bytes(session_key.to_vec()),
                SqlValue::Str(remote_ip.clone()),
                SqlValue::Bytes(greetcode.to_vec()),
            ],
        ));

        session.status = SocketStatus::Authed;
        session.send(protocol::encode_login_success(&session_key, &greetcode));
    }
}
