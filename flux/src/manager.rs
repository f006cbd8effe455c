//! The socket manager (spec.md C5): picks the least-loaded `NetworkThread`, applies the two
//! synchronous admission gates (capacity, per-IP rate), and hands constructed sessions off to
//! their owning thread. Like `session` and `acceptor`, this is generic over the concrete
//! `Session` type so both the auth server and the hammer share it.

use crate::logging::{info, warn, Logger};
use crate::session::{NetworkThreadHandle, Session};
use mio::net::TcpStream;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct IpRequestData {
    last_update: Instant,
    tries: u32,
}

pub struct AdmissionConfig {
    /// `-1` disables the capacity gate.
    pub max_per_thread: i64,
    pub spam_prevention: bool,
    pub max_attempts_per_minute: u32,
    pub ip_cleanup_window: Duration,
}

/// Picks threads and enforces admission control; does not itself know how to build a `Session` —
/// callers pass a `construct` closure to `on_accepted` that does, since only they know the
/// concrete type's constructor signature (TLS role, config, initial state, ...).
pub struct SocketManager<S: Session> {
    threads: Vec<NetworkThreadHandle<S>>,
    ip_requests: Mutex<HashMap<IpAddr, IpRequestData>>,
    config: AdmissionConfig,
    log: Logger,
}

impl<S: Session> SocketManager<S> {
    pub fn new(threads: Vec<NetworkThreadHandle<S>>, config: AdmissionConfig, log: Logger) -> SocketManager<S> {
        assert!(!threads.is_empty(), "SocketManager needs at least one network thread");
        SocketManager {
            threads,
            ip_requests: Mutex::new(HashMap::new()),
            config,
            log,
        }
    }

    /// spec.md §4.5 step 1: `argmin(thread.socketCount)`.
    fn pick_thread(&self) -> &NetworkThreadHandle<S> {
        self.threads
            .iter()
            .min_by_key(|t| t.socket_count())
            .expect("threads is non-empty")
    }

    /// Runs the three admission gates in order (capacity, per-IP, construction) and, if all pass,
    /// hands the resulting session to its chosen thread. `construct` only runs once admission has
    /// already decided to accept the connection, so it never needs to apply its own rate limits —
    /// it can still decline (a `None`) when building the session itself fails (e.g. TLS setup).
    /// Takes the already-`Arc<Mutex<_>>`-wrapped session rather than a bare `S`: constructors such
    /// as `AuthSession::construct` use `Arc::new_cyclic` to hand the session a `Weak` to itself,
    /// and re-wrapping that value in a second `Arc` here would silently detach it from that weak
    /// reference.
    pub fn on_accepted<F>(&self, stream: TcpStream, remote: SocketAddr, construct: F)
    where
        F: FnOnce(TcpStream, &NetworkThreadHandle<S>) -> Option<Arc<Mutex<S>>>,
    {
        let thread = self.pick_thread();

        if self.config.max_per_thread >= 0 && thread.socket_count() as i64 >= self.config.max_per_thread {
            warn!(self.log, "connection rejected: thread at capacity"; "peer" => %remote, "thread" => thread.id);
            return;
        }

        if self.config.spam_prevention && !self.admit_ip(remote.ip()) {
            warn!(self.log, "connection rejected: per-ip rate exceeded"; "peer" => %remote);
            return;
        }

        match construct(stream, thread) {
            Some(session) => {
                thread.queue_new(session);
                info!(self.log, "connection accepted"; "peer" => %remote, "thread" => thread.id);
            }
            None => {
                warn!(self.log, "connection rejected: session construction failed"; "peer" => %remote);
            }
        }
    }

    fn admit_ip(&self, ip: IpAddr) -> bool {
        let mut map = self.ip_requests.lock().expect("ip-request map mutex poisoned");
        let now = Instant::now();
        let entry = map.entry(ip).or_insert(IpRequestData { last_update: now, tries: 0 });
        entry.tries += 1;
        entry.last_update = now;
        entry.tries <= self.config.max_attempts_per_minute
    }

    /// The periodic `ipRequestCleanup` timer (spec.md §4.5): evicts IP entries whose last request
    /// is older than the configured window.
    pub fn ip_request_cleanup(&self) {
        let mut map = self.ip_requests.lock().expect("ip-request map mutex poisoned");
        let now = Instant::now();
        let window = self.config.ip_cleanup_window;
        map.retain(|_, v| now.saturating_duration_since(v.last_update) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkResult;
    use crate::logging::{self, LoggingOptions};
    use crate::session::NetworkThread;
    use mio::net::{TcpListener, TcpStream};
    use mio::{Poll, Token};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct TestSession;

    impl Session for TestSession {
        fn on_readable(&mut self) -> NetworkResult<()> {
            Ok(())
        }
        fn on_writable(&mut self) -> NetworkResult<()> {
            Ok(())
        }
        fn update(&mut self, _now: Instant) -> Result<(), ()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn is_closed(&self) -> bool {
            false
        }
        fn register(&self, _poll: &Poll, _token: Token) -> io::Result<()> {
            Ok(())
        }
        fn reregister(&self, _poll: &Poll, _token: Token) -> io::Result<()> {
            Ok(())
        }
        fn deregister(&self, _poll: &Poll) -> io::Result<()> {
            Ok(())
        }
    }

    /// A connected loopback pair's server-side half — `on_accepted` needs a real `TcpStream`
    /// to hand to `construct`, even though `TestSession` never actually reads or writes it.
    fn loopback_stream() -> TcpStream {
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream
    }

    fn discard_log() -> Logger {
        logging::init(&LoggingOptions { console: false, file: false, ..LoggingOptions::default() })
    }

    #[test]
    fn third_attempt_within_window_is_rejected_at_max_two() {
        let config = AdmissionConfig {
            max_per_thread: -1,
            spam_prevention: true,
            max_attempts_per_minute: 2,
            ip_cleanup_window: Duration::from_secs(60),
        };
        let thread = NetworkThread::<TestSession>::new(0, discard_log()).unwrap();
        let handle = thread.handle();
        let manager = SocketManager::new(vec![handle.clone()], config, discard_log());
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let constructed = AtomicUsize::new(0);

        let admit = |manager: &SocketManager<TestSession>| {
            manager.on_accepted(loopback_stream(), remote, |_stream, _thread| {
                constructed.fetch_add(1, AtomicOrdering::Relaxed);
                Some(Arc::new(Mutex::new(TestSession)))
            });
        };

        admit(&manager);
        admit(&manager);
        assert_eq!(constructed.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(handle.socket_count(), 2);

        admit(&manager);
        assert_eq!(
            constructed.load(AtomicOrdering::Relaxed),
            2,
            "third attempt within the window should be rejected before construct ever runs"
        );
        assert_eq!(handle.socket_count(), 2);
    }

    #[test]
    fn thread_at_capacity_rejects_before_construct_runs() {
        let config = AdmissionConfig {
            max_per_thread: 1,
            spam_prevention: false,
            max_attempts_per_minute: 0,
            ip_cleanup_window: Duration::from_secs(60),
        };
        let thread = NetworkThread::<TestSession>::new(0, discard_log()).unwrap();
        let handle = thread.handle();
        let manager = SocketManager::new(vec![handle.clone()], config, discard_log());
        let constructed = AtomicUsize::new(0);

        for i in 0..2 {
            let remote: SocketAddr = format!("127.0.0.{}:9", i + 1).parse().unwrap();
            manager.on_accepted(loopback_stream(), remote, |_stream, _thread| {
                constructed.fetch_add(1, AtomicOrdering::Relaxed);
                Some(Arc::new(Mutex::new(TestSession)))
            });
        }

        assert_eq!(constructed.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(handle.socket_count(), 1);
    }
}
