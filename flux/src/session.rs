//! The generic per-thread executor (spec.md C4 `NetworkThread<S>`) and the `Session` capability
//! trait it is parameterized over (Design Note §9 — "model this as a capability interface
//! parameterized by the concrete session type"). Neither this module nor `manager`/`acceptor`
//! know anything about usernames, passwords or SQL; `services/authenticator`'s `AuthSession` and
//! `services/hammer`'s `HammerSession` are the two concrete `Session` implementations.

use crate::error::{ErrorUtils, NetworkResult};
use crate::logging::{info, Logger};
use mio::{Events, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// The capability interface every concrete connection type implements so `NetworkThread<S>` can
/// drive it without knowing what it is. `on_readable`/`on_writable` react to poll readiness;
/// `update` is the once-per-tick timeout/housekeeping hook; `close` tears the connection down.
/// `register`/`reregister`/`deregister` let each session manage its own concrete `Evented` handle
/// (a raw `mio::net::TcpStream`) without the trait needing to name that type.
pub trait Session: Send + 'static {
    fn on_readable(&mut self) -> NetworkResult<()>;
    fn on_writable(&mut self) -> NetworkResult<()>;

    /// Returns `Err(())` once the session should be removed (timed out, protocol violation,
    /// transport failure, or a completed `close()`).
    fn update(&mut self, now: Instant) -> Result<(), ()>;

    fn close(&mut self);
    fn is_closed(&self) -> bool;

    fn register(&self, poll: &Poll, token: Token) -> io::Result<()>;
    fn reregister(&self, poll: &Poll, token: Token) -> io::Result<()>;
    fn deregister(&self, poll: &Poll) -> io::Result<()>;
}

/// A lightweight, cloneable handle to a running `NetworkThread<S>`, held by the `SocketManager`
/// (and the `Acceptor`) to hand off newly accepted sockets and to read the thread's current load
/// for least-loaded thread selection (spec.md §4.5 step 1).
pub struct NetworkThreadHandle<S: Session> {
    pub id: usize,
    queued: Arc<Mutex<Vec<Arc<Mutex<S>>>>>,
    socket_count: Arc<AtomicUsize>,
}

impl<S: Session> Clone for NetworkThreadHandle<S> {
    fn clone(&self) -> Self {
        NetworkThreadHandle {
            id: self.id,
            queued: Arc::clone(&self.queued),
            socket_count: Arc::clone(&self.socket_count),
        }
    }
}

impl<S: Session> NetworkThreadHandle<S> {
    #[inline]
    pub fn socket_count(&self) -> usize {
        self.socket_count.load(Ordering::Relaxed)
    }

    /// Hands a freshly constructed session to the thread; it is spliced into the live set on the
    /// thread's next tick (spec.md §4.4 "splice queued-new sockets into the live list").
    pub fn queue_new(&self, session: Arc<Mutex<S>>) {
        self.socket_count.fetch_add(1, Ordering::Relaxed);
        self.queued.lock().expect("queued-sockets mutex poisoned").push(session);
    }
}

/// Owns one `mio::Poll`, a set of live sessions, and the queue new sessions arrive through.
/// Runs on its own OS thread once `spawn` is called.
pub struct NetworkThread<S: Session> {
    id: usize,
    poll: Poll,
    sessions: HashMap<Token, Arc<Mutex<S>>>,
    queued: Arc<Mutex<Vec<Arc<Mutex<S>>>>>,
    socket_count: Arc<AtomicUsize>,
    next_token: usize,
    log: Logger,
}

impl<S: Session> NetworkThread<S> {
    pub fn new(id: usize, log: Logger) -> io::Result<NetworkThread<S>> {
        Ok(NetworkThread {
            id,
            poll: Poll::new()?,
            sessions: HashMap::new(),
            queued: Arc::new(Mutex::new(Vec::new())),
            socket_count: Arc::new(AtomicUsize::new(0)),
            next_token: 0,
            log,
        })
    }

    pub fn handle(&self) -> NetworkThreadHandle<S> {
        NetworkThreadHandle {
            id: self.id,
            queued: Arc::clone(&self.queued),
            socket_count: Arc::clone(&self.socket_count),
        }
    }

    /// Moves this thread onto its own OS thread and runs its tick loop until the process exits.
    /// Spawning (rather than looping in-place) is what lets `SocketManager` own a pool of these.
    pub fn spawn(mut self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name(format!("network-thread-{}", self.id))
            .spawn(move || self.run())
            .expect("failed to spawn network thread")
    }

    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn splice_queued(&mut self) {
        let mut queued = self.queued.lock().expect("queued-sockets mutex poisoned");
        if queued.is_empty() {
            return;
        }

        for session in queued.drain(..) {
            let token = Token(self.next_token);
            self.next_token += 1;
            {
                let guard = session.lock().expect("session mutex poisoned");
                if let Err(e) = guard.register(&self.poll, token) {
                    info!(self.log, "failed to register new session"; "thread" => self.id, "error" => %e);
                    continue;
                }
            }
            self.sessions.insert(token, session);
        }
    }

    fn run(&mut self) {
        let mut events = Events::with_capacity(1024);

        loop {
            self.splice_queued();

            if let Err(e) = self.poll.poll(&mut events, Some(TICK_INTERVAL)) {
                info!(self.log, "poll failed"; "thread" => self.id, "error" => %e);
                continue;
            }

            for event in events.iter() {
                if let Some(session) = self.sessions.get(&event.token()) {
                    let mut guard = session.lock().expect("session mutex poisoned");
                    if event.readiness().is_readable() && guard.on_readable().has_failed() {
                        guard.close();
                    }
                    if !guard.is_closed() && event.readiness().is_writable() && guard.on_writable().has_failed() {
                        guard.close();
                    }
                }
            }

            let now = Instant::now();
            let mut dead = Vec::new();

            for (token, session) in self.sessions.iter() {
                let mut guard = session.lock().expect("session mutex poisoned");
                if guard.update(now).is_err() {
                    guard.close();
                    if guard.is_closed() {
                        dead.push(*token);
                    }
                    continue;
                }

                let _ = guard.reregister(&self.poll, *token);
            }

            for token in dead {
                if let Some(session) = self.sessions.remove(&token) {
                    let guard = session.lock().expect("session mutex poisoned");
                    let _ = guard.deregister(&self.poll);
                    self.socket_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }
}
