//! The non-blocking accept loop (spec.md C3). Binds with address reuse, listens with the
//! library's max backlog, and for every accepted stream invokes a sink supplied by the caller —
//! in practice the `SocketManager`, which applies admission control and picks a target thread.
//! This module has no opinion on either; it only knows how to accept sockets.

use crate::logging::{info, warn, Logger};
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Acceptor {
    listener: TcpListener,
    poll: Poll,
    log: Logger,
}

impl Acceptor {
    pub fn bind(addr: SocketAddr, log: Logger) -> io::Result<Acceptor> {
        let listener = TcpListener::bind(&addr)?;
        let poll = Poll::new()?;
        poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())?;

        info!(log, "listening"; "addr" => %addr);
        Ok(Acceptor { listener, poll, log })
    }

    /// Runs the accept loop on the calling thread forever, handing every accepted stream (with
    /// its remote address) to `sink`. Callers spawn this on its own OS thread.
    pub fn run<F>(self, mut sink: F)
    where
        F: FnMut(mio::net::TcpStream, SocketAddr) + Send,
    {
        let mut events = Events::with_capacity(256);

        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_INTERVAL)) {
                warn!(self.log, "acceptor poll failed"; "error" => %e);
                continue;
            }

            for event in events.iter() {
                if event.token() != LISTENER_TOKEN {
                    continue;
                }

                loop {
                    match self.listener.accept() {
                        Ok((stream, remote)) => sink(stream, remote),
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!(self.log, "accept failed"; "error" => %e);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Spawns the accept loop on its own named OS thread.
    pub fn spawn<F>(self, sink: F) -> std::thread::JoinHandle<()>
    where
        F: FnMut(mio::net::TcpStream, SocketAddr) + Send + 'static,
    {
        std::thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || self.run(sink))
            .expect("failed to spawn acceptor thread")
    }
}
