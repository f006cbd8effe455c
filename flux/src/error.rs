use std::io;

/// Coarse error kinds shared by every subsystem built on top of `flux`. These map directly onto
/// the error-handling taxonomy used by the auth server and the hammer: a `Wait` is never logged or
/// acted upon beyond "try again later", everything else is fatal to the connection that produced it.
#[derive(Debug)]
pub enum NetworkError {
    /// The operation would block; not an error, just "nothing to do right now".
    Wait,
    /// The peer closed the connection or the handshake/transport failed outright.
    Transport(io::Error),
    /// The peer violated the protocol (bad opcode, bad status, oversized payload, ...).
    ProtocolViolation(&'static str),
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            _ => NetworkError::Transport(err),
        }
    }
}

impl From<rustls::Error> for NetworkError {
    #[inline]
    fn from(err: rustls::Error) -> Self {
        NetworkError::Transport(io::Error::new(io::ErrorKind::Other, err))
    }
}

pub trait ErrorUtils {
    /// Everything other than `Wait` counts as a failure worth tearing the connection down for.
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(NetworkError::Wait))
    }
}
