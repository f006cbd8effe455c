//! Authentication front-end for a multiplayer game: clients establish a TLS connection, submit a
//! username and client version, then a password, and on success receive a session key and a
//! one-shot greetcode used to bootstrap their connection to a separate world server.
//!
//! The core machinery (buffers, TLS sockets, the thread pool, the socket manager) lives in
//! `flux` and is reused as-is; this crate supplies the concrete [`session::Session`]
//! implementation, the wire protocol, and the database layer.

pub mod account;
pub mod config;
pub mod db;
pub mod protocol;
pub mod server;
pub mod session;
