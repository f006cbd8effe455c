#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Shared, reusable networking infrastructure for the auth server and its load-generator
//! companion. Nothing in this crate knows about usernames, passwords or SQL — it is
//! parameterized over the [`session::Session`] trait so the same buffer/TLS/thread-pool/manager
//! machinery drives both `services/authenticator` and `services/hammer`.

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod manager;
pub mod session;
pub mod time;
pub mod tls;
