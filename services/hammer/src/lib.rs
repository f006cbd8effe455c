#![allow(clippy::new_without_default)]

//! The load-generator companion (spec.md §1 "reuses the same socket/thread abstractions in the
//! opposite role"). `HammerSession` plays the client side of the same login handshake
//! `services/authenticator` plays the server side of, driven by the same `flux::session::Session`
//! executor.

pub mod config;
pub mod protocol;
pub mod report;
pub mod session;
