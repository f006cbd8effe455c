//! Run parameters for a hammer pass. Unlike the authenticator there is no long-lived daemon
//! config file here — `main.rs` builds this directly from CLI flags (spec.md §9 "a configurable
//! number of concurrent outbound TLS connections").

use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: SocketAddr,
    pub concurrency: usize,
    pub total_attempts: usize,
    pub client_version: (u8, u8, u8),
    pub username_prefix: String,
    pub password: String,
    pub handshake_timeout: Duration,
    pub reply_timeout: Duration,
}
