//! `AccountData` (spec.md §3): the per-connection state accumulated while a client moves through
//! the login handshake. Created when a connection enters `GatherInfo`, filled in as each phase
//! succeeds, and dropped with the owning session.

/// The client-reported version triple, compared byte-for-byte against the configured server
/// version — no semantic version range matching, an exact match only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

#[derive(Debug, Default)]
pub struct AccountData {
    pub username: String,
    pub account_id: Option<u64>,
    pub client_version: ClientVersion,
    /// Set once the `LoginAttempt` packet arrives; cleared immediately after the password check
    /// is dispatched to the database so it never lingers in memory longer than it has to.
    pub password: Option<String>,
    pub client_iv_prefix: u32,
    pub server_iv_prefix: u32,
    pub iv_counter: u32,
    pub session_key: Option<[u8; 16]>,
}

impl AccountData {
    pub fn new() -> AccountData {
        AccountData::default()
    }
}
