//! Wire layouts for the length-prefixed binary protocol (spec.md §4.6). All multi-byte integers
//! are little-endian; there is no padding (`#pragma pack(1)` in the source this was ported from).
//! This module only knows how to parse and build frames — validation (alphanumeric usernames,
//! version matching, password checks) lives in [`crate::session`].

use crate::session::SocketStatus;
use byteorder::{LittleEndian, ReadBytesExt};
use flux::buffer::NetworkMessage;
use std::io::{self, Read};

pub const KIND_GATHER_INFO: u8 = 1;
pub const KIND_LOGIN_ATTEMPT: u8 = 2;

pub const MAX_USERNAME: usize = 16;
pub const MAX_PASSWORD: usize = 16;

/// `kind | varSize(u16) | verMaj | verMin | verRev | usernameLen` — the bytes needed before
/// `usernameLen` tells us how many more to wait for.
pub const FIXED_HEADER_GATHER_INFO: usize = 7;
/// `kind | varSize(u16) | clientIvPrefix(u32) | passwordLen`.
pub const FIXED_HEADER_LOGIN_ATTEMPT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherInfoResult {
    Success = 0,
    FailedUnknownAccount = 1,
    FailedWrongClientVersion = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResult {
    Success = 0,
    Failed = 1,
}

/// An entry in the static `packetKind → handler` table (Design Note §9: "a fixed-size array
/// indexed by opcode beats a hash map given the small, dense opcode space").
#[derive(Debug, Clone, Copy)]
pub struct PacketSpec {
    pub expected_status: SocketStatus,
    pub fixed_header_len: usize,
}

/// Looks up the spec for an opcode. `None` means "unknown opcode" (spec.md §4.6 step 1: clear the
/// buffer and close).
pub fn spec_for(kind: u8) -> Option<PacketSpec> {
    match kind {
        KIND_GATHER_INFO => Some(PacketSpec {
            expected_status: SocketStatus::GatherInfo,
            fixed_header_len: FIXED_HEADER_GATHER_INFO,
        }),
        KIND_LOGIN_ATTEMPT => Some(PacketSpec {
            expected_status: SocketStatus::LoginAttempt,
            fixed_header_len: FIXED_HEADER_LOGIN_ATTEMPT,
        }),
        _ => None,
    }
}

pub struct GatherInfoRequest {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    pub username: Vec<u8>,
}

/// Reads one `LOGIN_GATHER_INFO` client frame. The caller has already confirmed `total` bytes are
/// readable; `var_size` (the raw `usernameLen` echoed as the variable-size field) is returned too
/// so the caller can cross-check it against the trailing `usernameLen` byte if desired.
pub fn parse_gather_info(cursor: &mut impl Read) -> io::Result<GatherInfoRequest> {
    let _kind = cursor.read_u8()?;
    let _var_size = cursor.read_u16::<LittleEndian>()?;
    let major = cursor.read_u8()?;
    let minor = cursor.read_u8()?;
    let revision = cursor.read_u8()?;
    let username_len = cursor.read_u8()? as usize;

    let mut username = vec![0u8; username_len];
    cursor.read_exact(&mut username)?;

    Ok(GatherInfoRequest { major, minor, revision, username })
}

pub struct LoginAttemptRequest {
    pub client_iv_prefix: u32,
    pub password: Vec<u8>,
}

pub fn parse_login_attempt(cursor: &mut impl Read) -> io::Result<LoginAttemptRequest> {
    let _kind = cursor.read_u8()?;
    let _var_size = cursor.read_u16::<LittleEndian>()?;
    let client_iv_prefix = cursor.read_u32::<LittleEndian>()?;
    let password_len = cursor.read_u8()? as usize;

    let mut password = vec![0u8; password_len];
    cursor.read_exact(&mut password)?;

    Ok(LoginAttemptRequest { client_iv_prefix, password })
}

pub fn encode_gather_info_reply(result: GatherInfoResult) -> NetworkMessage {
    let mut msg = NetworkMessage::new();
    msg.append_u8(KIND_GATHER_INFO);
    msg.append_u8(result as u8);
    msg
}

pub fn encode_login_success(session_key: &[u8; 16], greetcode: &[u8; 16]) -> NetworkMessage {
    let mut msg = NetworkMessage::new();
    msg.append_u8(KIND_LOGIN_ATTEMPT);
    msg.append_u8(LoginResult::Success as u8);
    msg.append_u16_le(32);
    msg.append(session_key);
    msg.append(greetcode);
    msg
}

pub fn encode_login_failure() -> NetworkMessage {
    let mut msg = NetworkMessage::new();
    msg.append_u8(KIND_LOGIN_ATTEMPT);
    msg.append_u8(LoginResult::Failed as u8);
    msg.append_u16_le(0);
    msg
}

/// ASCII-alphanumeric, non-empty, within `max_len` — the rule shared by both the username and
/// password fields (spec.md §8 boundary: an empty identifier is rejected under this same rule).
pub fn is_valid_identifier(bytes: &[u8], max_len: usize) -> bool {
    !bytes.is_empty() && bytes.len() <= max_len && bytes.iter().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_the_literal_happy_path_gather_info_frame() {
        let frame: [u8; 11] = [0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x04, b'm', b'a', b't', b't'];
        let mut cursor = Cursor::new(&frame[..]);
        let parsed = parse_gather_info(&mut cursor).unwrap();
        assert_eq!((parsed.major, parsed.minor, parsed.revision), (1, 0, 0));
        assert_eq!(parsed.username, b"matt");
    }

    #[test]
    fn rejects_empty_and_oversized_identifiers() {
        assert!(!is_valid_identifier(b"", MAX_USERNAME));
        assert!(is_valid_identifier(b"matt", MAX_USERNAME));
        assert!(is_valid_identifier(&[b'a'; MAX_USERNAME], MAX_USERNAME));
        assert!(!is_valid_identifier(&[b'a'; MAX_USERNAME + 1], MAX_USERNAME));
        assert!(!is_valid_identifier(b"matt!", MAX_USERNAME));
    }
}
