//! Wire layouts for the login handshake, client side (grounded on
//! `NECROHammer::HammerSocket`'s `HandlePacketAuthLoginGatherInfoResponse`/
//! `HandlePacketAuthLoginProofResponse`). Mirrors `authenticator::protocol`'s framing exactly, but
//! this module only ever builds requests and parses replies, never the other way round.

use byteorder::{LittleEndian, ReadBytesExt};
use flux::buffer::NetworkMessage;
use std::io::{self, Read};

pub const KIND_GATHER_INFO: u8 = 1;
pub const KIND_LOGIN_ATTEMPT: u8 = 2;

pub const RESULT_SUCCESS: u8 = 0;

pub fn encode_gather_info_request(major: u8, minor: u8, revision: u8, username: &[u8]) -> NetworkMessage {
    let mut msg = NetworkMessage::new();
    msg.append_u8(KIND_GATHER_INFO);
    msg.append_u16_le(username.len() as u16);
    msg.append_u8(major);
    msg.append_u8(minor);
    msg.append_u8(revision);
    msg.append_u8_prefixed(username);
    msg
}

pub fn encode_login_attempt(client_iv_prefix: u32, password: &[u8]) -> NetworkMessage {
    let mut msg = NetworkMessage::new();
    msg.append_u8(KIND_LOGIN_ATTEMPT);
    msg.append_u16_le(password.len() as u16);
    msg.append_u32_le(client_iv_prefix);
    msg.append_u8_prefixed(password);
    msg
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherInfoReply {
    pub result: u8,
}

/// The server's `LOGIN_GATHER_INFO` reply is a fixed two bytes: no length prefix at all.
pub fn parse_gather_info_reply(cursor: &mut impl Read) -> io::Result<GatherInfoReply> {
    let _kind = cursor.read_u8()?;
    let result = cursor.read_u8()?;
    Ok(GatherInfoReply { result })
}

#[derive(Debug, Clone)]
pub enum LoginAttemptReply {
    Success { session_key: [u8; 16], greetcode: [u8; 16] },
    Failed,
}

/// The server's `LOGIN_ATTEMPT` reply header is `kind | result | tailSize(u16)`; `tailSize` bytes
/// follow only on success (32: the session key and greetcode).
pub fn parse_login_attempt_reply(cursor: &mut impl Read) -> io::Result<LoginAttemptReply> {
    let _kind = cursor.read_u8()?;
    let result = cursor.read_u8()?;
    let _tail_size = cursor.read_u16::<LittleEndian>()?;

    if result != RESULT_SUCCESS {
        return Ok(LoginAttemptReply::Failed);
    }

    let mut session_key = [0u8; 16];
    cursor.read_exact(&mut session_key)?;
    let mut greetcode = [0u8; 16];
    cursor.read_exact(&mut greetcode)?;
    Ok(LoginAttemptReply::Success { session_key, greetcode })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_the_literal_happy_path_frames_from_the_other_side() {
        let request = encode_gather_info_request(1, 0, 0, b"matt");
        assert_eq!(request.readable_slice(), &[0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x04, b'm', b'a', b't', b't']);

        let reply = [0x01u8, 0x00];
        let parsed = parse_gather_info_reply(&mut Cursor::new(&reply[..])).unwrap();
        assert_eq!(parsed.result, RESULT_SUCCESS);
    }

    #[test]
    fn parses_a_failed_login_reply_with_no_trailing_bytes() {
        let reply = [0x02u8, 0x01, 0x00, 0x00];
        let parsed = parse_login_attempt_reply(&mut Cursor::new(&reply[..])).unwrap();
        assert!(matches!(parsed, LoginAttemptReply::Failed));
    }
}
