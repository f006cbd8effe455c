use std::io;

const DEFAULT_CAPACITY: usize = 512;

/// A grow-on-demand byte buffer with independent read/write cursors (spec.md §3/§4.1).
///
/// Invariant: `rpos <= wpos <= buf.len()` at all times. `buf.len()` is the buffer's capacity;
/// everything in `[wpos, buf.len())` is uninitialized scratch space reserved for future writes,
/// never real data.
pub struct NetworkMessage {
    buf: Vec<u8>,
    rpos: usize,
    wpos: usize,
}

impl NetworkMessage {
    #[inline]
    pub fn new() -> NetworkMessage {
        NetworkMessage::with_capacity(DEFAULT_CAPACITY)
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> NetworkMessage {
        NetworkMessage {
            buf: vec![0u8; capacity],
            rpos: 0,
            wpos: 0,
        }
    }

    #[inline]
    pub fn readable(&self) -> usize {
        self.wpos - self.rpos
    }

    #[inline]
    pub fn writable(&self) -> usize {
        self.buf.len() - self.wpos
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readable() == 0
    }

    /// The unread portion of the buffer. Reading from this slice never advances `rpos` — callers
    /// must call `consume` explicitly once they know how many bytes they actually used, which is
    /// what lets the receive loop in the auth session "peek" a header before committing to it.
    #[inline]
    pub fn readable_slice(&self) -> &[u8] {
        &self.buf[self.rpos..self.wpos]
    }

    /// A `Read`-implementing cursor over the unread portion, for use with byteorder's
    /// `ReadBytesExt` while parsing a header without mutating `rpos`.
    #[inline]
    pub fn reader(&self) -> io::Cursor<&[u8]> {
        io::Cursor::new(self.readable_slice())
    }

    /// The writable tail of the buffer, for receiving raw bytes off the wire.
    #[inline]
    pub fn writable_slice_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.wpos..]
    }

    /// Advance `rpos`, i.e. mark `n` bytes as consumed. A debug-only assertion catches
    /// over-consumption (spec.md §7 InvariantViolation); in release builds this clamps instead of
    /// panicking, matching the "close the connection, don't crash the process" policy.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.rpos + n <= self.wpos, "consume past wpos");
        self.rpos = (self.rpos + n).min(self.wpos);

        if self.rpos == self.wpos {
            // Nothing left to read — reset to the front so writes don't need to grow the buffer
            // just to skip past stale, already-drained data.
            self.rpos = 0;
            self.wpos = 0;
        }
    }

    /// Advance `wpos` after writing directly into `writable_slice_mut`.
    #[inline]
    pub fn write_completed(&mut self, n: usize) {
        debug_assert!(self.wpos + n <= self.buf.len(), "write_completed past capacity");
        self.wpos = (self.wpos + n).min(self.buf.len());
    }

    /// Moves `[rpos, wpos)` to the front of the buffer and resets both cursors relative to it.
    /// Preserves the readable byte sequence (spec.md §8 round-trip law).
    pub fn compact(&mut self) {
        if self.rpos == 0 {
            return;
        }

        self.buf.copy_within(self.rpos..self.wpos, 0);
        self.wpos -= self.rpos;
        self.rpos = 0;
    }

    /// Ensures at least `n` bytes of writable space, compacting first and then doubling capacity
    /// as many times as needed.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable() >= n {
            return;
        }

        self.compact();

        while self.writable() < n {
            let new_capacity = (self.buf.len() * 2).max(DEFAULT_CAPACITY);
            self.buf.resize(new_capacity, 0);
        }
    }

    /// Appends a raw byte slice, growing the buffer as needed.
    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let wpos = self.wpos;
        self.buf[wpos..wpos + bytes.len()].copy_from_slice(bytes);
        self.write_completed(bytes.len());
    }

    #[inline]
    pub fn append_u8(&mut self, value: u8) {
        self.append(&[value]);
    }

    #[inline]
    pub fn append_u16_le(&mut self, value: u16) {
        self.append(&value.to_le_bytes());
    }

    #[inline]
    pub fn append_u32_le(&mut self, value: u32) {
        self.append(&value.to_le_bytes());
    }

    #[inline]
    pub fn append_u64_le(&mut self, value: u64) {
        self.append(&value.to_le_bytes());
    }

    /// Appends a one-byte length prefix followed by the slice itself. Panics if the slice is
    /// larger than `u8::MAX` — callers are expected to have validated lengths already (usernames
    /// and passwords are capped well below that).
    #[inline]
    pub fn append_u8_prefixed(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= u8::MAX as usize, "slice too large for a u8 length prefix");
        self.append_u8(bytes.len() as u8);
        self.append(bytes);
    }
}

impl Default for NetworkMessage {
    fn default() -> Self {
        NetworkMessage::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt};

    #[test]
    fn append_and_consume_roundtrip() {
        let mut msg = NetworkMessage::new();
        msg.append_u8(1);
        msg.append_u16_le(4);
        msg.append(b"matt");

        assert_eq!(msg.readable(), 7);

        let mut reader = msg.reader();
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16::<LittleEndian>().unwrap(), 4);

        msg.consume(7);
        assert_eq!(msg.readable(), 0);
    }

    #[test]
    fn byte_by_byte_append_matches_single_append() {
        let frame: [u8; 10] = [0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x04, b'm', b'a', b't'];

        let mut whole = NetworkMessage::new();
        whole.append(&frame);

        let mut piecewise = NetworkMessage::new();
        for byte in frame.iter() {
            piecewise.append(&[*byte]);
        }

        assert_eq!(whole.readable_slice(), piecewise.readable_slice());
    }

    #[test]
    fn compact_preserves_readable_bytes() {
        let mut msg = NetworkMessage::new();
        msg.append(b"hello world");
        msg.consume(6);

        let before = msg.readable_slice().to_vec();
        msg.compact();

        assert_eq!(msg.readable_slice(), &before[..]);
        assert_eq!(msg.readable(), 5);
    }

    #[test]
    fn ensure_writable_grows_capacity() {
        let mut msg = NetworkMessage::with_capacity(4);
        msg.ensure_writable(100);
        assert!(msg.writable() >= 100);
    }

    #[test]
    fn invariant_holds_after_random_append_consume_sequence() {
        let mut msg = NetworkMessage::with_capacity(8);
        let pattern = [3usize, 1, 5, 2, 0, 4, 7];

        for &n in pattern.iter() {
            msg.append(&vec![0xAAu8; n]);
            assert!(msg.rpos <= msg.wpos && msg.wpos <= msg.buf.len());

            let consume_n = n.min(msg.readable());
            msg.consume(consume_n);
            assert!(msg.rpos <= msg.wpos && msg.wpos <= msg.buf.len());
        }
    }
}
