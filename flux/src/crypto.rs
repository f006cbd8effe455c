use byteorder::{LittleEndian, ReadBytesExt};
use ctor::ctor;

/// Initialize the sodium infrastructure. libsodium is used purely as a CSPRNG source here — the
/// session key and greetcode are generated once and carried over an already-established TLS
/// channel, so this crate has no AEAD/encryption surface of its own.
#[ctor(unsafe)]
fn init_sodium() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut std::ffi::c_void, out.len());
    }
}

/// A cryptographically secure random `u32`, used for the IV prefix and similar small tokens.
#[inline]
pub fn random_u32() -> u32 {
    let mut bytes = [0u8; 4];
    random_bytes(&mut bytes);
    (&bytes[..]).read_u32::<LittleEndian>().expect("infallible read from fixed-size buffer")
}
