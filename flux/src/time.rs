use std::time::{Duration, Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// True once `now` is at least `timeout` past `start`. Centralizes the `now - start > timeout`
/// comparisons scattered through the spec (handshake timeout, idle timeout, DB-down timeout).
#[inline]
pub fn elapsed_since(start: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(start) > timeout
}
