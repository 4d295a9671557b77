//! Millisecond epoch helpers. Stores and wire payloads carry `u64` millis.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_after_2020() {
        // 2020-01-01T00:00:00Z in millis.
        assert!(now_ms() > 1_577_836_800_000);
    }
}
