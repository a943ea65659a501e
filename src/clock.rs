//! Wall-clock milliseconds anchored to the tokio clock.
//!
//! Session expiry is stored as unix milliseconds so it can be shared through an
//! external store. Deriving it from `tokio::time::Instant` keeps the value
//! monotonic within a process and lets paused-clock tests drive expiry.

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

static ANCHOR: OnceLock<(u64, Instant)> = OnceLock::new();

/// Current time in unix milliseconds.
pub fn now_millis() -> u64 {
    let (wall, mono) = ANCHOR.get_or_init(|| {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (wall, Instant::now())
    });
    let now = Instant::now();
    // Paused runtimes may sit behind the anchor. Rounding down on both sides
    // keeps whole-millisecond steps exact across the anchor.
    if now >= *mono {
        wall + (now - *mono).as_millis() as u64
    } else {
        let behind = *mono - now;
        let mut ms = behind.as_millis() as u64;
        if behind > Duration::from_millis(ms) {
            ms += 1;
        }
        wall.saturating_sub(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_follows_paused_clock() {
        let before = now_millis();
        tokio::time::advance(Duration::from_millis(1500)).await;
        let after = now_millis();
        assert!(after - before >= 1500);
    }
}
