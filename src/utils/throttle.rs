//! Log throttling for best-effort paths
//!
//! IRQ steering, charging current writes and monitor polling can fail on
//! every tick when a node is missing. The throttler keeps those failures
//! visible without flooding the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often a message with the same key is logged
///
/// ```rust
/// use std::time::Duration;
/// use usb_gadgetd::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("irq_write"));
/// assert!(!throttler.should_log("irq_write"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<&'static str, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` and records the time if `key` was not logged within
    /// the interval
    pub fn should_log(&self, key: &'static str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    /// Forget `key` once its error condition has recovered, so the next
    /// failure is logged immediately
    pub fn clear(&self, key: &'static str) {
        self.last_logged.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("speed_read"));
        assert!(!throttler.should_log("speed_read"));

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("speed_read"));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("irq_resolve"));
        assert!(throttler.should_log("irq_write"));
        assert!(!throttler.should_log("irq_resolve"));
    }

    #[test]
    fn test_clear_allows_next_log() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("extcon"));
        throttler.clear("extcon");
        assert!(throttler.should_log("extcon"));
    }
}
