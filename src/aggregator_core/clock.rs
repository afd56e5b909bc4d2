//! Observed clock: latest TIME_LAST seen on the input stream
//!
//! Passive timeouts are measured against record time, not wall time, so an
//! idle key is evicted once other traffic has moved the clock far enough.
//! Guarded by its own mutex, independent of the table lock.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct ObservedClock {
    latest_ms: Mutex<u64>,
}

impl ObservedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `time_ms` if it is later; returns the current value
    pub fn advance(&self, time_ms: u64) -> u64 {
        let mut latest = self.latest_ms.lock().unwrap_or_else(PoisonError::into_inner);
        if time_ms > *latest {
            *latest = time_ms;
        }
        *latest
    }

    pub fn now_ms(&self) -> u64 {
        *self.latest_ms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = ObservedClock::new();
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.advance(15_500), 15_500);
        assert_eq!(clock.advance(3_000), 15_500);
        assert_eq!(clock.now_secs(), 15);
    }
}
