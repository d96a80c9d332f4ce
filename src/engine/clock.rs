use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonically increasing "now" samples.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads the runtime clock, so paused tokio time in tests moves it too.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl ClockSource for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Hand-driven clock. Never moves backwards.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset_ms: AtomicU64::new(0) }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        // Saturating: fetch_add would wrap.
        let _ = self.offset_ms.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            Some(current.saturating_add(by_ms))
        });
    }

    /// Moves to `origin + elapsed`; earlier targets are ignored.
    pub fn set_elapsed(&self, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_max(elapsed_ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}
