use std::time::Instant;

use serde::Serialize;

pub const DEFAULT_LOW_TIME_WARNING_SECONDS: u64 = 300;

/// First elapsed second at which a manual submission is accepted: strictly past
/// three quarters of the duration, i.e. `floor(3d/4) + 1`.
///
/// This is deliberately not `ceil(0.75 * d)`. The two differ when `3d` is divisible
/// by 4: for a 2700 s exam a request at 2025 s must still be refused with one second
/// to wait, and 2026 s is the first accepted second.
pub fn submit_threshold_seconds(duration_seconds: u64) -> u64 {
    // floor(3d/4) computed without overflowing 3d.
    let three_quarters = duration_seconds / 4 * 3 + duration_seconds % 4 * 3 / 4;
    three_quarters.saturating_add(1)
}

/// Time view derived from `(started_at, duration, now)`. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeadlineClock {
    pub elapsed_seconds: u64,
    pub remaining_seconds: u64,
    pub can_submit: bool,
    pub submit_threshold_seconds: u64,
}

impl DeadlineClock {
    pub fn at(started_at: Instant, duration_seconds: u64, now: Instant) -> Self {
        let elapsed_seconds = now.saturating_duration_since(started_at).as_secs();
        Self::from_elapsed(duration_seconds, elapsed_seconds)
    }

    pub fn from_elapsed(duration_seconds: u64, elapsed_seconds: u64) -> Self {
        let threshold = submit_threshold_seconds(duration_seconds);
        Self {
            elapsed_seconds,
            remaining_seconds: duration_seconds.saturating_sub(elapsed_seconds),
            can_submit: elapsed_seconds >= threshold,
            submit_threshold_seconds: threshold,
        }
    }

    /// Seconds until `can_submit` flips; zero once it has.
    pub fn submit_wait_seconds(&self) -> u64 {
        self.submit_threshold_seconds.saturating_sub(self.elapsed_seconds)
    }

    pub fn deadline_reached(&self) -> bool {
        self.remaining_seconds == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimerEvent {
    LowTimeWarning { remaining_seconds: u64 },
    QuarterTimeReached,
    DeadlineReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub clock: DeadlineClock,
    pub events: Vec<TimerEvent>,
}

/// Turns wall-clock samples into one-shot threshold events.
///
/// Time is always recomputed from `now - started_at`; missed or throttled ticks only
/// delay event delivery, they never skew the reported time.
#[derive(Debug, Clone)]
pub struct DeadlineTimer {
    started_at: Instant,
    duration_seconds: u64,
    low_time_threshold: u64,
    low_time_fired: bool,
    quarter_fired: bool,
    deadline_fired: bool,
    stopped: bool,
    last: DeadlineClock,
}

impl DeadlineTimer {
    pub fn start(started_at: Instant, duration_seconds: u64, low_time_threshold: u64) -> Self {
        Self {
            started_at,
            duration_seconds,
            low_time_threshold,
            low_time_fired: false,
            quarter_fired: false,
            deadline_fired: false,
            stopped: false,
            last: DeadlineClock::from_elapsed(duration_seconds, 0),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn last(&self) -> DeadlineClock {
        self.last
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Clock at `now` without firing anything. Frozen once stopped.
    pub fn peek(&self, now: Instant) -> DeadlineClock {
        if self.stopped {
            return self.last;
        }
        let clock = DeadlineClock::at(self.started_at, self.duration_seconds, now);
        if clock.elapsed_seconds < self.last.elapsed_seconds {
            self.last
        } else {
            clock
        }
    }

    pub fn tick(&mut self, now: Instant) -> Tick {
        if self.stopped {
            return Tick { clock: self.last, events: Vec::new() };
        }

        let clock = self.peek(now);
        self.last = clock;

        let mut events = Vec::new();
        if clock.deadline_reached() {
            if !self.deadline_fired {
                self.deadline_fired = true;
                // Past the deadline a warning is noise.
                self.low_time_fired = true;
                events.push(TimerEvent::DeadlineReached);
            }
        } else if !self.low_time_fired && clock.remaining_seconds <= self.low_time_threshold {
            self.low_time_fired = true;
            events.push(TimerEvent::LowTimeWarning { remaining_seconds: clock.remaining_seconds });
        }

        if clock.can_submit && !self.quarter_fired {
            self.quarter_fired = true;
            events.push(TimerEvent::QuarterTimeReached);
        }

        Tick { clock, events }
    }

    /// Returns `true` only for the call that actually stopped the timer.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        true
    }
}
