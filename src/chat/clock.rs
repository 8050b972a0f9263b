//! Monotonic expiry clock and tick schedules.
//!
//! [`ExpiryClock`] wraps any [`mockable::Clock`], so production code reads
//! wall-clock time while tests drive a [`ManualClock`].

use super::domain::Countdown;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Time source used to decide message liveness.
///
/// Readings never go backwards: a reading older than the last one observed
/// is clamped to it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use ephemera::chat::clock::{ExpiryClock, ManualClock};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let manual = Arc::new(ManualClock::new(start));
/// let clock = ExpiryClock::new(Arc::clone(&manual));
///
/// let ticks: Vec<_> = clock.schedule_tick(Duration::from_secs(1)).take(2).collect();
/// assert_eq!(ticks[1], start + chrono::TimeDelta::seconds(2));
/// ```
#[derive(Debug)]
pub struct ExpiryClock<C: Clock> {
    clock: Arc<C>,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl<C: Clock> ExpiryClock<C> {
    /// Wraps a clock.
    #[must_use]
    pub const fn new(clock: Arc<C>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Returns the current instant, never earlier than a previous reading.
    pub fn now(&self) -> DateTime<Utc> {
        let reading = self.clock.utc();
        // The guarded value is a plain timestamp, so a poisoned lock is still usable.
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = last.map_or(reading, |previous| previous.max(reading));
        *last = Some(now);
        now
    }

    /// Returns a lazy, infinite schedule of ticks spaced at `interval`,
    /// starting one interval from now.
    pub fn schedule_tick(&self, interval: Duration) -> TickSchedule {
        TickSchedule::new(self.now(), interval)
    }

    /// Returns the time left until `expires_at`, saturating at zero.
    pub fn remaining(&self, expires_at: DateTime<Utc>) -> Duration {
        self.countdown(expires_at).remaining()
    }

    /// Returns the display countdown until `expires_at`.
    pub fn countdown(&self, expires_at: DateTime<Utc>) -> Countdown {
        Countdown::until(expires_at, self.now())
    }
}

/// Restartable sequence of tick instants `start + k * interval`, `k >= 1`.
///
/// Cloning or calling [`TickSchedule::restart`] yields a schedule that
/// replays the ticks from the beginning. The sequence only ends if the
/// instant overflows the representable range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSchedule {
    start: DateTime<Utc>,
    step: TimeDelta,
    emitted: i32,
}

impl TickSchedule {
    /// Creates a schedule anchored at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            start,
            step: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            emitted: 0,
        }
    }

    /// Returns the instant the schedule is anchored at.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns a fresh schedule replaying from the first tick.
    #[must_use]
    pub const fn restart(&self) -> Self {
        Self {
            start: self.start,
            step: self.step,
            emitted: 0,
        }
    }
}

impl Iterator for TickSchedule {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.emitted.checked_add(1)?;
        let offset = self.step.checked_mul(index)?;
        let tick = self.start.checked_add_signed(offset)?;
        self.emitted = index;
        Some(tick)
    }
}

/// Controllable clock for tests and simulations.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use ephemera::chat::clock::ManualClock;
/// use mockable::Clock;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let clock = ManualClock::new(start);
/// clock.advance(Duration::from_secs(11));
/// assert_eq!(clock.utc(), start + chrono::TimeDelta::seconds(11));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// Sets the clock to an arbitrary instant, including one in the past.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
