//! Self-destruct timer presets and countdown formatting.
//!
//! Timer selections are always expressed in whole seconds.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Expiry timer chosen by the sender of a message.
///
/// # Examples
///
/// ```
/// use ephemera::chat::domain::ExpiryTimer;
///
/// assert_eq!(ExpiryTimer::OneMinute.seconds(), 60);
/// assert_eq!(ExpiryTimer::from_seconds(300), Some(ExpiryTimer::FiveMinutes));
/// assert_eq!(ExpiryTimer::from_seconds(0), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryTimer {
    /// Ten seconds.
    TenSeconds,
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// One hour.
    OneHour,
    /// Any other positive number of seconds.
    Custom(u64),
}

impl ExpiryTimer {
    /// The presets offered to users, shortest first.
    pub const PRESETS: [Self; 4] = [
        Self::TenSeconds,
        Self::OneMinute,
        Self::FiveMinutes,
        Self::OneHour,
    ];

    /// Maps a number of seconds onto a timer, preferring presets.
    ///
    /// Returns `None` for zero, which would expire the message immediately.
    #[must_use]
    pub const fn from_seconds(seconds: u64) -> Option<Self> {
        match seconds {
            0 => None,
            10 => Some(Self::TenSeconds),
            60 => Some(Self::OneMinute),
            300 => Some(Self::FiveMinutes),
            3600 => Some(Self::OneHour),
            other => Some(Self::Custom(other)),
        }
    }

    /// Returns the timer length in seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Self::TenSeconds => 10,
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::OneHour => 3600,
            Self::Custom(seconds) => seconds,
        }
    }

    /// Returns the human-readable label for the timer.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::TenSeconds => "10 seconds".to_owned(),
            Self::OneMinute => "1 minute".to_owned(),
            Self::FiveMinutes => "5 minutes".to_owned(),
            Self::OneHour => "1 hour".to_owned(),
            Self::Custom(seconds) => format!("{seconds} seconds"),
        }
    }
}

/// Time left before a message disappears.
///
/// Renders as `"{m}m {s}s"` when at least a minute remains and `"{s}s"`
/// otherwise, rounding partial seconds up.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ephemera::chat::domain::Countdown;
///
/// assert_eq!(Countdown::new(Duration::from_millis(65_200)).to_string(), "1m 6s");
/// assert_eq!(Countdown::new(Duration::from_millis(900)).to_string(), "1s");
/// assert_eq!(Countdown::new(Duration::ZERO).to_string(), "0s");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Countdown {
    remaining: Duration,
}

impl Countdown {
    /// Creates a countdown from the remaining duration.
    #[must_use]
    pub const fn new(remaining: Duration) -> Self {
        Self { remaining }
    }

    /// Creates the countdown for `expires_at` as seen at `now`.
    ///
    /// Past expiries yield a zero countdown.
    #[must_use]
    pub fn until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = expires_at
            .signed_duration_since(now)
            .max(TimeDelta::zero())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self::new(remaining)
    }

    /// Returns the remaining duration.
    #[must_use]
    pub const fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Returns the remaining whole seconds, rounded up.
    #[must_use]
    pub const fn seconds_left(&self) -> u64 {
        let whole = self.remaining.as_secs();
        if self.remaining.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.seconds_left();
        let minutes = seconds.div_euclid(60);
        if minutes > 0 {
            write!(f, "{minutes}m {}s", seconds.rem_euclid(60))
        } else {
            write!(f, "{seconds}s")
        }
    }
}
