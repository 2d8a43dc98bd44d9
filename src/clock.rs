//! # Wall Clock
//!
//! The sign shows local wall time. Two sources are supported:
//!
//! - **System** (default): the OS clock, kept in sync by NTP, converted to the
//!   local timezone by chrono so DST changes are picked up automatically.
//! - **Api**: the `time` field of the last departures response, advanced
//!   locally one second per elapsed second until the next fetch.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// A valid wall-clock triple. Construction goes through checked paths only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
    second: u8,
}

impl ClockTime {
    /// Returns `None` unless hour < 24, minute < 60 and second < 60.
    pub fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(Self {
            hour,
            minute,
            second,
        })
    }

    /// Parse `HH:MM` or `HH:MM:SS`. Missing seconds mean zero.
    ///
    /// ```
    /// use train_sign_lib::clock::ClockTime;
    ///
    /// assert_eq!(ClockTime::parse("19:10").unwrap().to_string(), "19:10:00");
    /// assert_eq!(ClockTime::parse("7:05:09").unwrap().to_string(), "07:05:09");
    /// assert!(ClockTime::parse("25:00").is_none());
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split(':');
        let hour = parts.next()?.trim().parse().ok()?;
        let minute = parts.next()?.trim().parse().ok()?;
        let second = match parts.next() {
            Some(s) => s.trim().parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Self::new(hour, minute, second)
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    fn seconds_of_day(&self) -> u64 {
        self.hour as u64 * 3600 + self.minute as u64 * 60 + self.second as u64
    }

    fn from_seconds_of_day(total: u64) -> Self {
        let total = total % SECONDS_PER_DAY;
        Self {
            hour: (total / 3600) as u8,
            minute: ((total / 60) % 60) as u8,
            second: (total % 60) as u8,
        }
    }

    /// This time advanced by `seconds`, wrapping at midnight.
    pub fn plus_seconds(&self, seconds: u64) -> Self {
        Self::from_seconds_of_day(self.seconds_of_day() + seconds % SECONDS_PER_DAY)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Which source the clock follows. Selected in `[clock]` of the config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    #[default]
    System,
    Api,
}

/// Wall clock read by the state machine.
#[derive(Clone, Debug)]
pub enum Clock {
    /// OS local time.
    System,
    /// Last API timestamp plus elapsed main-loop time.
    Api { base: ClockTime, base_ms: u64 },
}

impl Clock {
    pub fn from_mode(mode: ClockMode) -> Self {
        match mode {
            ClockMode::System => Clock::System,
            ClockMode::Api => Clock::Api {
                base: ClockTime::default(),
                base_ms: 0,
            },
        }
    }

    /// Current wall time. `now_ms` is the main-loop timer reading.
    pub fn now(&self, now_ms: u64) -> ClockTime {
        match self {
            Clock::System => {
                let now = Local::now();
                ClockTime::from_seconds_of_day(now.num_seconds_from_midnight() as u64)
            }
            Clock::Api { base, base_ms } => {
                base.plus_seconds(now_ms.saturating_sub(*base_ms) / 1000)
            }
        }
    }

    /// Adopt a server timestamp. Ignored by the system clock.
    pub fn sync(&mut self, time: ClockTime, now_ms: u64) {
        match self {
            Clock::System => {
                tracing::debug!("ignoring server time {time}, following system clock");
            }
            Clock::Api { base, base_ms } => {
                *base = time;
                *base_ms = now_ms;
                tracing::info!("clock synced from server: {time}");
            }
        }
    }
}
