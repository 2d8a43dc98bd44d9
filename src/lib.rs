//! # Train Sign Core Library
//!
//! This library drives a chain of 32×16 DMD LED panels that cycles through the
//! current time, the weather and the next train departures from one station.
//! It's designed to run on a Raspberry Pi class board with the panels wired to
//! SPI and four GPIO lines, and to run unchanged on a desktop where the panel is
//! drawn to the terminal instead.
//!
//! ## Design Philosophy
//!
//! ### Two loops, one buffer
//! - **Refresh loop**: a dedicated thread scans the panel from a [`refresh::SharedFrame`]
//!   at a fixed cadence. It never allocates and never looks at application state.
//! - **Main loop**: a single cooperative loop owns everything else. It ticks the
//!   [`state_machine::DisplayStateMachine`], polls the connectivity supervisor and
//!   runs the periodic fetch. It is the only writer of the frame.
//!
//! The frame is a slice of atomic bytes, so the refresh thread may observe a
//! half-written frame. A torn frame is visible for one scan at most.
//!
//! ### Bounded blocking
//! The marquee and slide-up animations block the main loop for their full
//! length. They take a [`timer::Timer`] so tests can run them against a mock
//! clock in microseconds.
//!
//! ### Data Flow
//! 1. **Fetch**: HTTP GET every 5 minutes → JSON → [`DepartureSnapshot`]
//! 2. **Failure**: weather slot shows a short error, departures are kept
//! 3. **Display**: time → weather marquee → header → departures → time ...
//!
//! ## Core Types
//!
//! - [`DepartureRecord`]: one train, already formatted for display
//! - [`DepartureSnapshot`]: everything the last successful fetch produced


// Module declarations
pub mod animation;
pub mod app;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod departures;
pub mod panel;
pub mod refresh;
pub mod state_machine;
pub mod surface;
pub mod timer;

#[cfg(test)]
mod tests;

/// Marker prepended to every destination.
pub const DESTINATION_MARKER: &str = "-> ";

/// Weather text shown until the first fetch completes.
pub const LOADING_TEXT: &str = "Loading...";

/// A single departure, pre-formatted for the two-line departure layout.
///
/// Records are immutable once built. The API's `type` field is kept in
/// [`kind`](Self::kind) but the panel is too narrow to show it.
///
/// # Example
/// ```
/// use train_sign_lib::DepartureRecord;
///
/// let train = DepartureRecord::new("REG", "Bologna C.le", "19:42", "+5'");
/// assert_eq!(train.destination, "-> Bologna C.le");
/// assert_eq!(train.time_line(), "19:42 +5'");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepartureRecord {
    /// Train category as sent by the API (e.g. "REG", "FR")
    pub kind: String,
    /// Destination with the directional marker already applied
    pub destination: String,
    /// Scheduled departure, e.g. "19:42"
    pub scheduled_time: String,
    /// Delay annotation, e.g. "+5'" or "on time"
    pub delay: String,
}

impl DepartureRecord {
    pub fn new(kind: &str, destination: &str, scheduled_time: &str, delay: &str) -> Self {
        Self {
            kind: kind.to_string(),
            destination: format!("{DESTINATION_MARKER}{destination}"),
            scheduled_time: scheduled_time.to_string(),
            delay: delay.to_string(),
        }
    }

    /// Second display line: scheduled time followed by the delay.
    pub fn time_line(&self) -> String {
        format!("{} {}", self.scheduled_time, self.delay)
    }
}

/// Everything the sign knows from the departures API.
///
/// Snapshots are replaced wholesale and shared behind an `Arc`, so a state
/// that holds one keeps a consistent view even if a fetch lands mid-cycle.
///
/// # Example
/// ```
/// use train_sign_lib::DepartureSnapshot;
///
/// let snapshot = DepartureSnapshot::default();
/// assert_eq!(snapshot.weather_text, "Loading...");
/// assert!(snapshot.departures.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepartureSnapshot {
    /// "20° - Clear", or an error placeholder after a failed fetch
    pub weather_text: String,
    /// Station name from the API; `None` until the API has sent one
    pub station_name: Option<String>,
    /// Upcoming departures in API order
    pub departures: Vec<DepartureRecord>,
}

impl Default for DepartureSnapshot {
    fn default() -> Self {
        Self {
            weather_text: LOADING_TEXT.to_string(),
            station_name: None,
            departures: Vec::new(),
        }
    }
}
