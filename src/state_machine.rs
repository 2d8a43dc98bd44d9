//! # Display State Machine
//!
//! The sign loops through four states:
//!
//! ```text
//! ShowTime ──10 s──▶ ShowWeather ──scroll done──▶ ShowDeparturesHeader
//!    ▲                                                   │ scroll done
//!    └──────── list done / no trains (2.5 s) ◀── ShowDepartures
//! ```
//!
//! [`DisplayStateMachine::tick`] is called on every main-loop iteration. Entry
//! actions run once per entry: a state is "entered" when its entry timestamp
//! is still unset, and every transition clears the whole context.
//!
//! ShowWeather and ShowDeparturesHeader block inside one tick for the length
//! of their marquee. ShowDepartures blocks only for slide-up animations; the
//! holds between trains are deadlines so fetches and link checks still run.

use crate::animation::{draw_departure, scroll_marquee, slide_up};
use crate::clock::ClockTime;
use crate::surface::{FontId, RenderSurface, TRAIN_ICON};
use crate::timer::Timer;
use crate::DepartureSnapshot;
use std::sync::Arc;

/// How long the clock stays up.
pub const TIME_DISPLAY_MS: u64 = 10_000;
/// Base hold for informational screens ("no trains").
pub const INFO_HOLD_MS: u64 = 2_500;
/// Hold for each departure, 1.5 × the base hold.
pub const DEPARTURE_HOLD_MS: u64 = INFO_HOLD_MS * 3 / 2;

const ICON_X: i32 = 8;
/// Header marquee runs right of the icon.
const HEADER_TEXT_LEFT: i32 = ICON_X + 16 + 2;
const MESSAGE_X: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    ShowTime,
    ShowWeather,
    ShowDeparturesHeader,
    ShowDepartures,
}

/// User-facing strings of the departures screens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Labels {
    /// Header prefix, e.g. "Trains from"
    pub header: String,
    /// Used in the header until the API sends a station name
    pub station_fallback: String,
    /// Shown when the departure list is empty
    pub no_trains: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            header: "Trains from".to_string(),
            station_fallback: "Castelfranco".to_string(),
            no_trains: "No trains".to_string(),
        }
    }
}

/// Per-state scratch data, reset on every transition.
#[derive(Debug, Default)]
struct StateContext {
    /// `None` until the entry actions of the current state have run
    entered_at: Option<u64>,
    departure_index: usize,
    last_rendered_second: Option<u8>,
    last_shown_index: Option<usize>,
    hold_until: Option<u64>,
    /// Departures being shown, fixed at ShowDepartures entry
    pinned: Option<Arc<DepartureSnapshot>>,
    message_shown: bool,
}

pub struct DisplayStateMachine {
    state: DisplayState,
    ctx: StateContext,
    labels: Labels,
}

impl DisplayStateMachine {
    pub fn new(labels: Labels) -> Self {
        Self {
            state: DisplayState::ShowTime,
            ctx: StateContext::default(),
            labels,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Index of the next departure to show.
    pub fn departure_index(&self) -> usize {
        self.ctx.departure_index
    }

    #[cfg(test)]
    pub fn last_shown_index(&self) -> Option<usize> {
        self.ctx.last_shown_index
    }

    fn transition(&mut self, next: DisplayState) {
        tracing::debug!("display state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.ctx = StateContext::default();
    }

    /// Advance the sign by one main-loop iteration.
    pub fn tick<S, T>(&mut self, surface: &mut S, timer: &T, time: ClockTime, snapshot: &Arc<DepartureSnapshot>)
    where
        S: RenderSurface,
        T: Timer,
    {
        match self.state {
            DisplayState::ShowTime => self.tick_time(surface, timer, time),
            DisplayState::ShowWeather => {
                surface.clear();
                surface.select_font(FontId::Large);
                let (x, y) = (surface.width(), surface.y_offset());
                scroll_marquee(surface, timer, &snapshot.weather_text, x, y, 0);
                self.transition(DisplayState::ShowDeparturesHeader);
            }
            DisplayState::ShowDeparturesHeader => {
                surface.clear();
                surface.select_font(FontId::Small);
                surface.draw_bitmap(ICON_X, 0, &TRAIN_ICON);
                surface.present();

                let station = snapshot
                    .station_name
                    .as_deref()
                    .unwrap_or(&self.labels.station_fallback);
                let header = format!("{} {}", self.labels.header, station);
                let (x, y) = (surface.width(), surface.y_offset());
                scroll_marquee(surface, timer, &header, x, y, HEADER_TEXT_LEFT);
                self.transition(DisplayState::ShowDepartures);
            }
            DisplayState::ShowDepartures => self.tick_departures(surface, timer, snapshot),
        }
    }

    fn tick_time<S: RenderSurface, T: Timer>(&mut self, surface: &mut S, timer: &T, time: ClockTime) {
        let now = timer.now_ms();
        let entered_at = match self.ctx.entered_at {
            Some(at) => at,
            None => {
                surface.select_font(FontId::Large);
                surface.clear();
                self.ctx.last_rendered_second = None;
                self.ctx.entered_at = Some(now);
                now
            }
        };

        if self.ctx.last_rendered_second != Some(time.second()) {
            let text = time.to_string();
            let x = ((surface.width() - surface.text_width(&text)) / 2).max(0);
            surface.clear();
            surface.draw_text(x, surface.y_offset(), &text);
            surface.present();
            self.ctx.last_rendered_second = Some(time.second());
        }

        if now.saturating_sub(entered_at) > TIME_DISPLAY_MS {
            self.transition(DisplayState::ShowWeather);
        }
    }

    fn tick_departures<S: RenderSurface, T: Timer>(
        &mut self,
        surface: &mut S,
        timer: &T,
        snapshot: &Arc<DepartureSnapshot>,
    ) {
        let now = timer.now_ms();
        if self.ctx.entered_at.is_none() {
            self.ctx.entered_at = Some(now);
            self.ctx.pinned = Some(Arc::clone(snapshot));
            self.ctx.departure_index = 0;
            self.ctx.last_shown_index = None;
            surface.select_font(FontId::Small);
        }

        if let Some(until) = self.ctx.hold_until {
            if now < until {
                return;
            }
            self.ctx.hold_until = None;
        }

        let pinned = match &self.ctx.pinned {
            Some(pinned) => Arc::clone(pinned),
            None => Arc::clone(snapshot),
        };
        let departures = &pinned.departures;

        if departures.is_empty() {
            if self.ctx.message_shown {
                self.transition(DisplayState::ShowTime);
                return;
            }
            surface.clear();
            surface.draw_text(MESSAGE_X, 0, &self.labels.no_trains);
            surface.present();
            self.ctx.message_shown = true;
            self.ctx.hold_until = Some(now + INFO_HOLD_MS);
            return;
        }

        let index = self.ctx.departure_index;
        let Some(train) = departures.get(index) else {
            surface.select_font(FontId::Large);
            self.transition(DisplayState::ShowTime);
            return;
        };

        match self.ctx.last_shown_index {
            None => draw_departure(surface, train),
            Some(previous) => {
                slide_up(surface, timer, departures.get(previous), Some(train));
            }
        }
        self.ctx.last_shown_index = Some(index);
        self.ctx.departure_index = index + 1;
        self.ctx.hold_until = Some(timer.now_ms() + DEPARTURE_HOLD_MS);
    }
}
