//! # Application
//!
//! [`App`] owns every component and runs the cooperative main loop. One
//! iteration is:
//!
//! 1. connectivity check, if one is due (may block while reconnecting)
//! 2. departures fetch, if one is due (blocks for at most the HTTP timeout)
//! 3. one state machine tick
//! 4. a short pause
//!
//! Nothing else runs on this thread. The refresh driver keeps scanning the
//! panel from its own thread whatever the loop is blocked on.

use crate::clock::Clock;
use crate::connectivity::{Health, Link, Restart, Supervisor};
use crate::departures::{DepartureSource, Fetcher};
use crate::state_machine::{DisplayState, DisplayStateMachine};
use crate::surface::{FontId, RenderSurface};
use crate::timer::Timer;
use std::sync::Arc;

/// Text shown while the first fetch is in flight.
pub const UPDATING_TEXT: &str = "Updating";

/// Default pause at the end of each main-loop iteration.
pub const LOOP_PAUSE_MS: u64 = 10;

pub struct App<S, D, L, R, T> {
    pub surface: S,
    pub machine: DisplayStateMachine,
    pub fetcher: Fetcher<D>,
    pub supervisor: Supervisor<R>,
    pub link: L,
    pub clock: Clock,
    pub timer: T,
    pub loop_pause_ms: u64,
}

impl<S, D, L, R, T> App<S, D, L, R, T>
where
    S: RenderSurface,
    D: DepartureSource,
    L: Link,
    R: Restart,
    T: Timer,
{
    /// Show the splash, wait for the link (bounded by the association
    /// timeout) and run the first fetch.
    pub fn startup(&mut self) {
        self.surface.clear();
        self.surface.select_font(FontId::Small);
        let x = ((self.surface.width() - self.surface.text_width(UPDATING_TEXT)) / 2).max(0);
        let y = self.surface.y_offset();
        self.surface.draw_text(x, y, UPDATING_TEXT);
        self.surface.present();

        if !self.link.is_connected() {
            tracing::info!("waiting for the network link");
            if !self.supervisor.wait_for_link(&self.link, &self.timer) {
                tracing::warn!("network link still down, fetching anyway");
            }
        }
        self.fetch();
    }

    fn fetch(&mut self) {
        let now = self.timer.now_ms();
        if let Ok(Some(time)) = self.fetcher.fetch(&self.link, now) {
            self.clock.sync(time, self.timer.now_ms());
        }
    }

    /// One main-loop iteration, without the trailing pause.
    pub fn step(&mut self) {
        match self.supervisor.poll(&mut self.link, &self.timer) {
            Some(Health::Reconnected { attempts }) => {
                tracing::info!("link back after {} attempt(s), display continues", attempts);
            }
            Some(Health::Restarting) => {
                tracing::error!("restart requested by connectivity supervisor");
            }
            Some(Health::Healthy) | None => {}
        }

        if self.fetcher.is_due(self.timer.now_ms()) {
            self.fetch();
        }

        let time = self.clock.now(self.timer.now_ms());
        let snapshot = Arc::clone(self.fetcher.snapshot());
        self.machine.tick(&mut self.surface, &self.timer, time, &snapshot);
    }

    pub fn state(&self) -> DisplayState {
        self.machine.state()
    }

    /// Loop until `stop` returns true. Checked once per iteration.
    pub fn run_until(&mut self, mut stop: impl FnMut(&Self) -> bool) {
        while !stop(self) {
            self.step();
            self.timer.sleep_ms(self.loop_pause_ms);
        }
    }

    /// Run forever.
    pub fn run(&mut self) {
        tracing::info!("main loop started");
        self.run_until(|_| false);
    }
}
