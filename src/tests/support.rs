//! Test doubles shared by the unit and scenario tests.

use crate::connectivity::{Link, LinkError, Restart};
use crate::departures::{DepartureSource, FetchError};
use crate::surface::{Bitmap, FontId, RenderSurface};
use crate::timer::Timer;
use crate::{DepartureRecord, DepartureSnapshot};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;

/// Timer whose clock only moves when told to, or when something sleeps.
#[derive(Debug, Default)]
pub struct MockTimer {
    now: Cell<u64>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Timer for MockTimer {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

/// Everything a [`RecordingSurface`] was asked to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Clear,
    Font(FontId),
    Text { x: i32, y: i32, text: String },
    Bitmap { x: i32, y: i32 },
    MarqueeBegin { text: String, x: i32, y: i32, left_edge: i32 },
    MarqueeStep,
    Present,
}

/// Surface that records calls instead of drawing. Marquee geometry follows
/// the real font metrics so step counts match [`crate::surface::MatrixSurface`].
pub struct RecordingSurface {
    width: i32,
    font: FontId,
    ops: Vec<Op>,
    marquee: Option<(i32, i32, i32)>,
}

impl RecordingSurface {
    pub fn new(width: i32) -> Self {
        Self {
            width,
            font: FontId::Large,
            ops: Vec::new(),
            marquee: None,
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    /// All text drawn with `draw_text`, in order.
    pub fn texts(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text drawn in frame `n`, i.e. between the `n`th and `n+1`th present.
    pub fn texts_in_frame(&self, n: usize) -> Vec<String> {
        self.ops
            .split(|op| *op == Op::Present)
            .nth(n)
            .unwrap_or_default()
            .iter()
            .filter_map(|op| match op {
                Op::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RenderSurface for RecordingSurface {
    fn width(&self) -> i32 {
        self.width
    }

    fn clear(&mut self) {
        self.ops.push(Op::Clear);
    }

    fn select_font(&mut self, font: FontId) {
        self.font = font;
        self.ops.push(Op::Font(font));
    }

    fn font(&self) -> FontId {
        self.font
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str) {
        self.ops.push(Op::Text {
            x,
            y,
            text: text.to_string(),
        });
    }

    fn draw_bitmap(&mut self, x: i32, y: i32, _bitmap: &Bitmap) {
        self.ops.push(Op::Bitmap { x, y });
    }

    fn begin_marquee(&mut self, text: &str, x: i32, y: i32, left_edge: i32) {
        self.marquee = Some((x, self.font.text_width(text), left_edge));
        self.ops.push(Op::MarqueeBegin {
            text: text.to_string(),
            x,
            y,
            left_edge,
        });
    }

    fn step_marquee(&mut self) -> bool {
        self.ops.push(Op::MarqueeStep);
        let Some((x, width, left_edge)) = self.marquee.as_mut() else {
            return true;
        };
        *x -= 1;
        let done = *x + *width <= *left_edge;
        if done {
            self.marquee = None;
        }
        done
    }

    fn present(&mut self) {
        self.ops.push(Op::Present);
    }
}

/// Link with scripted reconnect behaviour and call counters.
#[derive(Debug, Default)]
pub struct MockLink {
    connected: bool,
    reconnect_on: Option<u32>,
    up_after_polls: Option<u32>,
    polls: Cell<u32>,
    fail_commands: bool,
    dns_failures: u32,
    resets: u32,
    associations: u32,
    dns_refreshes: u32,
}

impl MockLink {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Association attempts from the `n`th on bring the link up.
    pub fn reconnects_on_attempt(mut self, n: u32) -> Self {
        self.reconnect_on = Some(n);
        self
    }

    /// The link comes up by itself after `n` polls that report it down.
    pub fn up_after_polls(mut self, n: u32) -> Self {
        self.up_after_polls = Some(n);
        self
    }

    /// The first `n` DNS refreshes fail.
    pub fn failing_dns(mut self, n: u32) -> Self {
        self.dns_failures = n;
        self
    }

    /// Radio reset fails every time.
    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn associations(&self) -> u32 {
        self.associations
    }

    pub fn dns_refreshes(&self) -> u32 {
        self.dns_refreshes
    }
}

impl Link for MockLink {
    fn is_connected(&self) -> bool {
        if self.connected {
            return true;
        }
        let Some(n) = self.up_after_polls else {
            return false;
        };
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls > n
    }

    fn reset_radio(&mut self) -> Result<(), LinkError> {
        self.resets += 1;
        self.connected = false;
        if self.fail_commands {
            return Err(LinkError::Command {
                command: "nmcli radio wifi off".to_string(),
                reason: "mock failure".to_string(),
            });
        }
        Ok(())
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        self.associations += 1;
        if self.reconnect_on.is_some_and(|n| self.associations >= n) {
            self.connected = true;
        }
        Ok(())
    }

    fn refresh_dns(&mut self) -> Result<(), LinkError> {
        self.dns_refreshes += 1;
        if self.dns_refreshes <= self.dns_failures {
            return Err(LinkError::Dns("mock.invalid".to_string()));
        }
        Ok(())
    }
}

/// Restart hook that only counts.
#[derive(Debug, Default)]
pub struct CountingRestart {
    pub count: u32,
}

impl Restart for CountingRestart {
    fn restart(&mut self) {
        self.count += 1;
    }
}

/// Source that replays canned bodies or errors, in order.
pub struct ScriptedSource {
    responses: VecDeque<Result<String, FetchError>>,
}

impl ScriptedSource {
    pub fn new(responses: Vec<Result<String, FetchError>>) -> Self {
        Self {
            responses: responses.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl DepartureSource for ScriptedSource {
    fn fetch_body(&mut self) -> Result<String, FetchError> {
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("no scripted response".to_string())))
    }
}

/// Snapshot with one departure per destination, leaving at 19:00, 19:01, ...
pub fn snapshot_with(destinations: &[&str]) -> Arc<DepartureSnapshot> {
    let departures = destinations
        .iter()
        .enumerate()
        .map(|(i, dest)| DepartureRecord::new("REG", dest, &format!("19:{i:02}"), "+0'"))
        .collect();
    Arc::new(DepartureSnapshot {
        weather_text: "20° - Clear".to_string(),
        station_name: Some("Castelfranco".to_string()),
        departures,
    })
}
