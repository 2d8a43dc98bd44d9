//! Blocking animations: the horizontal marquee and the vertical slide-up
//! between two departures.
//!
//! Both hold the main loop for their whole run. Frame pacing goes through
//! [`Timer::sleep_ms`], the panel keeps refreshing from its own thread.

use crate::surface::{RenderSurface, PANEL_HEIGHT};
use crate::timer::Timer;
use crate::DepartureRecord;

/// Pause between two marquee steps.
pub const MARQUEE_FRAME_MS: u64 = 35;
/// Pause between two slide-up frames.
pub const SLIDE_FRAME_MS: u64 = 20;
/// Rows travelled by a slide-up, one per frame.
pub const SLIDE_ROWS: i32 = PANEL_HEIGHT as i32;
/// Height of one line of the small font layout.
pub const LINE_HEIGHT: i32 = 8;
/// Column of the destination line.
pub const DESTINATION_X: i32 = 2;
/// Column of the time + delay line.
pub const TIME_X: i32 = 8;

/// Scroll `text` from column `x` leftwards until it has left the band that
/// starts at `left_edge`. Returns the number of steps taken.
pub fn scroll_marquee<S, T>(surface: &mut S, timer: &T, text: &str, x: i32, y: i32, left_edge: i32) -> u32
where
    S: RenderSurface,
    T: Timer,
{
    surface.begin_marquee(text, x, y, left_edge);
    surface.present();

    let mut steps = 0;
    loop {
        timer.sleep_ms(MARQUEE_FRAME_MS);
        let done = surface.step_marquee();
        surface.present();
        steps += 1;
        if done {
            return steps;
        }
    }
}

/// Draw a departure in its resting position: destination on the top line,
/// time and delay on the bottom line.
pub fn draw_departure<S: RenderSurface>(surface: &mut S, train: &DepartureRecord) {
    surface.clear();
    surface.draw_text(DESTINATION_X, 0, &train.destination);
    surface.draw_text(TIME_X, LINE_HEIGHT, &train.time_line());
    surface.present();
}

/// A line is drawn only while some of it overlaps the panel rows.
fn line_visible(y: i32) -> bool {
    y > -LINE_HEIGHT && y < SLIDE_ROWS
}

/// Push `outgoing` up and out while `incoming` rises from below, one row per
/// frame. Either side may be absent. Returns the number of frames drawn.
pub fn slide_up<S, T>(
    surface: &mut S,
    timer: &T,
    outgoing: Option<&DepartureRecord>,
    incoming: Option<&DepartureRecord>,
) -> u32
where
    S: RenderSurface,
    T: Timer,
{
    let outgoing = outgoing.map(|t| (t.destination.as_str(), t.time_line()));
    let incoming = incoming.map(|t| (t.destination.as_str(), t.time_line()));

    let mut frames = 0;
    for offset in 0..=SLIDE_ROWS {
        surface.clear();
        for (base, train) in [(0, &outgoing), (SLIDE_ROWS, &incoming)] {
            let Some((destination, time_line)) = train else {
                continue;
            };
            let destination_y = base - offset;
            if line_visible(destination_y) {
                surface.draw_text(DESTINATION_X, destination_y, destination);
            }
            let time_y = base + LINE_HEIGHT - offset;
            if line_visible(time_y) {
                surface.draw_text(TIME_X, time_y, time_line);
            }
        }
        surface.present();
        timer.sleep_ms(SLIDE_FRAME_MS);
        frames += 1;
    }
    frames
}
