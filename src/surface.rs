//! # Render Surface
//!
//! Drawing primitives used by the state machine, and [`MatrixSurface`], the
//! implementation that draws with embedded-graphics into a packed 1-bit frame
//! and publishes it to the refresh thread on [`present`](RenderSurface::present).
//!
//! Nothing drawn is visible until `present()` is called, so a clear followed by
//! a redraw never reaches the panel as a blank frame.

use crate::refresh::SharedFrame;
use embedded_graphics::{
    draw_target::DrawTargetExt,
    image::{Image, ImageRaw},
    mono_font::{
        iso_8859_1::{FONT_5X7, FONT_7X14},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::Rectangle,
    text::{Baseline, Text},
};
use std::convert::Infallible;
use std::sync::Arc;

/// Height of one DMD module and of the whole sign.
pub const PANEL_HEIGHT: u32 = 16;
/// Width of one DMD module.
pub const PANEL_WIDTH: u32 = 32;

/// The two fonts the sign uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FontId {
    /// 14 px tall, clock and weather
    Large,
    /// 7 px tall, two lines fit on the panel
    Small,
}

impl FontId {
    fn mono(self) -> &'static MonoFont<'static> {
        match self {
            FontId::Large => &FONT_7X14,
            FontId::Small => &FONT_5X7,
        }
    }

    /// Default top row for single-line text in this font.
    pub fn y_offset(self) -> i32 {
        match self {
            FontId::Large => 1,
            FontId::Small => 4,
        }
    }

    /// Horizontal advance of one character.
    pub fn advance(self) -> i32 {
        let font = self.mono();
        (font.character_size.width + font.character_spacing) as i32
    }

    pub fn height(self) -> u32 {
        self.mono().character_size.height
    }

    /// Width in pixels of `text` rendered in this font.
    pub fn text_width(self, text: &str) -> i32 {
        text.chars().count() as i32 * self.advance()
    }
}

/// A 1-bit bitmap, rows padded to whole bytes, MSB first, set bit = lit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: &'static [u8],
}

/// 16×16 train front shown on the departures header.
pub const TRAIN_ICON: Bitmap = Bitmap {
    width: 16,
    height: 16,
    data: &[
        0x0f, 0xf8, 0x3f, 0xfc, 0x7f, 0xfe, 0x61, 0x86, //
        0x61, 0x86, 0x61, 0x86, 0x61, 0x86, 0x7f, 0xfe, //
        0x7f, 0xfe, 0x7f, 0xfe, 0x67, 0xe6, 0x67, 0xe6, //
        0x77, 0xee, 0x3f, 0xfc, 0x0c, 0x30, 0x18, 0x18, //
    ],
};

/// Drawing operations the display state machine relies on.
///
/// Coordinates are pixels with the origin top-left; `y` is the top of the
/// text cell. Anything outside the panel is clipped.
pub trait RenderSurface {
    /// Panel width in pixels.
    fn width(&self) -> i32;

    /// Blank the whole frame.
    fn clear(&mut self);

    fn select_font(&mut self, font: FontId);

    fn font(&self) -> FontId;

    fn draw_text(&mut self, x: i32, y: i32, text: &str);

    fn draw_bitmap(&mut self, x: i32, y: i32, bitmap: &Bitmap);

    /// Place `text` at (`x`, `y`) as a marquee. The marquee owns the band of
    /// rows under the current font from `left_edge` to the right border.
    fn begin_marquee(&mut self, text: &str, x: i32, y: i32, left_edge: i32);

    /// Move the marquee one pixel left. Returns `true` once the text has fully
    /// left the band (or if no marquee is active).
    fn step_marquee(&mut self) -> bool;

    /// Publish the frame to the panel.
    fn present(&mut self);

    /// Top row for single-line text in the current font.
    fn y_offset(&self) -> i32 {
        self.font().y_offset()
    }

    fn text_width(&self, text: &str) -> i32 {
        self.font().text_width(text)
    }
}

/// Packed 1-bit frame that embedded-graphics can draw into.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes: vec![0; (width.div_ceil(8) * height) as usize],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, on: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = (y * self.width.div_ceil(8) + x / 8) as usize;
        let mask = 0x80 >> (x % 8);
        if on {
            self.bytes[index] |= mask;
        } else {
            self.bytes[index] &= !mask;
        }
    }

    #[cfg(test)]
    pub fn is_lit(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = (y * self.width.div_ceil(8) + x / 8) as usize;
        self.bytes[index] & (0x80 >> (x % 8)) != 0
    }

    /// Number of lit pixels in rows `y0..y1`.
    #[cfg(test)]
    pub fn lit_in_rows(&self, y0: u32, y1: u32) -> usize {
        (y0..y1.min(self.height))
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_lit(x, y))
            .count()
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_pixel(point.x as u32, point.y as u32, color.is_on());
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Marquee {
    text: String,
    x: i32,
    y: i32,
    left_edge: i32,
    text_width: i32,
}

/// [`RenderSurface`] over a [`FrameBuffer`], publishing into a [`SharedFrame`].
pub struct MatrixSurface {
    frame: FrameBuffer,
    shared: Arc<SharedFrame>,
    font: FontId,
    marquee: Option<Marquee>,
}

impl MatrixSurface {
    pub fn new(shared: Arc<SharedFrame>) -> Self {
        Self {
            frame: FrameBuffer::new(shared.width(), shared.height()),
            shared,
            font: FontId::Large,
            marquee: None,
        }
    }

    /// The frame as drawn so far, presented or not.
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    fn style(&self) -> MonoTextStyle<'static, BinaryColor> {
        MonoTextStyle::new(self.font.mono(), BinaryColor::On)
    }

    fn draw_marquee(&mut self) {
        let Some(marquee) = &self.marquee else {
            return;
        };
        let band_width = (self.frame.width as i32 - marquee.left_edge).max(0) as u32;
        let band = Rectangle::new(
            Point::new(marquee.left_edge, marquee.y),
            Size::new(band_width, self.font.height()),
        );
        let style = self.style();
        let _ = self.frame.fill_solid(&band, BinaryColor::Off);
        let _ = Text::with_baseline(
            &marquee.text,
            Point::new(marquee.x, marquee.y),
            style,
            Baseline::Top,
        )
        .draw(&mut self.frame.clipped(&band));
    }
}

impl RenderSurface for MatrixSurface {
    fn width(&self) -> i32 {
        self.frame.width as i32
    }

    fn clear(&mut self) {
        self.frame.clear();
    }

    fn select_font(&mut self, font: FontId) {
        self.font = font;
    }

    fn font(&self) -> FontId {
        self.font
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str) {
        let style = self.style();
        let _ = Text::with_baseline(text, Point::new(x, y), style, Baseline::Top).draw(&mut self.frame);
    }

    fn draw_bitmap(&mut self, x: i32, y: i32, bitmap: &Bitmap) {
        let raw = ImageRaw::<BinaryColor>::new(bitmap.data, bitmap.width);
        let _ = Image::new(&raw, Point::new(x, y)).draw(&mut self.frame);
    }

    fn begin_marquee(&mut self, text: &str, x: i32, y: i32, left_edge: i32) {
        self.marquee = Some(Marquee {
            text: text.to_string(),
            x,
            y,
            left_edge,
            text_width: self.font.text_width(text),
        });
        self.draw_marquee();
    }

    fn step_marquee(&mut self) -> bool {
        let done = match self.marquee.as_mut() {
            None => return true,
            Some(marquee) => {
                marquee.x -= 1;
                marquee.x + marquee.text_width <= marquee.left_edge
            }
        };
        self.draw_marquee();
        if done {
            self.marquee = None;
        }
        done
    }

    fn present(&mut self) {
        self.shared.store(self.frame.bytes());
    }
}
