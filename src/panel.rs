//! # Panels
//!
//! Two [`Panel`] implementations:
//!
//! - [`DmdPanel`]: chained 32×16 P10 "DMD" modules, 1/4 scan, driven over an
//!   embedded-hal SPI bus plus four GPIO lines (nOE, A, B, latch).
//! - [`TerminalPanel`]: development output, redraws the frame with ANSI
//!   escapes whenever it changes.

use crate::refresh::{Panel, SharedFrame};
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use std::io::Write;
use thiserror::Error;

/// Rows lit together per scan step on a 1/4 scan module.
const SCAN_QUARTERS: usize = 4;
/// Distance between the rows lit together.
const QUARTER_ROWS: usize = 4;

#[derive(Error, Debug)]
pub enum DmdError<S: std::fmt::Debug, P: std::fmt::Debug> {
    #[error("SPI write failed: {0:?}")]
    Spi(S),
    #[error("GPIO write failed: {0:?}")]
    Pin(P),
}

/// Control lines of a DMD chain.
pub struct DmdPins<P> {
    /// Output enable, active low on the module: low blanks all rows
    pub n_oe: P,
    /// Row select bit 0
    pub a: P,
    /// Row select bit 1
    pub b: P,
    /// Shift register latch (labelled SCLK on the connector)
    pub latch: P,
}

/// Scanner for a chain of DMD modules.
///
/// Each [`refresh_once`](Panel::refresh_once) shifts out one scan quarter
/// (rows `q`, `q+4`, `q+8`, `q+12`) and lights it, so a full frame takes four
/// calls. Module RAM is active low, hence the inverted bytes.
pub struct DmdPanel<SPI, P> {
    spi: SPI,
    pins: DmdPins<P>,
    quarter: usize,
    line: Vec<u8>,
}

impl<SPI, P> DmdPanel<SPI, P>
where
    SPI: SpiBus<u8>,
    P: OutputPin,
{
    /// `width` is the chain width in pixels (32 per module).
    pub fn new(spi: SPI, pins: DmdPins<P>, width: u32) -> Self {
        let bytes_per_row = (width / 8) as usize;
        Self {
            spi,
            pins,
            quarter: 0,
            line: Vec::with_capacity(bytes_per_row * QUARTER_ROWS),
        }
    }

    /// Scan quarter that the next refresh will light.
    pub fn quarter(&self) -> usize {
        self.quarter
    }

    fn select_rows(&mut self) -> Result<(), P::Error> {
        let (a, b) = match self.quarter {
            0 => (false, false),
            1 => (true, false),
            2 => (false, true),
            _ => (true, true),
        };
        if a {
            self.pins.a.set_high()?;
        } else {
            self.pins.a.set_low()?;
        }
        if b {
            self.pins.b.set_high()
        } else {
            self.pins.b.set_low()
        }
    }

    fn latch_and_show(&mut self) -> Result<(), P::Error> {
        self.pins.n_oe.set_low()?;
        self.pins.latch.set_high()?;
        self.pins.latch.set_low()?;
        self.select_rows()?;
        self.pins.n_oe.set_high()
    }
}

impl<SPI, P> Panel for DmdPanel<SPI, P>
where
    SPI: SpiBus<u8> + Send,
    P: OutputPin + Send,
{
    type Error = DmdError<SPI::Error, P::Error>;

    fn refresh_once(&mut self, frame: &SharedFrame) -> Result<(), Self::Error> {
        let q = self.quarter;
        self.line.clear();
        for column in 0..frame.bytes_per_row() {
            for row in [q + 12, q + 8, q + 4, q] {
                self.line.push(!frame.byte(row, column));
            }
        }

        self.spi.write(&self.line).map_err(DmdError::Spi)?;
        self.spi.flush().map_err(DmdError::Spi)?;
        self.latch_and_show().map_err(DmdError::Pin)?;

        self.quarter = (self.quarter + 1) % SCAN_QUARTERS;
        Ok(())
    }
}

/// Terminal stand-in for the LED chain, used with `--stdout`.
pub struct TerminalPanel<W> {
    out: W,
    current: Vec<u8>,
    shown: Option<Vec<u8>>,
}

impl<W: Write + Send> TerminalPanel<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            current: Vec::new(),
            shown: None,
        }
    }

    /// Render a frame as text, one line per pixel row.
    pub fn render_text(frame: &SharedFrame) -> String {
        let width = frame.width() as usize;
        let mut text = String::with_capacity((width + 3) * (frame.height() as usize + 2));
        let border = format!("+{}+\n", "-".repeat(width));
        text.push_str(&border);
        for y in 0..frame.height() {
            text.push('|');
            for x in 0..frame.width() {
                text.push(if frame.is_lit(x, y) { '#' } else { ' ' });
            }
            text.push_str("|\n");
        }
        text.push_str(&border);
        text
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Panel for TerminalPanel<W> {
    type Error = std::io::Error;

    fn refresh_once(&mut self, frame: &SharedFrame) -> Result<(), Self::Error> {
        let len = frame.bytes_per_row() * frame.height() as usize;
        self.current.resize(len, 0);
        frame.load_into(&mut self.current);
        if self.shown.as_deref() == Some(self.current.as_slice()) {
            return Ok(());
        }

        // Home the cursor and overwrite the previous frame in place.
        write!(self.out, "\x1b[H{}", Self::render_text(frame))?;
        self.out.flush()?;
        self.shown = Some(self.current.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Spi(Vec<u8>),
        Pin(&'static str, bool),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct MockSpi(Log);

    impl embedded_hal::spi::ErrorType for MockSpi {
        type Error = Infallible;
    }

    impl SpiBus<u8> for MockSpi {
        fn read(&mut self, _words: &mut [u8]) -> Result<(), Infallible> {
            Ok(())
        }
        fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
            self.0.lock().unwrap().push(Event::Spi(words.to_vec()));
            Ok(())
        }
        fn transfer(&mut self, _read: &mut [u8], _write: &[u8]) -> Result<(), Infallible> {
            Ok(())
        }
        fn transfer_in_place(&mut self, _words: &mut [u8]) -> Result<(), Infallible> {
            Ok(())
        }
        fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct MockPin(&'static str, Log);

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.1.lock().unwrap().push(Event::Pin(self.0, false));
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.1.lock().unwrap().push(Event::Pin(self.0, true));
            Ok(())
        }
    }

    fn dmd(width: u32) -> (DmdPanel<MockSpi, MockPin>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let pins = DmdPins {
            n_oe: MockPin("oe", Arc::clone(&log)),
            a: MockPin("a", Arc::clone(&log)),
            b: MockPin("b", Arc::clone(&log)),
            latch: MockPin("latch", Arc::clone(&log)),
        };
        (DmdPanel::new(MockSpi(Arc::clone(&log)), pins, width), log)
    }

    #[test]
    fn test_dmd_shifts_interleaved_inverted_rows() {
        let frame = SharedFrame::new(32, 16);
        let mut packed = vec![0u8; 4 * 16];
        // Distinct byte for each row in column 0.
        for row in 0..16 {
            packed[row * 4] = row as u8 + 1;
        }
        frame.store(&packed);

        let (mut panel, log) = dmd(32);
        panel.refresh_once(&frame).unwrap();

        let log = log.lock().unwrap();
        let Event::Spi(bytes) = &log[0] else {
            panic!("first event should be the SPI shift, got {:?}", log[0]);
        };
        assert_eq!(bytes.len(), 16, "4 columns x 4 rows");
        assert_eq!(&bytes[..4], &[!13u8, !9, !5, !1], "rows 12, 8, 4, 0");
        assert_eq!(&bytes[4..8], &[0xFF; 4], "unlit columns are all ones");
    }

    #[test]
    fn test_dmd_latch_sequence_and_row_select() {
        let frame = SharedFrame::new(32, 16);
        let (mut panel, log) = dmd(32);

        panel.refresh_once(&frame).unwrap();
        {
            let log = log.lock().unwrap();
            let pins: Vec<_> = log
                .iter()
                .filter_map(|e| match e {
                    Event::Pin(name, level) => Some((*name, *level)),
                    _ => None,
                })
                .collect();
            assert_eq!(
                pins,
                vec![
                    ("oe", false),
                    ("latch", true),
                    ("latch", false),
                    ("a", false),
                    ("b", false),
                    ("oe", true),
                ]
            );
        }
        assert_eq!(panel.quarter(), 1);

        let expected = [(true, false), (false, true), (true, true), (false, false)];
        for (a, b) in expected {
            log.lock().unwrap().clear();
            panel.refresh_once(&frame).unwrap();
            let log = log.lock().unwrap();
            assert!(log.contains(&Event::Pin("a", a)));
            assert!(log.contains(&Event::Pin("b", b)));
        }
        assert_eq!(panel.quarter(), 1, "quarters cycle 0..4");
    }

    #[test]
    fn test_terminal_panel_draws_only_on_change() {
        let frame = SharedFrame::new(8, 2);
        frame.store(&[0x81, 0x00]);
        let mut panel = TerminalPanel::new(Vec::new());

        panel.refresh_once(&frame).unwrap();
        panel.refresh_once(&frame).unwrap();
        let out = String::from_utf8(panel.into_inner()).unwrap();

        assert_eq!(out.matches("\x1b[H").count(), 1, "unchanged frame is not redrawn");
        assert!(out.contains("|#      #|"));
        assert!(out.contains("|        |"));
    }
}
