//! # Panel Refresh Driver
//!
//! DMD panels are not latched displays: they only light one quarter of their
//! rows at a time and must be rescanned thousands of times per second. This
//! module owns that duty and nothing else.
//!
//! The refresh thread sees only a [`SharedFrame`] and a [`Panel`]. It does not
//! know about fetches, fonts or states, and the main loop never waits on it.
//!
//! ## Frame layout
//! Row-major, one bit per pixel, `width / 8` bytes per row, most significant
//! bit is the leftmost pixel, a set bit is a lit LED.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frame buffer shared between the main loop (writer) and the refresh thread
/// (reader). Bytes are individually atomic, frames are not.
pub struct SharedFrame {
    width: u32,
    height: u32,
    bytes: Vec<AtomicU8>,
}

impl SharedFrame {
    /// `width` must be a multiple of 8.
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width / 8 * height) as usize;
        Self {
            width,
            height,
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        (self.width / 8) as usize
    }

    /// Copy a whole packed frame in. Extra or missing bytes are ignored.
    pub fn store(&self, packed: &[u8]) {
        for (cell, byte) in self.bytes.iter().zip(packed) {
            cell.store(*byte, Ordering::Relaxed);
        }
    }

    /// Copy the current frame out into `out`.
    pub fn load_into(&self, out: &mut [u8]) {
        for (byte, cell) in out.iter_mut().zip(&self.bytes) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }

    /// One packed byte: 8 pixels of `row` starting at column `column * 8`.
    /// Out-of-range positions read as dark.
    pub fn byte(&self, row: usize, column: usize) -> u8 {
        let bpr = self.bytes_per_row();
        if column >= bpr {
            return 0;
        }
        self.bytes
            .get(row * bpr + column)
            .map_or(0, |cell| cell.load(Ordering::Relaxed))
    }

    pub fn is_lit(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.byte(y as usize, (x / 8) as usize) & (0x80 >> (x % 8)) != 0
    }
}

/// A physical or simulated display that can be repainted from a frame.
///
/// `refresh_once` is called from the refresh thread at a fixed cadence and
/// must return quickly: no network, no locks held by the main loop.
pub trait Panel: Send {
    type Error: std::fmt::Debug;

    fn refresh_once(&mut self, frame: &SharedFrame) -> Result<(), Self::Error>;
}

/// Handle to the running refresh thread. Dropping it stops the thread.
pub struct RefreshDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshDriver {
    /// Spawn the refresh thread. `interval` is the pause between two
    /// `refresh_once` calls.
    pub fn start<P>(frame: Arc<SharedFrame>, mut panel: P, interval: Duration) -> std::io::Result<Self>
    where
        P: Panel + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("panel-refresh".to_string())
            .spawn(move || {
                let mut failing = false;
                while flag.load(Ordering::Relaxed) {
                    match panel.refresh_once(&frame) {
                        Ok(()) => failing = false,
                        Err(e) => {
                            // Report the first failure of a streak only.
                            if !failing {
                                tracing::warn!("panel refresh failed: {:?}", e);
                            }
                            failing = true;
                        }
                    }
                    thread::sleep(interval);
                }
            })?;

        tracing::info!("panel refresh started, interval {:?}", interval);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RefreshDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingPanel {
        calls: Arc<AtomicUsize>,
        seen_lit: Arc<AtomicBool>,
    }

    impl Panel for CountingPanel {
        type Error = ();

        fn refresh_once(&mut self, frame: &SharedFrame) -> Result<(), ()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if frame.is_lit(0, 0) {
                self.seen_lit.store(true, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    #[test]
    fn test_store_and_read_back() {
        let frame = SharedFrame::new(16, 2);
        frame.store(&[0x80, 0x01, 0x00, 0xFF]);
        assert!(frame.is_lit(0, 0));
        assert!(!frame.is_lit(1, 0));
        assert!(frame.is_lit(15, 0));
        assert!(frame.is_lit(8, 1));
        assert!(!frame.is_lit(16, 0), "out of range reads dark");
        assert_eq!(frame.byte(1, 1), 0xFF);
        assert_eq!(frame.byte(1, 2), 0x00);

        let mut out = [0u8; 4];
        frame.load_into(&mut out);
        assert_eq!(out, [0x80, 0x01, 0x00, 0xFF]);
    }

    #[test]
    fn test_driver_repaints_until_stopped() {
        let frame = Arc::new(SharedFrame::new(8, 1));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen_lit = Arc::new(AtomicBool::new(false));
        let panel = CountingPanel {
            calls: Arc::clone(&calls),
            seen_lit: Arc::clone(&seen_lit),
        };

        let mut driver =
            RefreshDriver::start(Arc::clone(&frame), panel, Duration::from_millis(1)).unwrap();
        frame.store(&[0x80]);
        thread::sleep(Duration::from_millis(50));
        driver.stop();

        let after_stop = calls.load(Ordering::Relaxed);
        assert!(after_stop > 0, "panel should have been refreshed");
        assert!(seen_lit.load(Ordering::Relaxed), "panel should see the new frame");

        thread::sleep(Duration::from_millis(10));
        assert_eq!(calls.load(Ordering::Relaxed), after_stop, "no refresh after stop");
    }
}
