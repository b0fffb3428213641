//! Inflater output window.

use super::bits::BitSource;
use crate::error::{Error, Result};

pub const WINDOW_SIZE: usize = 1 << 15;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Circular buffer of the last 32 KiB of output. Bytes are written at
/// `end` and handed out in order; back-references read behind `end`.
#[derive(Debug)]
pub struct OutputWindow {
    window: Vec<u8>,
    end: usize,
    /// Bytes written but not yet copied out.
    filled: usize,
    /// Bytes available as back-reference history.
    history: usize,
}

impl Default for OutputWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputWindow {
    pub fn new() -> Self {
        Self {
            window: vec![0; WINDOW_SIZE],
            end: 0,
            filled: 0,
            history: 0,
        }
    }

    pub fn reset(&mut self) {
        self.end = 0;
        self.filled = 0;
        self.history = 0;
    }

    /// Room left before pending output must be copied out.
    pub fn free_space(&self) -> usize {
        WINDOW_SIZE - self.filled
    }

    /// Pending output bytes.
    pub fn available(&self) -> usize {
        self.filled
    }

    #[inline]
    pub fn write(&mut self, byte: u8) {
        debug_assert!(self.filled < WINDOW_SIZE, "output window overflow");
        self.window[self.end] = byte;
        self.end = (self.end + 1) & WINDOW_MASK;
        self.filled += 1;
        self.history = (self.history + 1).min(WINDOW_SIZE);
    }

    /// Copy `length` bytes from `distance` bytes back. The caller keeps at
    /// least `length` bytes of free space.
    pub fn repeat(&mut self, length: usize, distance: usize) -> Result<()> {
        if distance == 0 || distance > self.history {
            return Err(Error::format(format!(
                "back-reference distance {distance} exceeds {} bytes of history",
                self.history
            )));
        }
        debug_assert!(self.filled + length <= WINDOW_SIZE, "output window overflow");

        let mut from = (self.end + WINDOW_SIZE - distance) & WINDOW_MASK;
        if distance >= length && from + length <= WINDOW_SIZE && self.end + length <= WINDOW_SIZE {
            self.window.copy_within(from..from + length, self.end);
            self.end = (self.end + length) & WINDOW_MASK;
        } else {
            // Overlapping or wrapping copy: byte by byte.
            for _ in 0..length {
                self.window[self.end] = self.window[from];
                self.end = (self.end + 1) & WINDOW_MASK;
                from = (from + 1) & WINDOW_MASK;
            }
        }
        self.filled += length;
        self.history = (self.history + length).min(WINDOW_SIZE);
        Ok(())
    }

    /// Move up to `length` bytes of a stored block from `input`.
    pub fn copy_stored(&mut self, input: &mut BitSource, length: usize) -> usize {
        let length = length.min(self.free_space()).min(input.remaining_input());
        let mut copied = 0;
        while copied < length {
            let tail = (WINDOW_SIZE - self.end).min(length - copied);
            let n = input.copy_bytes(&mut self.window[self.end..self.end + tail], tail);
            if n == 0 {
                break;
            }
            self.end = (self.end + n) & WINDOW_MASK;
            copied += n;
        }
        self.filled += copied;
        self.history = (self.history + copied).min(WINDOW_SIZE);
        copied
    }

    /// Load a preset dictionary as history. Nothing is handed out.
    pub fn copy_dictionary(&mut self, dictionary: &[u8]) {
        debug_assert_eq!(self.filled, 0);
        let dictionary = &dictionary[dictionary.len().saturating_sub(WINDOW_SIZE)..];
        self.window[..dictionary.len()].copy_from_slice(dictionary);
        self.end = dictionary.len() & WINDOW_MASK;
        self.history = dictionary.len();
    }

    /// Copy pending output into `out`, oldest first.
    pub fn copy_output(&mut self, out: &mut [u8]) -> usize {
        let count = self.filled.min(out.len());
        let start = (self.end + WINDOW_SIZE - self.filled) & WINDOW_MASK;
        let first = count.min(WINDOW_SIZE - start);
        out[..first].copy_from_slice(&self.window[start..start + first]);
        out[first..count].copy_from_slice(&self.window[..count - first]);
        self.filled -= count;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_repeat() {
        let mut window = OutputWindow::new();
        window.write(b'a');
        window.write(b'b');
        window.repeat(5, 2).unwrap();
        let mut out = [0u8; 16];
        let n = window.copy_output(&mut out);
        assert_eq!(&out[..n], b"abababa");
    }

    #[test]
    fn test_distance_beyond_history_is_rejected() {
        let mut window = OutputWindow::new();
        window.write(b'a');
        assert!(window.repeat(3, 2).is_err());
        assert!(window.repeat(3, 0).is_err());
    }

    #[test]
    fn test_wraps_around() {
        let mut window = OutputWindow::new();
        let mut out = vec![0u8; WINDOW_SIZE];
        for i in 0..WINDOW_SIZE - 2 {
            window.write(i as u8);
        }
        assert_eq!(window.copy_output(&mut out), WINDOW_SIZE - 2);

        window.write(1);
        window.write(2);
        window.write(3);
        window.repeat(6, 3).unwrap();
        let n = window.copy_output(&mut out);
        assert_eq!(&out[..n], &[1, 2, 3, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_dictionary_is_history_only() {
        let mut window = OutputWindow::new();
        window.copy_dictionary(b"xyz");
        assert_eq!(window.available(), 0);
        window.repeat(3, 3).unwrap();
        let mut out = [0u8; 8];
        let n = window.copy_output(&mut out);
        assert_eq!(&out[..n], b"xyz");
    }

    #[test]
    fn test_copy_stored_from_input() {
        let mut window = OutputWindow::new();
        let mut input = BitSource::new();
        input.set_input(b"stored bytes");
        assert_eq!(window.copy_stored(&mut input, 6), 6);
        let mut out = [0u8; 16];
        let n = window.copy_output(&mut out);
        assert_eq!(&out[..n], b"stored");
    }
}
