//! Digit-at-a-time scanning order for the multiplexed display.

use crate::clock_text::Text;
use crate::constants::CELL_COUNT;
use crate::segments::segments_for;

/// One multiplex slice: which digit to light and with which segments.
#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub struct Frame {
    pub position: u8,
    pub bits: u8,
}

/// Rotates through the digit positions `0, 1, 2, 3, 0, ...`.
#[derive(Debug, Default)]
pub struct Multiplexer {
    next_position: u8,
}

impl Multiplexer {
    #[must_use]
    pub const fn new() -> Self {
        Self { next_position: 0 }
    }

    /// The position the next call to [`step`](Self::step) will light.
    #[must_use]
    pub const fn next_position(&self) -> u8 {
        self.next_position
    }

    /// Produce the frame for the next position and advance the rotation.
    pub fn step(&mut self, text: &Text) -> Frame {
        let position = self.next_position;
        let ch = text.get(usize::from(position)).copied().unwrap_or(' ');
        self.next_position = match usize::from(position).checked_add(1) {
            Some(next) if next < CELL_COUNT => position.wrapping_add(1),
            _ => 0,
        };
        Frame {
            position,
            bits: segments_for(ch),
        }
    }
}
