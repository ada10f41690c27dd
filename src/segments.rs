//! Segment masks for the clock's 7-segment digits.
//!
//! Bit `n` of a mask drives segment line `n`:
//!
//! ```text
//!      A
//!     ---
//!  F |   | B
//!     -G-
//!  E |   | C
//!     ---
//!      D
//! ```

/// Segment bit constants and the character table.
pub struct Leds;

impl Leds {
    pub const SEG_A: u8 = 0b_0000_0001;
    pub const SEG_B: u8 = 0b_0000_0010;
    pub const SEG_C: u8 = 0b_0000_0100;
    pub const SEG_D: u8 = 0b_0000_1000;
    pub const SEG_E: u8 = 0b_0001_0000;
    pub const SEG_F: u8 = 0b_0010_0000;
    pub const SEG_G: u8 = 0b_0100_0000;
    /// Not wired on the clock board; kept so masks stay byte-sized.
    pub const DECIMAL: u8 = 0b_1000_0000;

    /// Digits 0-9. The 7 carries segment F, so it reads as a "hooked" seven.
    pub const DIGITS: [u8; 10] = [
        0b_0011_1111, // 0
        0b_0000_0110, // 1
        0b_0101_1011, // 2
        0b_0100_1111, // 3
        0b_0110_0110, // 4
        0b_0110_1101, // 5
        0b_0111_1101, // 6
        0b_0010_0111, // 7
        0b_0111_1111, // 8
        0b_0110_1111, // 9
    ];

    pub const SPACE: u8 = 0b_0000_0000;
    pub const COLON: u8 = Self::DECIMAL | Self::SEG_F;
    pub const DASH: u8 = Self::SEG_G;
    /// Shown for any character without a table entry.
    pub const ERROR: u8 = Self::SEG_B;
}

/// Look up the mask for `ch`. Unknown characters render as [`Leds::ERROR`].
#[must_use]
pub fn segments_for(ch: char) -> u8 {
    match ch {
        ' ' => Leds::SPACE,
        ':' => Leds::COLON,
        '-' => Leds::DASH,
        _ => ch
            .to_digit(10)
            .and_then(|digit| Leds::DIGITS.get(digit as usize).copied())
            .unwrap_or(Leds::ERROR),
    }
}
