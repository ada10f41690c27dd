//! Turn a time of day into the four characters the display shows.

use crate::constants::CELL_COUNT;

/// Four characters, one per digit position, left to right.
pub type Text = [char; CELL_COUNT];

/// Shown until the first successful time sync.
pub const UNSYNCED_TEXT: Text = ['-'; CELL_COUNT];

/// `HHMM` on a 24-hour clock with the leading hour digit blanked when it is zero.
///
/// ```
/// use desk_clock::clock_text::hours_minutes;
///
/// assert_eq!(hours_minutes(9, 5), [' ', '9', '0', '5']);
/// assert_eq!(hours_minutes(23, 59), ['2', '3', '5', '9']);
/// ```
#[must_use]
pub fn hours_minutes(hours: u8, minutes: u8) -> Text {
    let hours_tens = tens_digit(hours);
    [
        if hours_tens == '0' { ' ' } else { hours_tens },
        ones_digit(hours),
        tens_digit(minutes),
        ones_digit(minutes),
    ]
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "Digit extraction on values below 100"
)]
fn tens_digit(value: u8) -> char {
    char::from_digit(u32::from(value / 10 % 10), 10).unwrap_or('?')
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "Digit extraction on values below 100"
)]
fn ones_digit(value: u8) -> char {
    char::from_digit(u32::from(value % 10), 10).unwrap_or('?')
}
