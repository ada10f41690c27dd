//! Host-level tests for what the clock face shows: digits, scan order and colon rhythm.
#![cfg(feature = "host")]

use desk_clock::clock_text::{UNSYNCED_TEXT, hours_minutes};
use desk_clock::colon::{ColonPattern, ColonStep};
use desk_clock::multiplexer::Multiplexer;
use desk_clock::segments::segments_for;
use desk_clock::unix_seconds::UnixSeconds;
use desk_clock::wall_clock::WallClock;
use embassy_time::Duration;

// 2025-03-01T00:00:00Z
const MARCH_FIRST_UTC: UnixSeconds = UnixSeconds(1_740_787_200);

#[test]
fn every_minute_of_the_day_renders() {
    for hour in 0..24_u8 {
        for minute in 0..60_u8 {
            let text = hours_minutes(hour, minute);
            let expected = format!("{hour:2}{minute:02}");
            assert_eq!(text.iter().collect::<String>(), expected);
            for ch in text {
                assert_ne!(segments_for(ch), segments_for('?'), "{hour}:{minute}");
            }
        }
    }
}

#[test]
fn wall_clock_walks_through_a_whole_day() {
    let clock = WallClock::new(0);
    clock.set(MARCH_FIRST_UTC, Duration::from_secs(0));
    for minute in 0..1440_u64 {
        let hour = u8::try_from(minute / 60).unwrap();
        let min = u8::try_from(minute % 60).unwrap();
        assert_eq!(
            clock.text_at(Duration::from_secs(minute * 60 + 30)),
            hours_minutes(hour, min)
        );
    }
    // Wraps to the next day.
    assert_eq!(
        clock.text_at(Duration::from_secs(24 * 3600)),
        hours_minutes(0, 0)
    );
}

#[test]
fn negative_offset_crosses_midnight_backwards() {
    let clock = WallClock::new(-300);
    clock.set(MARCH_FIRST_UTC, Duration::from_secs(0));
    assert_eq!(clock.text_at(Duration::from_secs(0)), ['1', '9', '0', '0']);
}

#[test]
fn dashes_until_first_sync() {
    let clock = WallClock::new(540);
    assert_eq!(clock.text_at(Duration::from_secs(3600)), UNSYNCED_TEXT);
    let frame = Multiplexer::new().step(&clock.text_at(Duration::from_secs(0)));
    assert_eq!(frame.bits, segments_for('-'));
}

#[test]
fn multiplexer_visits_each_digit_in_order() {
    let text = ['1', '2', '3', '4'];
    let mut multiplexer = Multiplexer::new();
    let positions: Vec<u8> = (0..12).map(|_| multiplexer.step(&text).position).collect();
    assert_eq!(positions, [0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]);

    let mut multiplexer = Multiplexer::new();
    let bits: Vec<u8> = (0..4).map(|_| multiplexer.step(&text).bits).collect();
    assert_eq!(bits, [0x06, 0x5B, 0x4F, 0x66]);
}

#[test]
fn colon_cycle_is_fifty_pulses_then_a_pause() {
    let lit = ColonStep { lit: true, hold: Duration::from_millis(1) };
    let dark = ColonStep { lit: false, hold: Duration::from_millis(9) };
    let pause = ColonStep { lit: false, hold: Duration::from_millis(500) };

    let mut expected = Vec::new();
    for _ in 0..50 {
        expected.push(lit);
        expected.push(dark);
    }
    expected.push(pause);

    let steps: Vec<ColonStep> = ColonPattern::new().take(expected.len() * 3).collect();
    for cycle in steps.chunks(expected.len()) {
        assert_eq!(cycle, expected.as_slice());
    }
}

#[test]
fn colon_cycle_lasts_one_second_with_fifty_ms_lit() {
    let total: u64 = ColonPattern::new()
        .take(usize::from(ColonPattern::STEPS_PER_CYCLE))
        .map(|step| step.hold.as_millis())
        .sum();
    assert_eq!(total, 1000);

    let lit: u64 = ColonPattern::new()
        .take(usize::from(ColonPattern::STEPS_PER_CYCLE))
        .filter(|step| step.lit)
        .map(|step| step.hold.as_millis())
        .sum();
    assert_eq!(lit, 50);
}
