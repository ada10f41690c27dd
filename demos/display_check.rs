//! Wiring check for the display board, no radio needed.
//!
//! Steps every digit position through `0000`, `1111`, ... `9999` and then `----`, one pattern
//! per second, with the colon lit on even patterns. A dark or wrong segment points at a bad
//! joint on the matching GPIO in `hardware.rs`.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;

use defmt::info;
use defmt_rtt as _;
use desk_clock::Result;
use desk_clock::clock_text::{Text, UNSYNCED_TEXT};
use desk_clock::constants::{CELL_COUNT, MULTIPLEX_TICK};
use desk_clock::hardware::Hardware;
use desk_clock::multiplexer::Multiplexer;
use embassy_executor::Spawner;
use embassy_rp::gpio::Level;
use embassy_time::{Duration, Instant, Ticker};
use panic_probe as _;

const PATTERN_TIME: Duration = Duration::from_secs(1);

#[embassy_executor::main]
pub async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    core::panic!("{err}");
}

async fn inner_main(_spawner: Spawner) -> Result<Infallible> {
    let Hardware {
        mut display,
        mut colon,
        ..
    } = Hardware::default();
    let mut multiplexer = Multiplexer::new();
    let mut ticker = Ticker::every(MULTIPLEX_TICK);

    for (pattern, text) in patterns().enumerate().cycle() {
        info!("Display check pattern {}", pattern);
        colon.set_level(Level::from(pattern & 1 == 0));
        let until = Instant::now() + PATTERN_TIME;
        while Instant::now() < until {
            display.show(multiplexer.step(&text))?;
            ticker.next().await;
        }
    }
    // `cycle` over a non-empty iterator never ends.
    core::future::pending().await
}

fn patterns() -> impl Iterator<Item = Text> + Clone {
    ('0'..='9')
        .map(|digit| [digit; CELL_COUNT])
        .chain(core::iter::once(UNSYNCED_TEXT))
}
