//! The colon's "breathing" blink: a burst of short flashes followed by a dark pause.

use embassy_time::Duration;

use crate::constants::{COLON_OFF, COLON_ON, COLON_PAUSE, COLON_PULSE_COUNT};

/// Hold the colon lit (or dark) for `hold`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub struct ColonStep {
    pub lit: bool,
    pub hold: Duration,
}

/// Endless sequence of [`ColonStep`]s.
///
/// One cycle is [`COLON_PULSE_COUNT`] pairs of (lit [`COLON_ON`], dark [`COLON_OFF`]) and
/// then one dark [`COLON_PAUSE`].
#[derive(Clone, Debug, Default)]
pub struct ColonPattern {
    index: u16,
}

impl ColonPattern {
    /// Steps in one full cycle, pause included.
    pub const STEPS_PER_CYCLE: u16 = COLON_PULSE_COUNT * 2 + 1;

    #[must_use]
    pub const fn new() -> Self {
        Self { index: 0 }
    }
}

impl Iterator for ColonPattern {
    type Item = ColonStep;

    fn next(&mut self) -> Option<ColonStep> {
        let index = self.index;
        self.index = if index.saturating_add(1) >= Self::STEPS_PER_CYCLE {
            0
        } else {
            index.saturating_add(1)
        };

        Some(if index >= COLON_PULSE_COUNT.saturating_mul(2) {
            ColonStep { lit: false, hold: COLON_PAUSE }
        } else if index & 1 == 0 {
            ColonStep { lit: true, hold: COLON_ON }
        } else {
            ColonStep { lit: false, hold: COLON_OFF }
        })
    }
}

#[cfg(not(feature = "host"))]
mod device {
    use defmt::info;
    use embassy_futures::select::{Either, select};
    use embassy_rp::gpio::{Level, Output};
    use embassy_time::{Instant, Timer};

    use super::ColonPattern;
    use crate::shutdown::ShutdownListener;

    /// Blink the colon until shutdown, then leave it dark.
    ///
    /// Deadlines advance from the previous deadline rather than from "now", so the cycle keeps
    /// its length even when the executor is late to wake this task.
    #[embassy_executor::task]
    pub async fn colon_task(mut colon: Output<'static>, mut shutdown: ShutdownListener<'static>) {
        info!("Colon blinking");
        let mut deadline = Instant::now();
        for step in ColonPattern::new() {
            colon.set_level(Level::from(step.lit));
            deadline += step.hold;
            if let Either::Second(()) = select(Timer::at(deadline), shutdown.wait()).await {
                break;
            }
        }
        colon.set_low();
        info!("Colon off for shutdown");
    }
}

#[cfg(not(feature = "host"))]
pub use device::colon_task;
