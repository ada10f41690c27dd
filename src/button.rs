use defmt::info;
use embassy_rp::gpio::Input;
use embassy_time::Timer;

use crate::constants::BUTTON_DEBOUNCE_DELAY;
use crate::provisioning::{HoldButton, PressLatch};

/// Active-low push button with the internal pull-up enabled.
pub struct Button<'d> {
    input: Input<'d>,
    latch: PressLatch,
}

impl<'d> Button<'d> {
    #[must_use]
    pub const fn new(input: Input<'d>) -> Self {
        Self { input, latch: PressLatch::new() }
    }

    #[must_use]
    pub fn is_pressed(&self) -> bool {
        self.input.is_low()
    }
}

impl HoldButton for Button<'_> {
    async fn wait_for_hold(&mut self) {
        loop {
            // Held through boot counts. Otherwise a press left over from the last round must
            // be let go first.
            if !self.latch.take_held(self.is_pressed()) {
                self.input.wait_for_high().await;
                self.input.wait_for_falling_edge().await;
            }

            // Contacts bounce for a few milliseconds. Only a press that is still down after
            // the debounce delay counts.
            Timer::after(BUTTON_DEBOUNCE_DELAY).await;
            if self.is_pressed() {
                info!("Button held");
                return;
            }
        }
    }
}
