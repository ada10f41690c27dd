//! Board wiring for the desk clock.
//!
//! | Function | GPIO |
//! |----------|------|
//! | digit anodes 0..3 | GP12, GP13, GP14, GP15 |
//! | segments A..G | GP2, GP4, GP5, GP16, GP17, GP18, GP19 |
//! | colon | GP22 |
//! | setup button | GP0, to ground |
//!
//! The radio uses GP23, GP24, GP25 and GP29 on the Pico W.

use embassy_rp::Peri;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::FLASH;

use crate::button::Button;
use crate::led4::Led4;
use crate::output_array::OutputArray;
#[cfg(feature = "wifi")]
use crate::wifi::WifiPins;

pub struct Hardware {
    pub display: Led4<Output<'static>>,
    pub colon: Output<'static>,
    pub button: Button<'static>,
    pub flash: Peri<'static, FLASH>,
    #[cfg(feature = "wifi")]
    pub wifi: WifiPins,
}

impl Default for Hardware {
    fn default() -> Self {
        let peripherals = embassy_rp::init(embassy_rp::config::Config::default());

        let cells = OutputArray::new([
            Output::new(peripherals.PIN_12, Level::Low),
            Output::new(peripherals.PIN_13, Level::Low),
            Output::new(peripherals.PIN_14, Level::Low),
            Output::new(peripherals.PIN_15, Level::Low),
        ]);
        let segments = OutputArray::new([
            Output::new(peripherals.PIN_2, Level::Low),
            Output::new(peripherals.PIN_4, Level::Low),
            Output::new(peripherals.PIN_5, Level::Low),
            Output::new(peripherals.PIN_16, Level::Low),
            Output::new(peripherals.PIN_17, Level::Low),
            Output::new(peripherals.PIN_18, Level::Low),
            Output::new(peripherals.PIN_19, Level::Low),
        ]);

        Self {
            display: Led4::new(cells, segments),
            colon: Output::new(peripherals.PIN_22, Level::Low),
            button: Button::new(Input::new(peripherals.PIN_0, Pull::Up)),
            flash: peripherals.FLASH,
            #[cfg(feature = "wifi")]
            wifi: WifiPins {
                power: peripherals.PIN_23,
                chip_select: peripherals.PIN_25,
                data: peripherals.PIN_24,
                clock: peripherals.PIN_29,
                pio: peripherals.PIO0,
                dma: peripherals.DMA_CH0,
            },
        }
    }
}
