//! Driver and multiplexing task for the clock's 4-digit, 7-segment display.
//!
//! The display is wired with active-high digit anodes and active-high segment lines. Only one
//! digit is lit at a time; [`display_task`] rotates through them every
//! [`MULTIPLEX_TICK`](crate::constants::MULTIPLEX_TICK) so all four appear lit together.

use embedded_hal::digital::{OutputPin, PinState};

use crate::Result;
use crate::constants::{CELL_COUNT, SEGMENT_COUNT};
use crate::multiplexer::Frame;
use crate::output_array::OutputArray;

/// Anode (digit select) and cathode (segment select) banks of the display.
pub struct Led4<P> {
    cells: OutputArray<P, CELL_COUNT>,
    segments: OutputArray<P, SEGMENT_COUNT>,
}

impl<P: OutputPin> Led4<P> {
    #[must_use]
    pub const fn new(cells: OutputArray<P, CELL_COUNT>, segments: OutputArray<P, SEGMENT_COUNT>) -> Self {
        Self { cells, segments }
    }

    /// Light one digit with the frame's segments, leaving every other digit dark.
    ///
    /// Anodes are dropped before the segment lines change so the previous digit never flashes
    /// the new pattern.
    pub fn show(&mut self, frame: Frame) -> Result<()> {
        self.cells.set_all(PinState::Low)?;
        self.segments.set_from_bits(frame.bits)?;
        self.cells.set_state_at_index(frame.position, PinState::High)
    }

    /// Turn every digit and segment off.
    pub fn blank(&mut self) -> Result<()> {
        self.cells.set_all(PinState::Low)?;
        self.segments.set_all(PinState::Low)
    }

    #[cfg(test)]
    const fn banks(&self) -> (&OutputArray<P, CELL_COUNT>, &OutputArray<P, SEGMENT_COUNT>) {
        (&self.cells, &self.segments)
    }
}

#[cfg(not(feature = "host"))]
mod device {
    use defmt::info;
    use embassy_futures::select::{Either, select};
    use embassy_rp::gpio::Output;
    use embassy_time::Ticker;

    use super::Led4;
    use crate::Result;
    use crate::constants::MULTIPLEX_TICK;
    use crate::multiplexer::Multiplexer;
    use crate::shutdown::ShutdownListener;
    use crate::wall_clock::WallClock;

    /// Multiplex the current local time onto the display until shutdown.
    #[embassy_executor::task]
    pub async fn display_task(
        mut led4: Led4<Output<'static>>,
        clock: &'static WallClock,
        mut shutdown: ShutdownListener<'static>,
    ) {
        if let Err(err) = run_display(&mut led4, clock, &mut shutdown).await {
            core::panic!("{err}");
        }
    }

    async fn run_display(
        led4: &mut Led4<Output<'static>>,
        clock: &WallClock,
        shutdown: &mut ShutdownListener<'static>,
    ) -> Result<()> {
        info!("Display multiplexing every {} ms", MULTIPLEX_TICK.as_millis());
        let mut multiplexer = Multiplexer::new();
        let mut text = clock.text_now();
        let mut ticker = Ticker::every(MULTIPLEX_TICK);
        loop {
            // Re-read the clock once per sweep so all four digits come from one instant.
            if multiplexer.next_position() == 0 {
                text = clock.text_now();
            }
            let frame = multiplexer.step(&text);
            #[cfg(feature = "display-trace")]
            defmt::trace!("Display frame {}", frame);
            led4.show(frame)?;

            if let Either::Second(()) = select(ticker.next(), shutdown.wait()).await {
                led4.blank()?;
                info!("Display blanked for shutdown");
                return Ok(());
            }
        }
    }
}

#[cfg(not(feature = "host"))]
pub use device::display_task;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_array::fake::{FakePin, levels};

    fn led4() -> Led4<FakePin> {
        Led4::new(
            OutputArray::new(core::array::from_fn(|_| FakePin::default())),
            OutputArray::new(core::array::from_fn(|_| FakePin::default())),
        )
    }

    #[test]
    fn show_lights_exactly_one_digit() {
        let mut display = led4();
        display.show(Frame { position: 0, bits: 0x06 }).unwrap();
        display.show(Frame { position: 2, bits: 0x3F }).unwrap();

        let (cells, segments) = display.banks();
        assert_eq!(levels(cells.outputs()), [false, false, true, false]);
        assert_eq!(
            levels(segments.outputs()),
            [true, true, true, true, true, true, false]
        );
    }

    #[test]
    fn blank_turns_everything_off() {
        let mut display = led4();
        display.show(Frame { position: 3, bits: 0x7F }).unwrap();
        display.blank().unwrap();

        let (cells, segments) = display.banks();
        assert_eq!(levels(cells.outputs()), [false; 4]);
        assert_eq!(levels(segments.outputs()), [false; 7]);
    }
}
