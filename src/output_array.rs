use embedded_hal::digital::{OutputPin, PinState};

use crate::Result;
use crate::error::Error::{CannotSetOutputState, IndexOutOfBounds};

/// Fixed-size bank of output pins driven together, such as the display's anodes or cathodes.
///
/// Generic over [`OutputPin`] so the same driving code runs against `embassy_rp` GPIOs on the
/// clock and against recording fakes in tests.
pub struct OutputArray<P, const N: usize>([P; N]);

impl<P: OutputPin, const N: usize> OutputArray<P, N> {
    pub const fn new(outputs: [P; N]) -> Self {
        Self(outputs)
    }

    #[inline]
    pub fn set_all(&mut self, state: PinState) -> Result<()> {
        for output in &mut self.0 {
            output.set_state(state).map_err(|_| CannotSetOutputState)?;
        }
        Ok(())
    }

    #[inline]
    pub fn set_state_at_index(&mut self, index: u8, state: PinState) -> Result<()> {
        self.0
            .get_mut(usize::from(index))
            .ok_or(IndexOutOfBounds)?
            .set_state(state)
            .map_err(|_| CannotSetOutputState)
    }

    /// Drive output `n` from bit `n` of `bits`. Bits beyond `N` are ignored.
    #[inline]
    pub fn set_from_bits(&mut self, bits: u8) -> Result<()> {
        let mut remaining = bits;
        for output in &mut self.0 {
            output
                .set_state(PinState::from(remaining & 1 == 1))
                .map_err(|_| CannotSetOutputState)?;
            remaining >>= 1;
        }
        Ok(())
    }

    #[must_use]
    pub const fn outputs(&self) -> &[P; N] {
        &self.0
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakePin, levels};
    use super::*;

    #[test]
    fn bits_drive_low_pins_first() {
        let mut array = OutputArray::new(core::array::from_fn::<FakePin, 7, _>(|_| FakePin::default()));
        array.set_from_bits(0b1010_0101).unwrap();
        assert_eq!(
            levels(array.outputs()),
            [true, false, true, false, false, true, false]
        );
    }

    #[test]
    fn index_past_end_is_an_error() {
        let mut array = OutputArray::new([FakePin::default(), FakePin::default()]);
        assert!(matches!(
            array.set_state_at_index(2, PinState::High),
            Err(IndexOutOfBounds)
        ));
    }
}
