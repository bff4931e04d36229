use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use crate::adapter::Error;

/// Active-low chip-select line.
///
/// The engine keeps the chip selected across several interrupt and completion
/// callbacks, so selection is explicit here. The blocking start sequence uses
/// the scoped [`Selected`] guard instead.
pub(crate) struct ChipSelect<Pin>
    where Pin: OutputPin,
{
    pin: Pin,
    selected: bool,
}

impl<Pin> ChipSelect<Pin>
    where Pin: OutputPin,
{
    /// Construct a new CS pin controller and set it high (unselected)
    pub(crate) fn new(mut pin: Pin) -> Self {
        pin.set_high().ok();
        Self {
            pin,
            selected: false,
        }
    }

    pub(crate) fn assert(&mut self) -> Result<(), Error> {
        self.pin.set_low().map_err(|_| Error::Pin)?;
        self.selected = true;
        Ok(())
    }

    pub(crate) fn deassert(&mut self) -> Result<(), Error> {
        self.pin.set_high().map_err(|_| Error::Pin)?;
        self.selected = false;
        Ok(())
    }

    pub(crate) fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn select<'cs, Delay>(&'cs mut self, delay: &'cs mut Delay) -> Result<Selected<'cs, Pin, Delay>, Error>
        where Delay: DelayUs<u32>,
    {
        Selected::new(self, delay)
    }
}

pub(crate) struct Selected<'cs, Pin, Delay>
    where Pin: OutputPin,
          Delay: DelayUs<u32>,
{
    cs: &'cs mut ChipSelect<Pin>,
    pub(crate) delay: &'cs mut Delay,
}

impl<'cs, Pin, Delay> Selected<'cs, Pin, Delay>
    where Pin: OutputPin,
          Delay: DelayUs<u32>,
{
    fn new(cs: &'cs mut ChipSelect<Pin>, delay: &'cs mut Delay) -> Result<Self, Error> {
        cs.assert()?;
        Ok(Self {
            cs,
            delay,
        })
    }
}

impl<Pin, Delay> Drop for Selected<'_, Pin, Delay>
    where Pin: OutputPin,
          Delay: DelayUs<u32>,
{
    fn drop(&mut self) {
        self.cs.deassert().ok();
    }
}
