use embedded_hal::digital::v2::InputPin;

/// Edge interrupt control for the chip's active-low IRQ line.
///
/// embedded-hal only covers reading the level; arming the falling-edge
/// interrupt is target specific.
pub trait InterruptControl {
    fn enable_interrupt(&mut self);
    fn disable_interrupt(&mut self);
}

pub(crate) struct Irq<Pin>
    where Pin: InputPin + InterruptControl
{
    pin: Pin,
    enabled: bool,
}

impl<Pin> Irq<Pin>
    where Pin: InputPin + InterruptControl
{
    pub(crate) fn new(mut pin: Pin) -> Self {
        pin.disable_interrupt();
        Self {
            pin,
            enabled: false,
        }
    }

    /// The chip pulls the line low when it is ready or has data.
    pub(crate) fn is_asserted(&self) -> bool {
        self.pin.is_low().unwrap_or(false)
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
        self.pin.enable_interrupt();
    }

    pub(crate) fn disable(&mut self) {
        self.enabled = false;
        self.pin.disable_interrupt();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }
}
