use embedded_hal::blocking::spi::Transfer;

/// Half-duplex SPI transaction executor.
///
/// `transfer` clocks out the bytes in `buffer` and replaces them with the bytes
/// clocked in. Returning `Err(nb::Error::WouldBlock)` means the transaction was
/// started but is still in flight: the host must then call
/// `Adapter::on_transport_complete` once it finishes, after placing the received
/// bytes into `Adapter::transfer_window`.
pub trait Transport {
    type Error: core::fmt::Debug;

    fn transfer(&mut self, buffer: &mut [u8]) -> nb::Result<(), Self::Error>;
}

/// Runs every transaction to completion on a blocking embedded-hal bus.
pub struct Blocking<Spi>
where
    Spi: Transfer<u8>,
{
    spi: Spi,
}

impl<Spi> Blocking<Spi>
where
    Spi: Transfer<u8>,
{
    pub fn new(spi: Spi) -> Self {
        Self { spi }
    }

    pub fn release(self) -> Spi {
        self.spi
    }
}

impl<Spi> Transport for Blocking<Spi>
where
    Spi: Transfer<u8>,
    Spi::Error: core::fmt::Debug,
{
    type Error = Spi::Error;

    fn transfer(&mut self, buffer: &mut [u8]) -> nb::Result<(), Self::Error> {
        self.spi.transfer(buffer).map_err(nb::Error::Other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Transfer<u8> for Echo {
        type Error = ();

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            for w in words.iter_mut() {
                *w = !*w;
            }
            Ok(words)
        }
    }

    #[test]
    fn blocking_completes_in_place() {
        let mut bus = Blocking::new(Echo);
        let mut buffer = [0x00u8, 0xFF];
        assert!(bus.transfer(&mut buffer).is_ok());
        assert_eq!(buffer, [0xFF, 0x00]);
    }
}
