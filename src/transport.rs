//! SPI transport with chip-select bracketing
//!
//! `transfer` and `transfer_receive` own the chip select for the duration of
//! one frame. Callers that need CS held across several frames use `select`,
//! `exchange` and `deselect` themselves and are responsible for releasing it.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::Error;

/// Busy-wait iterations between a chip-select edge and the first/last clock
pub const CS_SETTLE_CYCLES: u32 = 300;

/// Byte clocked out while receiving
const FILL_BYTE: u8 = 0xFF;

/// Raw byte exchange with one AFE
pub trait Transport {
    /// Drives chip select low
    fn select(&mut self) -> Result<(), Error>;

    /// Releases chip select
    fn deselect(&mut self) -> Result<(), Error>;

    /// Clocks `tx` out then clocks `rx.len()` bytes in, without touching chip select
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error>;

    /// Sends `tx` in its own chip-select frame
    fn transfer(&mut self, tx: &[u8]) -> Result<(), Error> {
        self.transfer_receive(tx, &mut [])
    }

    /// Sends `tx` and receives `rx.len()` bytes in one chip-select frame
    fn transfer_receive(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error> {
        self.select()?;
        let result = self.exchange(tx, rx);
        // CS is released even if the exchange failed
        let released = self.deselect();
        result.and(released)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn select(&mut self) -> Result<(), Error> {
        (**self).select()
    }

    fn deselect(&mut self) -> Result<(), Error> {
        (**self).deselect()
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error> {
        (**self).exchange(tx, rx)
    }
}

/// Transport over an embedded-hal blocking SPI bus and an active-low chip select pin
pub struct SpiTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> SpiTransport<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    /// Wraps a bus and chip select, leaving the chip deselected
    pub fn new(spi: SPI, mut cs: CS) -> Self {
        cs.set_high().ok();
        SpiTransport { spi, cs }
    }

    /// Gives back the bus and pin
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Transport for SpiTransport<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    fn select(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::SpiTransport)?;
        settle();
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Error> {
        settle();
        self.cs.set_high().map_err(|_| Error::SpiTransport)
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error> {
        if !tx.is_empty() {
            self.spi.write(tx).map_err(|_| Error::SpiTransport)?;
        }

        if !rx.is_empty() {
            for byte in rx.iter_mut() {
                *byte = FILL_BYTE;
            }
            self.spi.transfer(rx).map_err(|_| Error::SpiTransport)?;
        }

        Ok(())
    }
}

fn settle() {
    for _ in 0..CS_SETTLE_CYCLES {
        core::hint::spin_loop();
    }
}
