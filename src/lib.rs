//! LTC6811 battery cell monitor driver
//!
//! Drives one or more LTC6811 analog front-ends over SPI, measures cell
//! voltages and thermistor temperatures while alternating cell balancing, and
//! reports a pack-wide fail state to whatever safety logic sits above it.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

use failure::Fail;

pub mod codec;
pub mod command;
pub mod config;
pub mod device;
pub mod monitor;
pub mod pec;
pub mod readings;
pub mod sequencer;
pub mod temperature;
pub mod transport;

pub use config::{AdcMode, BalancingMode, ConfigRegister};
pub use device::{AfeDevice, DeviceId};
pub use monitor::{BatteryMonitor, MonitorConfig};
pub use readings::{CellCodes, CellReading, PackState, PackStatus};
pub use transport::{SpiTransport, Transport};

/// Number of series cells a single LTC6811 measures
pub const CELLS_PER_DEVICE: usize = 12;

/// Errors returned if a driver operation fails
#[derive(Fail, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Response PEC did not match its payload
    #[fail(display = "PEC mismatch on response frame")]
    PecMismatch,
    /// Configuration read back differs from what was written
    #[fail(display = "Configuration read-back does not match written image")]
    ConfigVerifyFailed,
    /// ADC conversion did not complete within the poll timeout
    #[fail(display = "ADC conversion timed out")]
    AdcTimeout,
    /// Underlying SPI peripheral or chip-select pin reported a failure
    #[fail(display = "SPI transport error")]
    SpiTransport,
    /// A cell register still held the cleared pattern after a conversion
    #[fail(display = "Cell register not updated by conversion")]
    CellsCleared,
    /// Balancing mode requested that the device is already in
    #[fail(display = "Balancing mode already active")]
    BalancingRepeated,
    /// Pack is in AFE fail mode, measurement refused until recovery
    #[fail(display = "Pack is in AFE fail mode")]
    FailMode,
}
