//! One LTC6811 and everything the driver remembers about it

use embedded_hal::blocking::delay::DelayUs;

use crate::command::{self, CellGroup, Command, ConversionMode, RESPONSE_LEN};
use crate::config::{BalancingMode, ConfigRegister};
use crate::readings::CellCodes;
use crate::transport::Transport;
use crate::Error;

/// Where a device sits on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId {
    /// SPI channel the device is wired to
    pub channel: u8,
    /// Chip select line on that channel
    pub chip_select: u8,
}

/// Driver state for a single AFE.
///
/// The fail flag is sticky: it is set by transport errors, by a failed
/// configuration verify, by a failed wake confirmation, and by the sequencer
/// once its retry budget is spent. Only [`AfeDevice::clear_fail`] resets it.
pub struct AfeDevice<T> {
    id: DeviceId,
    transport: T,
    config: ConfigRegister,
    balancing: BalancingMode,
    failed: bool,
    codes: CellCodes,
}

impl<T: Transport> AfeDevice<T> {
    /// New device with the default configuration image and no balancing
    pub fn new(id: DeviceId, transport: T) -> Self {
        AfeDevice {
            id,
            transport,
            config: ConfigRegister::default(),
            balancing: BalancingMode::None,
            failed: false,
            codes: CellCodes::default(),
        }
    }

    /// Board position
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Local configuration image (what was last written or will be written)
    pub fn config(&self) -> &ConfigRegister {
        &self.config
    }

    /// Mutable configuration image, takes effect on [`AfeDevice::commit`]
    pub fn config_mut(&mut self) -> &mut ConfigRegister {
        &mut self.config
    }

    /// Balancing mode the device was last verified to be in
    pub fn balancing_mode(&self) -> BalancingMode {
        self.balancing
    }

    /// Sticky fail flag
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Clears the fail flag, used by pack recovery only
    pub fn clear_fail(&mut self) {
        self.failed = false;
    }

    /// Codes from the last successful cell read
    pub fn codes(&self) -> &CellCodes {
        &self.codes
    }

    /// Sets the fail flag and hands the error back
    pub fn mark_failed(&mut self, error: Error) -> Error {
        if !self.failed {
            log::warn!("AFE {:?} marked failed: {}", self.id, error);
        }
        self.failed = true;
        error
    }

    /// Gives back the transport
    pub fn release(self) -> T {
        self.transport
    }

    /// Sends a 2-byte zero frame to wake the device, waits `wake_us`, then
    /// confirms it answers a configuration read with a valid PEC
    pub fn wake<D: DelayUs<u32>>(&mut self, delay: &mut D, wake_us: u32) -> Result<(), Error> {
        self.raw_transfer(&[0x00, 0x00])?;
        delay.delay_us(wake_us);

        match self.read_register(Command::ReadConfig) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.mark_failed(e)),
        }
    }

    /// Writes the configuration image and verifies it byte for byte
    pub fn commit(&mut self) -> Result<(), Error> {
        self.write_config().map(|_| ())
    }

    /// Writes the image and returns what the device reported back, which is
    /// guaranteed equal to the image on success
    fn write_config(&mut self) -> Result<ConfigRegister, Error> {
        let written = self.config.to_bytes();
        let frame = command::build_write_frame(Command::WriteConfig, &written);
        self.raw_transfer(&frame)?;

        let read_back = match self.read_register(Command::ReadConfig) {
            Ok(bytes) => bytes,
            Err(_) => return Err(self.mark_failed(Error::ConfigVerifyFailed)),
        };

        if read_back != written {
            log::debug!(
                "AFE {:?} config read-back {:02x?}, expected {:02x?}",
                self.id,
                read_back,
                written
            );
            return Err(self.mark_failed(Error::ConfigVerifyFailed));
        }

        Ok(ConfigRegister::from_bytes(read_back))
    }

    /// Discharges cells 2, 4, 6, 8, 10 and 12
    pub fn activate_even_balancing(&mut self) -> Result<(), Error> {
        self.set_balancing(BalancingMode::Even)
    }

    /// Discharges cells 1, 3, 5, 7, 9 and 11
    pub fn activate_odd_balancing(&mut self) -> Result<(), Error> {
        self.set_balancing(BalancingMode::Odd)
    }

    /// Opens every discharge switch. Always allowed, also when already disabled.
    pub fn disable_balancing(&mut self) -> Result<(), Error> {
        self.set_balancing(BalancingMode::None)
    }

    /// Switches to `mode` through a full write and read-back.
    ///
    /// Re-requesting the EVEN or ODD mode the device is already in is refused
    /// as a fault.
    pub fn set_balancing(&mut self, mode: BalancingMode) -> Result<(), Error> {
        if mode != BalancingMode::None && mode == self.balancing {
            return Err(self.mark_failed(Error::BalancingRepeated));
        }

        self.config.apply_balancing(mode);
        let read_back = self.write_config()?;

        if read_back.discharge_bits() != mode.discharge_mask() {
            return Err(self.mark_failed(Error::ConfigVerifyFailed));
        }

        self.balancing = mode;
        Ok(())
    }

    /// Disables balancing regardless of the fail flag and forgets the previous
    /// mode even if the write could not be verified
    pub fn force_disable_balancing(&mut self) -> Result<(), Error> {
        let result = self.set_balancing(BalancingMode::None);
        self.balancing = BalancingMode::None;
        result
    }

    /// Resets all cell registers to the cleared pattern
    pub fn clear_cells(&mut self) -> Result<(), Error> {
        self.send(Command::ClearCells)
    }

    /// Starts an all-cell conversion
    pub fn start_conversion(
        &mut self,
        mode: ConversionMode,
        discharge_permitted: bool,
    ) -> Result<(), Error> {
        self.send(Command::StartCellConversion {
            mode,
            discharge_permitted,
        })
    }

    /// Checks whether the last conversion finished
    pub fn poll_conversion(&mut self) -> nb::Result<(), Error> {
        let header = command::build_command(Command::PollAdc);
        let mut status = [0u8; 1];
        if let Err(e) = self.transport.transfer_receive(&header, &mut status) {
            return Err(nb::Error::Other(self.mark_failed(e)));
        }

        if status[0] & 0x01 != 0 {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Reads all four cell register groups. Any group failing its PEC fails
    /// the whole read and leaves the stored codes untouched.
    pub fn read_cells(&mut self) -> Result<CellCodes, Error> {
        let mut codes = self.codes;
        for group in CellGroup::ALL.iter() {
            let payload = self.read_register(Command::ReadCells(*group))?;
            codes.set_group(*group, &payload);
        }

        self.codes = codes;
        Ok(codes)
    }

    /// Sends a command header alone
    fn send(&mut self, command: Command) -> Result<(), Error> {
        self.raw_transfer(&command::build_command(command))
    }

    /// Reads one register group and checks its PEC. A PEC mismatch is
    /// returned without touching the fail flag, transport errors set it.
    fn read_register(&mut self, command: Command) -> Result<[u8; 6], Error> {
        let header = command::build_command(command);
        let mut response = [0u8; RESPONSE_LEN];
        if let Err(e) = self.transport.transfer_receive(&header, &mut response) {
            return Err(self.mark_failed(e));
        }

        command::validate_response(&response)
    }

    fn raw_transfer(&mut self, tx: &[u8]) -> Result<(), Error> {
        match self.transport.transfer(tx) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.mark_failed(e)),
        }
    }
}
