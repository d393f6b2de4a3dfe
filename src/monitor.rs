//! Pack-level measurement cycle
//!
//! A cycle runs three passes over all devices:
//!
//! 1. EVEN balancing, temperatures taken from the odd cells (not discharging)
//! 2. ODD balancing, temperatures taken from the even cells
//! 3. no balancing, voltages taken from every cell
//!
//! Balancing is disabled again when the cycle ends, whatever the outcome. Any
//! failure puts the pack into AFE fail mode, which only [`BatteryMonitor::recover`]
//! leaves.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::command::ConversionMode;
use crate::config::{AdcMode, BalancingMode, ConfigRegister};
use crate::device::AfeDevice;
use crate::readings::{CellCodes, PackState, PackStatus};
use crate::sequencer::{FaultLog, PassFault, Sequencer, SequencerState};
use crate::temperature::voltage_to_temperature;
use crate::transport::Transport;
use crate::{Error, CELLS_PER_DEVICE};

/// Timing, retry and register settings for the measurement cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Wait after the wake frame before confirming the device answers
    pub wake_us: u32,
    /// Wait after waking the whole pack at the start of a cycle
    pub wake_settle_ms: u32,
    /// Wait after switching balancing before starting a conversion
    pub balance_settle_ms: u32,
    /// Longest time to poll for a finished conversion
    pub adc_timeout_us: u32,
    /// Delay between two PLADC polls
    pub poll_interval_us: u32,
    /// Extra READ_CELLS attempts after the first one fails
    pub read_retries: u8,
    /// ADCV speed
    pub conversion_mode: ConversionMode,
    /// Let discharge switches stay closed while converting
    pub discharge_permitted: bool,
    /// ADCOPT setting written to every device
    pub adc_mode: AdcMode,
    /// Under-voltage comparator threshold, `None` leaves it at zero
    pub undervoltage_uv: Option<u32>,
    /// Over-voltage comparator threshold, `None` leaves it at zero
    pub overvoltage_uv: Option<u32>,
    /// Discharge timeout nibble, 0 disables the timer
    pub discharge_timeout: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            wake_us: 400,
            wake_settle_ms: 1,
            balance_settle_ms: 10,
            adc_timeout_us: 5_000,
            poll_interval_us: 100,
            read_retries: 2,
            conversion_mode: ConversionMode::Normal,
            discharge_permitted: true,
            adc_mode: AdcMode::Standard,
            undervoltage_uv: None,
            overvoltage_uv: None,
            discharge_timeout: 0,
        }
    }
}

impl MonitorConfig {
    /// Sets the ADC poll timeout
    pub fn with_adc_timeout_us(mut self, timeout: u32) -> Self {
        self.adc_timeout_us = timeout;
        self
    }

    /// Sets the PLADC poll interval
    pub fn with_poll_interval_us(mut self, interval: u32) -> Self {
        self.poll_interval_us = interval;
        self
    }

    /// Sets how many times a failed cell read is repeated
    pub fn with_read_retries(mut self, retries: u8) -> Self {
        self.read_retries = retries;
        self
    }

    /// Sets the settle delay after changing balancing
    pub fn with_balance_settle_ms(mut self, ms: u32) -> Self {
        self.balance_settle_ms = ms;
        self
    }

    /// Sets the ADCV speed and ADCOPT
    pub fn with_adc(mut self, mode: AdcMode, conversion: ConversionMode) -> Self {
        self.adc_mode = mode;
        self.conversion_mode = conversion;
        self
    }

    /// Sets the cell comparator thresholds
    pub fn with_thresholds_uv(mut self, undervoltage: u32, overvoltage: u32) -> Self {
        self.undervoltage_uv = Some(undervoltage);
        self.overvoltage_uv = Some(overvoltage);
        self
    }

    /// Sets the discharge timeout nibble
    pub fn with_discharge_timeout(mut self, dcto: u8) -> Self {
        self.discharge_timeout = dcto;
        self
    }

    /// Configuration image every device starts from, balancing off
    pub fn register_image(&self) -> ConfigRegister {
        let mut image = ConfigRegister::default();
        image.set_adc_mode(self.adc_mode);
        if let Some(uv) = self.undervoltage_uv {
            image.set_undervoltage_uv(uv);
        }
        if let Some(uv) = self.overvoltage_uv {
            image.set_overvoltage_uv(uv);
        }
        image.set_discharge_timeout(self.discharge_timeout);
        image.apply_balancing(BalancingMode::None);
        image
    }
}

/// Owner of every AFE in the pack and of the published status.
///
/// This is the only writer of device state; telemetry reads through
/// [`BatteryMonitor::status`] or takes a copy with [`BatteryMonitor::snapshot`].
pub struct BatteryMonitor<T, D, const N: usize> {
    devices: [AfeDevice<T>; N],
    delay: D,
    config: MonitorConfig,
    sequencer: Sequencer,
    status: PackStatus<N>,
    faults: FaultLog<N>,
}

impl<T, D, const N: usize> BatteryMonitor<T, D, N>
where
    T: Transport,
    D: DelayMs<u32> + DelayUs<u32>,
{
    /// Takes ownership of the devices and loads the configured register image
    /// into each. Nothing is sent until [`BatteryMonitor::init`].
    pub fn new(mut devices: [AfeDevice<T>; N], delay: D, config: MonitorConfig) -> Self {
        let image = config.register_image();
        for device in devices.iter_mut() {
            *device.config_mut() = image;
        }

        BatteryMonitor {
            devices,
            delay,
            config,
            sequencer: Sequencer::new(config),
            status: PackStatus::default(),
            faults: FaultLog::new(),
        }
    }

    /// Wakes every device and writes its configuration
    pub fn init(&mut self) -> Result<(), Error> {
        self.reinitialize()
    }

    /// Runs one full three-pass measurement cycle
    pub fn run_cycle(&mut self) -> Result<(), Error> {
        self.faults.clear();

        if self.status.is_fail_mode() {
            self.disable_all().ok();
            return Err(Error::FailMode);
        }

        if let Some(index) = self.devices.iter().position(|d| d.is_failed()) {
            log::warn!("AFE {} already failed before cycle", index);
            self.enter_fail_mode(Error::FailMode);
            return Err(Error::FailMode);
        }

        // Fail mode entry disables balancing on every device
        if let Err(e) = self.measure() {
            self.enter_fail_mode(e);
            return Err(e);
        }

        // Balancing never stays on after a cycle
        if let Err(e) = self.disable_all() {
            self.enter_fail_mode(e);
            return Err(e);
        }

        if let Some(index) = self.devices.iter().position(|d| d.is_failed()) {
            log::warn!("AFE {} failed during an otherwise complete cycle", index);
            self.enter_fail_mode(Error::FailMode);
            return Err(Error::FailMode);
        }

        self.status.completed_cycles = self.status.completed_cycles.wrapping_add(1);
        Ok(())
    }

    /// Leaves AFE fail mode by re-initialising every device from scratch:
    /// fail flags cleared, configuration image reset, wake, write and verify.
    /// The pack stays in fail mode unless every device passes.
    pub fn recover(&mut self) -> Result<(), Error> {
        log::info!("AFE recovery requested");
        match self.reinitialize() {
            Ok(()) => {
                log::info!("AFE recovery complete");
                Ok(())
            }
            Err(e) => {
                log::error!("AFE recovery failed: {}", e);
                Err(e)
            }
        }
    }

    /// Published measurement state
    pub fn status(&self) -> &PackStatus<N> {
        &self.status
    }

    /// Copy of the published state
    pub fn snapshot(&self) -> PackStatus<N> {
        self.status
    }

    /// Aggregate pack state
    pub fn state(&self) -> PackState {
        self.status.state
    }

    /// Faults recorded by the last cycle or recovery
    pub fn faults(&self) -> &[PassFault] {
        &self.faults
    }

    /// Where the sequencer last stopped
    pub fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state()
    }

    /// The devices, for inspection
    pub fn devices(&self) -> &[AfeDevice<T>; N] {
        &self.devices
    }

    /// Gives back the devices and delay
    pub fn release(self) -> ([AfeDevice<T>; N], D) {
        (self.devices, self.delay)
    }

    fn measure(&mut self) -> Result<(), Error> {
        self.sequencer
            .wake_all(&mut self.devices, &mut self.delay, &mut self.faults)?;
        self.delay.delay_ms(self.config.wake_settle_ms);

        for mode in [BalancingMode::Even, BalancingMode::Odd].iter() {
            let codes = self.sequencer.run_pass(
                &mut self.devices,
                *mode,
                &mut self.delay,
                &mut self.faults,
            )?;
            self.publish_temperatures(&codes, *mode);
        }

        let codes = self.sequencer.run_pass(
            &mut self.devices,
            BalancingMode::None,
            &mut self.delay,
            &mut self.faults,
        )?;
        self.publish_voltages(&codes);

        Ok(())
    }

    // Only channels that were not discharging during the pass
    fn publish_temperatures(&mut self, codes: &[CellCodes; N], mode: BalancingMode) {
        for (cells, codes) in self.status.cells.iter_mut().zip(codes.iter()) {
            for index in 0..CELLS_PER_DEVICE {
                if !mode.discharges(index) {
                    cells[index].temperature = voltage_to_temperature(codes.volts(index));
                }
            }
        }
    }

    fn publish_voltages(&mut self, codes: &[CellCodes; N]) {
        for (cells, codes) in self.status.cells.iter_mut().zip(codes.iter()) {
            for (index, cell) in cells.iter_mut().enumerate() {
                cell.voltage = codes.volts(index);
            }
        }
    }

    fn enter_fail_mode(&mut self, cause: Error) {
        if !self.status.is_fail_mode() {
            log::error!("entering AFE fail mode: {}", cause);
        }
        self.status.state = PackState::AfeFailMode;
        self.disable_all().ok();
    }

    // Best effort on every device, even failed ones
    fn disable_all(&mut self) -> Result<(), Error> {
        let mut first_error = None;
        for (index, device) in self.devices.iter_mut().enumerate() {
            if let Err(e) = device.force_disable_balancing() {
                log::warn!("AFE {} could not disable balancing: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn reinitialize(&mut self) -> Result<(), Error> {
        self.faults.clear();
        let image = self.config.register_image();
        for device in self.devices.iter_mut() {
            device.clear_fail();
            *device.config_mut() = image;
        }

        let result = match self
            .sequencer
            .wake_all(&mut self.devices, &mut self.delay, &mut self.faults)
        {
            Ok(()) => self.disable_all(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.status.state = PackState::Normal;
                Ok(())
            }
            Err(e) => {
                self.enter_fail_mode(e);
                Err(e)
            }
        }
    }
}
