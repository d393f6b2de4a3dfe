//! One measurement pass across every device of the pack
//!
//! WAKE -> CONFIGURE_BALANCING -> START_CONVERSION -> WAIT_CONVERSION_DONE ->
//! READ_CELLS. Each stage runs on all devices before the next one starts, so
//! the whole pack is in the same balancing mode while it converts. Only
//! READ_CELLS is retried, and only for PEC mismatches and registers the
//! conversion left cleared. Any other failure ends the pass at that stage.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use heapless::Vec;

use crate::config::BalancingMode;
use crate::device::AfeDevice;
use crate::monitor::MonitorConfig;
use crate::readings::CellCodes;
use crate::transport::Transport;
use crate::Error;

/// Where a pass currently is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    /// No pass started yet
    Idle,
    /// Waking devices and confirming they answer
    Wake,
    /// Writing and verifying the balancing mode
    ConfigureBalancing,
    /// Clearing cell registers and issuing ADCV
    StartConversion,
    /// Polling PLADC
    WaitConversionDone,
    /// Reading the four cell register groups
    ReadCells,
    /// Repeating READ_CELLS after a failed attempt
    Retry,
    /// Pass completed on every device
    Success,
    /// Pass abandoned
    Fail,
}

/// A device that failed a pass, and at which stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PassFault {
    /// Index of the device within the pack
    pub device: usize,
    /// Stage that failed
    pub stage: SequencerState,
    /// Error the stage ended with
    pub error: Error,
}

/// Faults collected during one pass, at most one per device
pub type FaultLog<const N: usize> = Vec<PassFault, N>;

/// Runs measurement passes with the timing and retry budget of a [`MonitorConfig`]
pub struct Sequencer {
    config: MonitorConfig,
    state: SequencerState,
}

impl Sequencer {
    /// New sequencer in the idle state
    pub fn new(config: MonitorConfig) -> Self {
        Sequencer {
            config,
            state: SequencerState::Idle,
        }
    }

    /// Last state reached
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Wakes every device. Faults are appended to `faults`.
    pub fn wake_all<T, D, const N: usize>(
        &mut self,
        devices: &mut [AfeDevice<T>; N],
        delay: &mut D,
        faults: &mut FaultLog<N>,
    ) -> Result<(), Error>
    where
        T: Transport,
        D: DelayUs<u32>,
    {
        let wake_us = self.config.wake_us;
        self.stage(SequencerState::Wake, devices, faults, |device| {
            device.wake(&mut *delay, wake_us)
        })
    }

    /// Runs one full pass with `mode` balancing and returns the codes read
    /// from every device
    pub fn run_pass<T, D, const N: usize>(
        &mut self,
        devices: &mut [AfeDevice<T>; N],
        mode: BalancingMode,
        delay: &mut D,
        faults: &mut FaultLog<N>,
    ) -> Result<[CellCodes; N], Error>
    where
        T: Transport,
        D: DelayMs<u32> + DelayUs<u32>,
    {
        let config = self.config;

        self.wake_all(devices, delay, faults)?;

        self.stage(SequencerState::ConfigureBalancing, devices, faults, |device| {
            device.set_balancing(mode)
        })?;
        delay.delay_ms(config.balance_settle_ms);

        self.stage(SequencerState::StartConversion, devices, faults, |device| {
            device.clear_cells()?;
            device.start_conversion(config.conversion_mode, config.discharge_permitted)
        })?;

        self.stage(SequencerState::WaitConversionDone, devices, faults, |device| {
            wait_conversion(device, &mut *delay, &config)
        })?;

        let codes = self.read_all(devices, faults)?;

        self.state = SequencerState::Success;
        Ok(codes)
    }

    fn read_all<T: Transport, const N: usize>(
        &mut self,
        devices: &mut [AfeDevice<T>; N],
        faults: &mut FaultLog<N>,
    ) -> Result<[CellCodes; N], Error> {
        self.state = SequencerState::ReadCells;
        let mut codes = [CellCodes::default(); N];
        let mut first_error = None;

        for (index, device) in devices.iter_mut().enumerate() {
            let mut attempt = 0;
            let result = loop {
                let read = match device.read_cells() {
                    // CLRCELL ran before the conversion, so a cleared code was never converted
                    Ok(read) if read.is_cleared() => Err(Error::CellsCleared),
                    other => other,
                };
                match read {
                    Ok(read) => break Ok(read),
                    Err(e) if is_retryable(e) && attempt < self.config.read_retries => {
                        attempt += 1;
                        self.state = SequencerState::Retry;
                        log::debug!("AFE {} cell read failed ({}), retry {}", index, e, attempt);
                    }
                    Err(e) => break Err(e),
                }
            };

            match result {
                Ok(read) => codes[index] = read,
                Err(error) => {
                    record(faults, index, SequencerState::ReadCells, device.mark_failed(error));
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => {
                self.state = SequencerState::Fail;
                Err(error)
            }
            None => Ok(codes),
        }
    }

    // Runs `op` on every device, records each failure, and fails the stage if any device did
    fn stage<T, F, const N: usize>(
        &mut self,
        stage: SequencerState,
        devices: &mut [AfeDevice<T>; N],
        faults: &mut FaultLog<N>,
        mut op: F,
    ) -> Result<(), Error>
    where
        T: Transport,
        F: FnMut(&mut AfeDevice<T>) -> Result<(), Error>,
    {
        self.state = stage;
        let mut first_error = None;

        for (index, device) in devices.iter_mut().enumerate() {
            if let Err(error) = op(device) {
                record(faults, index, stage, device.mark_failed(error));
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => {
                self.state = SequencerState::Fail;
                Err(error)
            }
            None => Ok(()),
        }
    }
}

/// Polls PLADC every `poll_interval_us` until the conversion is done or
/// `adc_timeout_us` has elapsed
pub fn wait_conversion<T, D>(
    device: &mut AfeDevice<T>,
    delay: &mut D,
    config: &MonitorConfig,
) -> Result<(), Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    let step_us = config.poll_interval_us.max(1);
    let mut elapsed_us = 0;
    loop {
        match device.poll_conversion() {
            Ok(()) => return Ok(()),
            Err(nb::Error::Other(e)) => return Err(e),
            Err(nb::Error::WouldBlock) => {
                if elapsed_us >= config.adc_timeout_us {
                    return Err(Error::AdcTimeout);
                }
                delay.delay_us(step_us);
                elapsed_us += step_us;
            }
        }
    }
}

// Only data errors are retried, a transport error has already failed the device
fn is_retryable(error: Error) -> bool {
    matches!(error, Error::PecMismatch | Error::CellsCleared)
}

fn record<const N: usize>(faults: &mut FaultLog<N>, device: usize, stage: SequencerState, error: Error) {
    let fault = PassFault {
        device,
        stage,
        error,
    };
    if faults.push(fault).is_err() {
        log::warn!("fault log full, dropping {:?}", fault);
    }
}
