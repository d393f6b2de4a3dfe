//! Simulated LTC6811 behind embedded-hal SPI and chip-select mocks

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use ltc6811_monitor::command::{CellGroup, Command};
use ltc6811_monitor::pec;
use ltc6811_monitor::{AfeDevice, DeviceId, SpiTransport};

pub type SimTransport = SpiTransport<SimSpi, SimCs>;

#[derive(Debug)]
pub struct SimError;

pub struct SimState {
    pub cs_low: bool,
    frame: Vec<u8>,
    response: Vec<u8>,

    pub config: [u8; 6],
    pub cell_codes: [u16; 12],
    /// Codes the next conversions produce, falls back to `adc_codes` when empty
    pub adc_script: VecDeque<[u16; 12]>,
    pub adc_codes: [u16; 12],
    pub polls_per_conversion: u32,
    polls_remaining: u32,
    converting: bool,

    /// Cell register reads still to answer with a broken PEC
    pub corrupt_cell_reads: usize,
    /// Config register reads still to answer with a broken PEC
    pub corrupt_config_reads: usize,
    /// XORed into every config read-back
    pub config_readback_xor: [u8; 6],
    /// From this conversion on (1-based), every cell read has a broken PEC
    pub corrupt_cells_from_conversion: Option<usize>,
    /// Cell register reads still to fail at the SPI peripheral
    pub spi_fail_cell_reads: usize,
    pub adc_stuck: bool,
    pub spi_error: bool,

    pub commands: HashMap<u16, usize>,
    pub wakes: usize,
    /// DCC bits of every accepted config write
    pub dcc_writes: Vec<u16>,
    /// DCC bits in force when each conversion started
    pub dcc_at_conversion: Vec<u16>,
    pub last_write_frame: Vec<u8>,
}

impl SimState {
    fn new() -> Self {
        SimState {
            cs_low: false,
            frame: Vec::new(),
            response: Vec::new(),
            config: [0u8; 6],
            cell_codes: [0xFFFF; 12],
            adc_script: VecDeque::new(),
            adc_codes: [37_000; 12],
            polls_per_conversion: 2,
            polls_remaining: 0,
            converting: false,
            corrupt_cell_reads: 0,
            corrupt_config_reads: 0,
            corrupt_cells_from_conversion: None,
            spi_fail_cell_reads: 0,
            config_readback_xor: [0u8; 6],
            adc_stuck: false,
            spi_error: false,
            commands: HashMap::new(),
            wakes: 0,
            dcc_writes: Vec::new(),
            dcc_at_conversion: Vec::new(),
            last_write_frame: Vec::new(),
        }
    }

    pub fn count(&self, command: Command) -> usize {
        self.commands.get(&command.value()).copied().unwrap_or(0)
    }

    pub fn dcc(&self) -> u16 {
        u16::from(self.config[4]) | (u16::from(self.config[5] & 0x0F) << 8)
    }

    fn clock(&mut self, mosi: u8) -> u8 {
        if !self.cs_low {
            return 0xFF;
        }

        let position = self.frame.len();
        self.frame.push(mosi);
        if position == 3 {
            self.decode_header();
        }

        if position >= 4 {
            self.response.get(position - 4).copied().unwrap_or(0xFF)
        } else {
            0xFF
        }
    }

    fn decode_header(&mut self) {
        if !pec::verify(&self.frame[..4]) {
            return;
        }

        let opcode = BigEndian::read_u16(&self.frame[..2]);
        *self.commands.entry(opcode).or_insert(0) += 1;

        match Command::from_value(opcode) {
            Some(Command::ReadConfig) => {
                let mut payload = self.config;
                for (byte, xor) in payload.iter_mut().zip(self.config_readback_xor.iter()) {
                    *byte ^= xor;
                }
                let corrupt = take(&mut self.corrupt_config_reads);
                self.response = with_pec(&payload, corrupt);
            }
            Some(Command::ReadCells(group)) => {
                let first = group.first_cell();
                let mut payload = [0u8; 6];
                for i in 0..3 {
                    LittleEndian::write_u16(&mut payload[i * 2..i * 2 + 2], self.cell_codes[first + i]);
                }
                let corrupt = take(&mut self.corrupt_cell_reads);
                self.response = with_pec(&payload, corrupt);
            }
            Some(Command::StartCellConversion { .. }) => {
                self.cell_codes = self.adc_script.pop_front().unwrap_or(self.adc_codes);
                self.dcc_at_conversion.push(self.dcc());
                if self.corrupt_cells_from_conversion == Some(self.dcc_at_conversion.len()) {
                    self.corrupt_cell_reads = usize::MAX;
                }
                self.converting = true;
                self.polls_remaining = self.polls_per_conversion;
            }
            Some(Command::PollAdc) => {
                let done = if !self.converting {
                    true
                } else if self.adc_stuck {
                    false
                } else if self.polls_remaining == 0 {
                    self.converting = false;
                    true
                } else {
                    self.polls_remaining -= 1;
                    false
                };
                self.response = vec![if done { 0xFF } else { 0x00 }];
            }
            Some(Command::ClearCells) => self.cell_codes = [0xFFFF; 12],
            _ => {}
        }
    }

    // Response phase of a cell register read
    fn reading_cells(&self) -> bool {
        self.frame.len() >= 4
            && matches!(
                Command::from_value(BigEndian::read_u16(&self.frame[..2])),
                Some(Command::ReadCells(_))
            )
    }

    fn end_frame(&mut self) {
        if self.frame.len() == 2 && self.frame.iter().all(|b| *b == 0) {
            self.wakes += 1;
        }

        if self.frame.len() == 12
            && pec::verify(&self.frame[..4])
            && BigEndian::read_u16(&self.frame[..2]) == Command::WriteConfig.value()
            && pec::verify(&self.frame[4..])
        {
            self.config.copy_from_slice(&self.frame[4..10]);
            let dcc = self.dcc();
            self.dcc_writes.push(dcc);
            self.last_write_frame = self.frame.clone();
        }

        self.frame.clear();
        self.response.clear();
    }
}

fn take(remaining: &mut usize) -> bool {
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

fn with_pec(payload: &[u8; 6], corrupt: bool) -> Vec<u8> {
    let mut frame = payload.to_vec();
    let mut pec = pec::pec15_bytes(payload);
    if corrupt {
        pec[1] ^= 0x02;
    }
    frame.extend_from_slice(&pec);
    frame
}

pub type Sim = Rc<RefCell<SimState>>;

pub struct SimSpi {
    state: Sim,
}

impl Transfer<u8> for SimSpi {
    type Error = SimError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], SimError> {
        let mut state = self.state.borrow_mut();
        if state.spi_error {
            return Err(SimError);
        }
        if state.reading_cells() && take(&mut state.spi_fail_cell_reads) {
            return Err(SimError);
        }
        for word in words.iter_mut() {
            *word = state.clock(*word);
        }
        Ok(words)
    }
}

impl Write<u8> for SimSpi {
    type Error = SimError;

    fn write(&mut self, words: &[u8]) -> Result<(), SimError> {
        let mut state = self.state.borrow_mut();
        if state.spi_error {
            return Err(SimError);
        }
        for word in words {
            state.clock(*word);
        }
        Ok(())
    }
}

pub struct SimCs {
    state: Sim,
}

impl OutputPin for SimCs {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.cs_low = true;
        state.frame.clear();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        if state.cs_low {
            state.end_frame();
        }
        state.cs_low = false;
        Ok(())
    }
}

/// A simulated chip and a transport wired to it
pub fn sim_afe() -> (Sim, SimTransport) {
    let state = Rc::new(RefCell::new(SimState::new()));
    let spi = SimSpi {
        state: state.clone(),
    };
    let cs = SimCs {
        state: state.clone(),
    };
    (state, SpiTransport::new(spi, cs))
}

pub fn sim_device(channel: u8) -> (Sim, AfeDevice<SimTransport>) {
    let (sim, transport) = sim_afe();
    let id = DeviceId {
        channel,
        chip_select: 0,
    };
    (sim, AfeDevice::new(id, transport))
}

/// Delay that only keeps count
#[derive(Default)]
pub struct MockDelay {
    pub total_us: u64,
    pub calls: usize,
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_us += u64::from(ms) * 1_000;
        self.calls += 1;
    }
}

impl DelayUs<u32> for MockDelay {
    fn delay_us(&mut self, us: u32) {
        self.total_us += u64::from(us);
        self.calls += 1;
    }
}

/// Cell code for a voltage
pub fn code(volts: f32) -> u16 {
    (volts * 10_000.0).round() as u16
}

pub const GROUPS: [CellGroup; 4] = CellGroup::ALL;
