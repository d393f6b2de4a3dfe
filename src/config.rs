//! Configuration register group image
//!
//! Layout of the six CFGR bytes:
//!
//! | byte | bits 7..4           | bits 3..0                          |
//! |------|---------------------|------------------------------------|
//! | 0    | GPIO5..GPIO2        | GPIO1, REFON, DTEN, ADCOPT         |
//! | 1    | VUV[7:4]            | VUV[3:0]                           |
//! | 2    | VOV[3:0]            | VUV[11:8]                          |
//! | 3    | VOV[11:8]           | VOV[7:4]                           |
//! | 4    | DCC8..DCC5          | DCC4..DCC1                         |
//! | 5    | DCTO[3:0]           | DCC12..DCC9                        |

use crate::command::PAYLOAD_LEN;
use crate::CELLS_PER_DEVICE;

const REFON: u8 = 1 << 2;
const DTEN: u8 = 1 << 1;
const ADCOPT: u8 = 1 << 0;
const GPIO_SHIFT: u8 = 3;

/// All twelve discharge bits
pub const DCC_MASK: u16 = 0x0FFF;

/// Comparator step size in microvolts (16 * 100 µV)
const THRESHOLD_STEP_UV: u32 = 1_600;
const THRESHOLD_MAX: u16 = 0x0FFF;

/// ADC clock option, selects which ADCV speeds are available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcMode {
    /// ADCOPT = 0: 27 kHz, 7 kHz, 26 Hz
    Standard,
    /// ADCOPT = 1: 14 kHz, 3 kHz, 2 kHz
    Alternate,
}

/// Which half of the cells is being discharged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BalancingMode {
    /// No discharge switches closed
    None,
    /// Cells 2, 4, 6, 8, 10 and 12 discharge
    Even,
    /// Cells 1, 3, 5, 7, 9 and 11 discharge
    Odd,
}

impl BalancingMode {
    /// DCC mask for this mode, bit `n` is cell `n + 1`
    pub fn discharge_mask(self) -> u16 {
        match self {
            BalancingMode::None => 0x000,
            BalancingMode::Even => 0xAAA,
            BalancingMode::Odd => 0x555,
        }
    }

    /// Whether the cell at zero-based `index` is discharged in this mode
    pub fn discharges(self, index: usize) -> bool {
        index < CELLS_PER_DEVICE && self.discharge_mask() & (1 << index) != 0
    }
}

/// Volatile configuration register image of one LTC6811
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigRegister {
    bytes: [u8; PAYLOAD_LEN],
}

impl Default for ConfigRegister {
    /// GPIO pull-downs off, reference on, standard ADC clock, no discharge
    fn default() -> Self {
        ConfigRegister {
            bytes: [0xF8 | REFON, 0x00, 0x00, 0x00, 0x00, 0x00],
        }
    }
}

impl ConfigRegister {
    /// Image from raw register bytes
    pub fn from_bytes(bytes: [u8; PAYLOAD_LEN]) -> Self {
        ConfigRegister { bytes }
    }

    /// Raw register bytes
    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        self.bytes
    }

    /// Keeps the reference powered up between conversions
    pub fn set_reference_enable(&mut self, enable: bool) {
        set_bit(&mut self.bytes[0], REFON, enable);
    }

    /// Whether REFON is set
    pub fn reference_enabled(&self) -> bool {
        self.bytes[0] & REFON != 0
    }

    /// Selects the ADC clock option
    pub fn set_adc_mode(&mut self, mode: AdcMode) {
        set_bit(&mut self.bytes[0], ADCOPT, mode == AdcMode::Alternate);
    }

    /// Currently selected ADC clock option
    pub fn adc_mode(&self) -> AdcMode {
        if self.bytes[0] & ADCOPT != 0 {
            AdcMode::Alternate
        } else {
            AdcMode::Standard
        }
    }

    /// Discharge timer enable as read back from the device
    pub fn discharge_timer_enabled(&self) -> bool {
        self.bytes[0] & DTEN != 0
    }

    /// GPIO1..GPIO5 pull-down control, bit `n` is GPIO `n + 1`, 1 = pull-down off
    pub fn set_gpio_bits(&mut self, gpio: u8) {
        self.bytes[0] = (self.bytes[0] & 0x07) | ((gpio & 0x1F) << GPIO_SHIFT);
    }

    /// GPIO1..GPIO5 bits
    pub fn gpio_bits(&self) -> u8 {
        self.bytes[0] >> GPIO_SHIFT
    }

    /// Sets the DCC bits, bit `n` is cell `n + 1`. Bits above cell 12 are ignored.
    pub fn set_discharge_bits(&mut self, mask: u16) {
        let mask = mask & DCC_MASK;
        self.bytes[4] = (mask & 0xFF) as u8;
        self.bytes[5] = (self.bytes[5] & 0xF0) | ((mask >> 8) as u8 & 0x0F);
    }

    /// Current DCC bits
    pub fn discharge_bits(&self) -> u16 {
        u16::from(self.bytes[4]) | (u16::from(self.bytes[5] & 0x0F) << 8)
    }

    /// Discharge timeout nibble (0 = disabled)
    pub fn set_discharge_timeout(&mut self, dcto: u8) {
        self.bytes[5] = (self.bytes[5] & 0x0F) | ((dcto & 0x0F) << 4);
    }

    /// Discharge timeout nibble
    pub fn discharge_timeout(&self) -> u8 {
        self.bytes[5] >> 4
    }

    /// Under-voltage comparison threshold, rounded down to a 1.6 mV step
    pub fn set_undervoltage_uv(&mut self, microvolts: u32) {
        let vuv = (microvolts / THRESHOLD_STEP_UV).saturating_sub(1);
        let vuv = vuv.min(u32::from(THRESHOLD_MAX)) as u16;
        self.bytes[1] = (vuv & 0xFF) as u8;
        self.bytes[2] = (self.bytes[2] & 0xF0) | (vuv >> 8) as u8;
    }

    /// Under-voltage threshold in microvolts
    pub fn undervoltage_uv(&self) -> u32 {
        let vuv = u32::from(self.bytes[1]) | (u32::from(self.bytes[2] & 0x0F) << 8);
        (vuv + 1) * THRESHOLD_STEP_UV
    }

    /// Over-voltage comparison threshold, rounded down to a 1.6 mV step
    pub fn set_overvoltage_uv(&mut self, microvolts: u32) {
        let vov = (microvolts / THRESHOLD_STEP_UV).min(u32::from(THRESHOLD_MAX)) as u16;
        self.bytes[2] = (self.bytes[2] & 0x0F) | (((vov & 0x0F) as u8) << 4);
        self.bytes[3] = (vov >> 4) as u8;
    }

    /// Over-voltage threshold in microvolts
    pub fn overvoltage_uv(&self) -> u32 {
        let vov = u32::from(self.bytes[2] >> 4) | (u32::from(self.bytes[3]) << 4);
        vov * THRESHOLD_STEP_UV
    }

    /// Clears every DCC bit, then sets those of `mode` and enables the reference
    pub fn apply_balancing(&mut self, mode: BalancingMode) {
        self.set_discharge_bits(0);
        self.set_discharge_bits(mode.discharge_mask());
        self.set_reference_enable(true);
    }
}

fn set_bit(byte: &mut u8, bit: u8, value: bool) {
    if value {
        *byte |= bit;
    } else {
        *byte &= !bit;
    }
}
