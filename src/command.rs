//! Command frames and response validation
//!
//! Every command is a big-endian 11-bit opcode followed by its PEC15 (4 bytes).
//! Register writes append six data bytes and their own PEC15, register reads
//! answer with six data bytes and a PEC15.

use byteorder::{BigEndian, ByteOrder};

use crate::pec;
use crate::Error;

/// Length of a command header (opcode + PEC)
pub const COMMAND_LEN: usize = 4;
/// Length of a register group payload
pub const PAYLOAD_LEN: usize = 6;
/// Length of a register read response (payload + PEC)
pub const RESPONSE_LEN: usize = PAYLOAD_LEN + 2;
/// Length of a register write frame (header + payload + PEC)
pub const WRITE_FRAME_LEN: usize = COMMAND_LEN + RESPONSE_LEN;

/// ADC conversion speed for ADCV, with ADCOPT cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConversionMode {
    /// 27 kHz
    Fast,
    /// 7 kHz
    Normal,
    /// 26 Hz
    Filtered,
}

impl ConversionMode {
    fn md_bits(self) -> u16 {
        match self {
            ConversionMode::Fast => 0b01,
            ConversionMode::Normal => 0b10,
            ConversionMode::Filtered => 0b11,
        }
    }
}

/// Cell voltage register groups, three cells each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CellGroup {
    /// Cells 1-3
    A,
    /// Cells 4-6
    B,
    /// Cells 7-9
    C,
    /// Cells 10-12
    D,
}

impl CellGroup {
    /// All groups in read order
    pub const ALL: [CellGroup; 4] = [CellGroup::A, CellGroup::B, CellGroup::C, CellGroup::D];

    /// Zero-based index of the first cell in this group
    pub fn first_cell(self) -> usize {
        match self {
            CellGroup::A => 0,
            CellGroup::B => 3,
            CellGroup::C => 6,
            CellGroup::D => 9,
        }
    }
}

/// Commands used by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Write configuration register group
    WriteConfig,
    /// Read configuration register group
    ReadConfig,
    /// Read one cell voltage register group
    ReadCells(CellGroup),
    /// Start cell voltage conversion on all cells
    StartCellConversion {
        /// Conversion speed
        mode: ConversionMode,
        /// Keep discharge switches closed during the conversion
        discharge_permitted: bool,
    },
    /// Reset all cell voltage registers to 0xFF
    ClearCells,
    /// Poll ADC conversion status
    PollAdc,
}

impl Command {
    /// 11-bit opcode
    pub fn value(&self) -> u16 {
        match *self {
            Command::WriteConfig => 0x001,
            Command::ReadConfig => 0x002,
            Command::ReadCells(CellGroup::A) => 0x004,
            Command::ReadCells(CellGroup::B) => 0x006,
            Command::ReadCells(CellGroup::C) => 0x008,
            Command::ReadCells(CellGroup::D) => 0x00A,
            Command::StartCellConversion {
                mode,
                discharge_permitted,
            } => 0x260 | (mode.md_bits() << 7) | (u16::from(discharge_permitted) << 4),
            Command::ClearCells => 0x711,
            Command::PollAdc => 0x714,
        }
    }

    /// Recognises a received opcode
    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0x001 => Some(Command::WriteConfig),
            0x002 => Some(Command::ReadConfig),
            0x004 => Some(Command::ReadCells(CellGroup::A)),
            0x006 => Some(Command::ReadCells(CellGroup::B)),
            0x008 => Some(Command::ReadCells(CellGroup::C)),
            0x00A => Some(Command::ReadCells(CellGroup::D)),
            0x711 => Some(Command::ClearCells),
            0x714 => Some(Command::PollAdc),
            // ADCV with CH = all cells
            v if v & 0x66F == 0x260 && (v >> 7) & 0b11 != 0 => {
                let mode = match (v >> 7) & 0b11 {
                    0b01 => ConversionMode::Fast,
                    0b10 => ConversionMode::Normal,
                    _ => ConversionMode::Filtered,
                };
                Some(Command::StartCellConversion {
                    mode,
                    discharge_permitted: v & 0x010 != 0,
                })
            }
            _ => None,
        }
    }
}

/// Builds the 4-byte header for a command
pub fn build_command(command: Command) -> [u8; COMMAND_LEN] {
    let mut frame = [0u8; COMMAND_LEN];
    BigEndian::write_u16(&mut frame[..2], command.value());
    let pec = pec::pec15_bytes(&frame[..2]);
    frame[2..].copy_from_slice(&pec);

    frame
}

/// Builds a register write frame: header, payload, payload PEC
pub fn build_write_frame(command: Command, payload: &[u8; PAYLOAD_LEN]) -> [u8; WRITE_FRAME_LEN] {
    let mut frame = [0u8; WRITE_FRAME_LEN];
    frame[..COMMAND_LEN].copy_from_slice(&build_command(command));
    frame[COMMAND_LEN..COMMAND_LEN + PAYLOAD_LEN].copy_from_slice(payload);
    let pec = pec::pec15_bytes(payload);
    frame[COMMAND_LEN + PAYLOAD_LEN..].copy_from_slice(&pec);

    frame
}

/// Checks the PEC of a register read response and returns its payload
pub fn validate_response(frame: &[u8; RESPONSE_LEN]) -> Result<[u8; PAYLOAD_LEN], Error> {
    if !pec::verify(frame) {
        return Err(Error::PecMismatch);
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&frame[..PAYLOAD_LEN]);

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrcfg_header_carries_documented_pec() {
        assert_eq!(build_command(Command::WriteConfig), [0x00, 0x01, 0x3D, 0x6E]);
        assert_eq!(build_command(Command::ReadConfig), [0x00, 0x02, 0x2B, 0x0A]);
        assert_eq!(build_command(Command::PollAdc), [0x07, 0x14, 0xF3, 0x6C]);
    }

    #[test]
    fn adcv_opcode_encodes_mode_and_dcp() {
        let normal = Command::StartCellConversion {
            mode: ConversionMode::Normal,
            discharge_permitted: false,
        };
        let permitted = Command::StartCellConversion {
            mode: ConversionMode::Normal,
            discharge_permitted: true,
        };
        assert_eq!(normal.value(), 0x360);
        assert_eq!(permitted.value(), 0x370);
        assert_eq!(build_command(normal), [0x03, 0x60, 0xF4, 0x6C]);
        assert_eq!(Command::from_value(0x370), Some(permitted));
        assert_eq!(Command::from_value(0x2F0).map(|c| c.value()), Some(0x2F0));
    }

    #[test]
    fn opcode_lookup_is_inverse_of_value() {
        let commands = [
            Command::WriteConfig,
            Command::ReadConfig,
            Command::ReadCells(CellGroup::A),
            Command::ReadCells(CellGroup::B),
            Command::ReadCells(CellGroup::C),
            Command::ReadCells(CellGroup::D),
            Command::ClearCells,
            Command::PollAdc,
        ];
        for command in commands.iter() {
            assert_eq!(Command::from_value(command.value()), Some(*command));
        }
        assert_eq!(Command::from_value(0x7FF), None);
    }

    #[test]
    fn write_frame_layout() {
        let payload = [0xFC, 0x00, 0x00, 0x00, 0xAA, 0x0A];
        let frame = build_write_frame(Command::WriteConfig, &payload);
        assert_eq!(&frame[..4], &[0x00, 0x01, 0x3D, 0x6E]);
        assert_eq!(&frame[4..10], &payload);
        assert!(pec::verify(&frame[4..]));
    }

    #[test]
    fn response_validation() {
        let payload = [0x10, 0x90, 0x20, 0x91, 0x30, 0x92];
        let mut frame = [0u8; RESPONSE_LEN];
        frame[..6].copy_from_slice(&payload);
        frame[6..].copy_from_slice(&pec::pec15_bytes(&payload));
        assert_eq!(validate_response(&frame), Ok(payload));

        frame[7] ^= 0x02;
        assert_eq!(validate_response(&frame), Err(Error::PecMismatch));
    }
}
