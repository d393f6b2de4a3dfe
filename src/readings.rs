//! Measurement results shared with telemetry and safety consumers

use byteorder::{ByteOrder, LittleEndian};

use crate::command::{CellGroup, PAYLOAD_LEN};
use crate::temperature::TEMPERATURE_UNAVAILABLE;
use crate::CELLS_PER_DEVICE;

/// Volts per cell code LSB
pub const VOLTS_PER_CODE: f32 = 0.000_1;

/// Code a cell register holds after CLRCELL or power-up
pub const CLEARED_CODE: u16 = 0xFFFF;

/// Converts a raw cell code to volts
pub fn code_to_volts(code: u16) -> f32 {
    f32::from(code) * VOLTS_PER_CODE
}

/// The twelve raw cell codes of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellCodes(pub [u16; CELLS_PER_DEVICE]);

impl Default for CellCodes {
    fn default() -> Self {
        CellCodes([CLEARED_CODE; CELLS_PER_DEVICE])
    }
}

impl CellCodes {
    /// Stores the three little-endian codes of one register group
    pub fn set_group(&mut self, group: CellGroup, payload: &[u8; PAYLOAD_LEN]) {
        let first = group.first_cell();
        for i in 0..3 {
            self.0[first + i] = LittleEndian::read_u16(&payload[i * 2..i * 2 + 2]);
        }
    }

    /// Raw code of the cell at zero-based `index`
    pub fn code(&self, index: usize) -> u16 {
        self.0[index]
    }

    /// Voltage of the cell at zero-based `index`
    pub fn volts(&self, index: usize) -> f32 {
        code_to_volts(self.0[index])
    }

    /// True if any register still holds the cleared pattern
    pub fn is_cleared(&self) -> bool {
        self.0.iter().any(|code| *code == CLEARED_CODE)
    }
}

/// Derived values for one physical cell position
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellReading {
    /// Cell voltage in V from the last balancing-free pass
    pub voltage: f32,
    /// Thermistor temperature in °C, or the unavailable sentinel
    pub temperature: f32,
}

impl Default for CellReading {
    fn default() -> Self {
        CellReading {
            voltage: 0.0,
            temperature: TEMPERATURE_UNAVAILABLE,
        }
    }
}

impl CellReading {
    /// Whether the temperature field holds a real measurement
    pub fn has_temperature(&self) -> bool {
        self.temperature != TEMPERATURE_UNAVAILABLE
    }
}

/// Aggregate state of the pack as seen by the vehicle safety logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PackState {
    /// All devices communicating
    Normal,
    /// At least one device failed, balancing forced off, measurement halted
    AfeFailMode,
}

/// Pack-wide extrema over the latest readings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PackSummary {
    /// Lowest cell voltage in V
    pub min_voltage: f32,
    /// Highest cell voltage in V
    pub max_voltage: f32,
    /// Sum of all cell voltages in V
    pub total_voltage: f32,
    /// Lowest valid temperature, `None` if no cell has one
    pub min_temperature: Option<f32>,
    /// Highest valid temperature, `None` if no cell has one
    pub max_temperature: Option<f32>,
}

/// Snapshot of everything the measurement cycle publishes.
///
/// Readings are overwritten pass by pass; a cycle that fails part way leaves
/// the values of earlier cycles in place. `completed_cycles` only advances on
/// a fully successful cycle, so readers can detect staleness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackStatus<const N: usize> {
    /// Per-device, per-cell readings
    pub cells: [[CellReading; CELLS_PER_DEVICE]; N],
    /// Aggregate state
    pub state: PackState,
    /// Number of cycles that completed all three passes
    pub completed_cycles: u32,
}

impl<const N: usize> Default for PackStatus<N> {
    fn default() -> Self {
        PackStatus {
            cells: [[CellReading::default(); CELLS_PER_DEVICE]; N],
            state: PackState::Normal,
            completed_cycles: 0,
        }
    }
}

impl<const N: usize> PackStatus<N> {
    /// Total number of cells across all devices
    pub const CELL_COUNT: usize = N * CELLS_PER_DEVICE;

    /// Reading of the cell at pack-wide zero-based `index`
    pub fn cell(&self, index: usize) -> Option<&CellReading> {
        self.cells
            .get(index / CELLS_PER_DEVICE)
            .map(|device| &device[index % CELLS_PER_DEVICE])
    }

    /// All readings in pack order
    pub fn iter(&self) -> impl Iterator<Item = &CellReading> {
        self.cells.iter().flat_map(|device| device.iter())
    }

    /// Whether the pack is in AFE fail mode
    pub fn is_fail_mode(&self) -> bool {
        self.state == PackState::AfeFailMode
    }

    /// Extrema over the current readings, `None` for an empty pack
    pub fn summary(&self) -> Option<PackSummary> {
        let mut cells = self.iter();
        let first = cells.next()?;

        let mut summary = PackSummary {
            min_voltage: first.voltage,
            max_voltage: first.voltage,
            total_voltage: first.voltage,
            min_temperature: None,
            max_temperature: None,
        };
        track_temperature(&mut summary, first);

        for cell in cells {
            summary.min_voltage = summary.min_voltage.min(cell.voltage);
            summary.max_voltage = summary.max_voltage.max(cell.voltage);
            summary.total_voltage += cell.voltage;
            track_temperature(&mut summary, cell);
        }

        Some(summary)
    }
}

fn track_temperature(summary: &mut PackSummary, cell: &CellReading) {
    if !cell.has_temperature() {
        return;
    }

    let t = cell.temperature;
    summary.min_temperature = Some(summary.min_temperature.map_or(t, |min| min.min(t)));
    summary.max_temperature = Some(summary.max_temperature.map_or(t, |max| max.max(t)));
}
