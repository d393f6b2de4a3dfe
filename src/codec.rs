//! Single-byte encodings used when relaying cell values over the vehicle bus
//!
//! Out-of-range inputs are clamped to the nearest representable value.

use libm::roundf;

const VOLT_MIN: f32 = 2.00;
const VOLT_MAX: f32 = 4.55;
const VOLT_STEP: f32 = 0.01;

const TEMP_MIN: f32 = -20.0;
const TEMP_MAX: f32 = 107.5;
const TEMP_STEP: f32 = 0.5;

/// Cell voltage as 10 mV steps above 2.00 V
pub fn encode_volt_10mv(volts: f32) -> u8 {
    let clamped = clamp(volts, VOLT_MIN, VOLT_MAX);
    roundf((clamped - VOLT_MIN) / VOLT_STEP) as u8
}

/// Inverse of [`encode_volt_10mv`]
pub fn decode_volt_10mv(byte: u8) -> f32 {
    VOLT_MIN + f32::from(byte) * VOLT_STEP
}

/// Temperature as 0.5 °C steps above -20 °C
pub fn encode_temp_half_deg(celsius: f32) -> u8 {
    let clamped = clamp(celsius, TEMP_MIN, TEMP_MAX);
    roundf((clamped - TEMP_MIN) / TEMP_STEP) as u8
}

/// Inverse of [`encode_temp_half_deg`]
pub fn decode_temp_half_deg(byte: u8) -> f32 {
    TEMP_MIN + f32::from(byte) * TEMP_STEP
}

// NaN maps to the lower bound
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value > max {
        max
    } else if value >= min {
        value
    } else {
        min
    }
}
