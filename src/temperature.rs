//! Thermistor voltage to temperature conversion
//!
//! The thermistor divider is read through a cell input, so the table maps the
//! measured channel voltage to °C. Voltage falls as temperature rises and the
//! breakpoints are not evenly spaced.

/// Returned when the voltage lies outside the table
pub const TEMPERATURE_UNAVAILABLE: f32 = -100.0;

const TABLE_LEN: usize = 33;

/// Breakpoint voltages in V, strictly descending
pub static TEMP_TABLE_VOLTS: [f32; TABLE_LEN] = [
    2.44, 2.43, 2.42, 2.41, 2.40, 2.38, 2.36, 2.33, 2.30, 2.26, 2.22, 2.17, 2.12, 2.06, 2.00, 1.94,
    1.88, 1.82, 1.76, 1.70, 1.65, 1.60, 1.55, 1.51, 1.47, 1.44, 1.41, 1.38, 1.36, 1.34, 1.32, 1.31,
    1.30,
];

/// Breakpoint temperatures in °C, ascending
pub static TEMP_TABLE_CELSIUS: [f32; TABLE_LEN] = [
    -40.0, -35.0, -30.0, -25.0, -20.0, -15.0, -10.0, -5.0, 0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0,
    35.0, 40.0, 45.0, 50.0, 55.0, 60.0, 65.0, 70.0, 75.0, 80.0, 85.0, 90.0, 95.0, 100.0, 105.0,
    110.0, 115.0, 120.0,
];

/// Interpolates the temperature for a thermistor channel voltage.
///
/// Scans from the cold end for the first interval with
/// `volts[i] >= v >= volts[i + 1]`. Returns [`TEMPERATURE_UNAVAILABLE`] if no
/// interval brackets `v` (including NaN).
pub fn voltage_to_temperature(v: f32) -> f32 {
    for i in 0..TABLE_LEN - 1 {
        let (v_hi, v_lo) = (TEMP_TABLE_VOLTS[i], TEMP_TABLE_VOLTS[i + 1]);
        if v <= v_hi && v >= v_lo {
            let (t_lo, t_hi) = (TEMP_TABLE_CELSIUS[i], TEMP_TABLE_CELSIUS[i + 1]);
            return t_lo + (v - v_hi) / (v_lo - v_hi) * (t_hi - t_lo);
        }
    }

    TEMPERATURE_UNAVAILABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_monotonic() {
        for i in 0..TABLE_LEN - 1 {
            assert!(TEMP_TABLE_VOLTS[i] > TEMP_TABLE_VOLTS[i + 1]);
            assert!(TEMP_TABLE_CELSIUS[i] < TEMP_TABLE_CELSIUS[i + 1]);
        }
    }

    #[test]
    fn table_end_points() {
        assert_eq!(voltage_to_temperature(2.44), -40.0);
        assert_eq!(voltage_to_temperature(1.30), 120.0);
    }

    #[test]
    fn outside_table_is_unavailable() {
        assert_eq!(voltage_to_temperature(3.00), TEMPERATURE_UNAVAILABLE);
        assert_eq!(voltage_to_temperature(1.29), TEMPERATURE_UNAVAILABLE);
        assert_eq!(voltage_to_temperature(f32::NAN), TEMPERATURE_UNAVAILABLE);
    }

    #[test]
    fn breakpoints_and_midpoints() {
        assert!((voltage_to_temperature(2.06) - 25.0).abs() < 1e-3);
        // Halfway between 2.12 V (20 °C) and 2.06 V (25 °C)
        assert!((voltage_to_temperature(2.09) - 22.5).abs() < 1e-3);
        // Uneven spacing near the hot end: 1.36 V -> 100 °C, 1.34 V -> 105 °C
        assert!((voltage_to_temperature(1.35) - 102.5).abs() < 1e-3);
    }

    #[test]
    fn warmer_means_lower_voltage() {
        let mut previous = voltage_to_temperature(2.44);
        let mut v = 2.43;
        while v > 1.30 {
            let t = voltage_to_temperature(v);
            assert!(t >= previous);
            previous = t;
            v -= 0.01;
        }
    }
}
