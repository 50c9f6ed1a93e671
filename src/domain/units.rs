// Unit conversions between device durations and chart timestamps.
//
// The device reports ages in milliseconds, sampling rates in samples per
// second, history intervals and price dates in minutes, and fixed-point
// values in thousandths. Charts work in unix seconds. Every conversion goes
// through this module.

pub const MS_PER_SECOND: f64 = 1000.0;
pub const SECONDS_PER_MINUTE: f64 = 60.0;
pub const THOUSANDTHS_PER_UNIT: f64 = 1000.0;

pub fn ms_to_s(ms: f64) -> f64 {
    ms / MS_PER_SECOND
}

pub fn s_to_ms(s: f64) -> f64 {
    s * MS_PER_SECOND
}

pub fn minutes_to_s(minutes: f64) -> f64 {
    minutes * SECONDS_PER_MINUTE
}

pub fn minutes_to_ms(minutes: f64) -> f64 {
    s_to_ms(minutes_to_s(minutes))
}

/// Gap between two live samples in milliseconds.
/// Returns `None` for a rate of zero (or less), which the firmware reports
/// when it has not seen enough samples to measure one.
pub fn samples_per_second_to_step_ms(samples_per_second: f64) -> Option<f64> {
    if samples_per_second > 0.0 && samples_per_second.is_finite() {
        Some(MS_PER_SECOND / samples_per_second)
    } else {
        None
    }
}

pub fn thousandths_to_unit(value: f64) -> f64 {
    value / THOUSANDTHS_PER_UNIT
}
