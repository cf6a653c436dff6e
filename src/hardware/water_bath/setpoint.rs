//! Setpoint limits.
//!
//! The bath can run from -24 °C to 150 °C; we restrict setpoints to the range
//! where water is liquid.

/// Lowest accepted setpoint, °C.
pub const LOW_TEMPERATURE_LIMIT: f64 = 0.0;
/// Highest accepted setpoint, °C.
pub const HIGH_TEMPERATURE_LIMIT: f64 = 100.0;

/// Reasons `temperature` (°C) cannot be used as a bath setpoint.
pub fn temperature_validation_errors(temperature: f64) -> Vec<String> {
    let mut errors = Vec::new();
    if temperature.is_nan() {
        errors.push("temperature is not a number".to_string());
    }
    if temperature < LOW_TEMPERATURE_LIMIT {
        errors.push(format!("temperature < {LOW_TEMPERATURE_LIMIT} C"));
    }
    if temperature > HIGH_TEMPERATURE_LIMIT {
        errors.push(format!("temperature > {HIGH_TEMPERATURE_LIMIT} C"));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_inclusive() {
        for temperature in [0.0, 25.0, 99.99, 100.0] {
            assert!(temperature_validation_errors(temperature).is_empty(), "{temperature}");
        }
    }

    #[test]
    fn out_of_range_temperatures_are_reported() {
        assert_eq!(temperature_validation_errors(-0.1), vec!["temperature < 0 C"]);
        assert_eq!(temperature_validation_errors(100.5), vec!["temperature > 100 C"]);
        assert_eq!(temperature_validation_errors(f64::NAN).len(), 1);
    }
}
