//! Weight conversion. Storage is always pounds; kilograms are a display concern.

use serde::{Deserialize, Serialize};

const KG_PER_LB: f64 = 0.453592;
const LBS_PER_KG: f64 = 2.20462;

/// The unit a user prefers to see weights in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Lbs,
    Kg,
}

pub fn lbs_to_kg(lbs: f64) -> f64 {
    lbs * KG_PER_LB
}

pub fn kg_to_lbs(kg: f64) -> f64 {
    kg * LBS_PER_KG
}

/// Converts a stored pound value into `unit`.
pub fn convert_weight(weight_lbs: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Lbs => weight_lbs,
        WeightUnit::Kg => lbs_to_kg(weight_lbs),
    }
}

/// Converts a weight entered in `unit` into pounds for storage.
pub fn to_stored_lbs(weight: f64, unit: WeightUnit) -> f64 {
    match unit {
        WeightUnit::Lbs => weight,
        WeightUnit::Kg => kg_to_lbs(weight),
    }
}

/// Formats a stored pound value for display: kilograms to one decimal,
/// pounds as a whole number.
pub fn format_weight(weight_lbs: f64, unit: WeightUnit) -> String {
    match unit {
        WeightUnit::Lbs => format!("{:.0}lbs", weight_lbs),
        WeightUnit::Kg => format!("{:.1}kg", lbs_to_kg(weight_lbs)),
    }
}

/// Parses free-form weight input in `unit` into stored pounds.
///
/// Unparsable input counts as zero.
pub fn parse_weight_input(input: &str, unit: WeightUnit) -> f64 {
    let value = input.trim().parse::<f64>().unwrap_or(0.0);
    to_stored_lbs(value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_units() {
        assert!((lbs_to_kg(100.0) - 45.3592).abs() < 1e-9);
        assert!((kg_to_lbs(100.0) - 220.462).abs() < 1e-9);
        // Only reversible to floating-point precision.
        assert!((kg_to_lbs(lbs_to_kg(135.0)) - 135.0).abs() < 0.01);
    }

    #[test]
    fn formats_for_display() {
        assert_eq!(format_weight(90.0, WeightUnit::Lbs), "90lbs");
        assert_eq!(format_weight(100.0, WeightUnit::Kg), "45.4kg");
    }

    #[test]
    fn parses_user_input() {
        assert_eq!(parse_weight_input("95", WeightUnit::Lbs), 95.0);
        assert!((parse_weight_input(" 20 ", WeightUnit::Kg) - 44.0924).abs() < 1e-9);
        assert_eq!(parse_weight_input("heavy", WeightUnit::Kg), 0.0);
    }
}
