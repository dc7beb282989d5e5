//! Weight units used on the packing floor.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Mass unit with a fixed conversion factor to kilograms.
///
/// The ledger does all of its arithmetic in kilograms; other units appear only
/// at the edges (packet sizes in grams, bulk intake in tonnes).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Gram,
    Kilogram,
    Tonne,
}

impl WeightUnit {
    /// Kilograms in one unit.
    pub fn kilograms_per_unit(self) -> f64 {
        match self {
            WeightUnit::Gram => 0.001,
            WeightUnit::Kilogram => 1.0,
            WeightUnit::Tonne => 1000.0,
        }
    }

    /// Convert `value` from this unit into `to`, via the kilogram base.
    pub fn convert(self, value: f64, to: WeightUnit) -> f64 {
        value * self.kilograms_per_unit() / to.kilograms_per_unit()
    }

    /// `value` in this unit, expressed in kilograms.
    pub fn to_kilograms(self, value: f64) -> f64 {
        self.convert(value, WeightUnit::Kilogram)
    }
}

impl core::fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let symbol = match self {
            WeightUnit::Gram => "g",
            WeightUnit::Kilogram => "kg",
            WeightUnit::Tonne => "t",
        };
        f.write_str(symbol)
    }
}

impl FromStr for WeightUnit {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" | "gram" | "grams" => Ok(WeightUnit::Gram),
            "kg" | "kilogram" | "kilograms" => Ok(WeightUnit::Kilogram),
            "t" | "ton" | "tonne" | "tonnes" => Ok(WeightUnit::Tonne),
            other => Err(DomainError::validation(format!(
                "unknown weight unit: {other:?}"
            ))),
        }
    }
}
