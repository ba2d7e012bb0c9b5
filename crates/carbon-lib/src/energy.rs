//! Energy and CO2 conversion shared by every activity category

use crate::error::{ensure_non_negative, Result};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const WATTS_PER_KILOWATT: f64 = 1000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyCo2 {
    pub energy_kwh: f64,
    pub co2_kg: f64,
}

impl std::ops::Add for EnergyCo2 {
    type Output = EnergyCo2;

    fn add(self, rhs: EnergyCo2) -> EnergyCo2 {
        EnergyCo2 {
            energy_kwh: self.energy_kwh + rhs.energy_kwh,
            co2_kg: self.co2_kg + rhs.co2_kg,
        }
    }
}

/// Integrate a constant power draw over a duration.
///
/// `energy_kwh = power/1000 × seconds/3600`, `co2_kg = energy_kwh × intensity`.
/// Zero power or zero duration yield zero; negative or non-finite inputs are
/// rejected, never clamped.
pub fn to_energy_co2(
    power_watts: f64,
    duration_seconds: f64,
    carbon_intensity_kg_per_kwh: f64,
) -> Result<EnergyCo2> {
    let power_watts = ensure_non_negative("power_watts", power_watts)?;
    let duration_seconds = ensure_non_negative("duration_seconds", duration_seconds)?;
    let intensity = ensure_non_negative("carbon_intensity", carbon_intensity_kg_per_kwh)?;

    let energy_kwh = (power_watts / WATTS_PER_KILOWATT) * (duration_seconds / SECONDS_PER_HOUR);
    Ok(EnergyCo2 {
        energy_kwh,
        co2_kg: energy_kwh * intensity,
    })
}
