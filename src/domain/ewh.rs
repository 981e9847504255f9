use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::{ConfigError, EwhSpecs};

/// Specific heat capacity of water (kJ/(kg·K))
pub const WATER_HEAT_CAPACITY: f64 = 4.186;

/// Share of the rated electrical power that ends up as heat in the water
pub const HEATING_EFFICIENCY: f64 = 0.9;

/// Immutable, derived description of one water heater for a single run.
///
/// All energies are kWh of heat stored in the tank relative to 0 °C water.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EwhConfig {
    pub capacity_l: f64,
    /// Nameplate (or detected) electrical power, W
    pub rated_power_w: f64,
    /// Heat delivered to the water, kW
    pub thermal_power_kw: f64,
    pub max_temp_c: f64,
    pub min_temp_c: f64,
    pub comfort_temp_c: f64,
    pub standard_temp_c: f64,
    pub start_temp_c: f64,
    pub inlet_temp_c: f64,
    pub ambient_temp_c: f64,
    pub height_m: f64,
    pub radius_m: f64,
    /// Outer surface of the cylinder, m²
    pub surface_area_m2: f64,
    /// kW/(m²·K)
    pub heat_transfer_coeff: f64,
    pub flow_rate_l_per_min: f64,
    pub wh_min: f64,
    pub wh_max: f64,
    pub wh_init: f64,
}

impl EwhConfig {
    /// Derive the physical parameters. `rated_power_w` is the already resolved power
    /// (nameplate or detected from the load signal).
    pub fn new(specs: &EwhSpecs, rated_power_w: f64) -> Result<Self, ConfigError> {
        specs.check()?;
        if !(rated_power_w.is_finite() && rated_power_w > 0.0) {
            return Err(ConfigError::RatedPowerUnavailable(Some(rated_power_w)));
        }

        let height_m = specs.height_cm / 100.0;
        let volume_m3 = specs.capacity_l / 1000.0;
        let radius_m = (volume_m3 / (height_m * PI)).sqrt();
        let surface_area_m2 = 2.0 * PI * radius_m * (radius_m + height_m);

        let energy = |temp: f64| temp * specs.capacity_l * WATER_HEAT_CAPACITY / 3600.0;

        Ok(Self {
            capacity_l: specs.capacity_l,
            rated_power_w,
            thermal_power_kw: HEATING_EFFICIENCY * rated_power_w / 1000.0,
            max_temp_c: specs.max_temp_c,
            min_temp_c: specs.min_temp_c,
            comfort_temp_c: specs.comfort_temp_c,
            standard_temp_c: specs.standard_temp_c,
            start_temp_c: specs.start_temp_c,
            inlet_temp_c: specs.inlet_temp_c,
            ambient_temp_c: specs.ambient_temp_c,
            height_m,
            radius_m,
            surface_area_m2,
            heat_transfer_coeff: specs.heat_transfer_coeff,
            flow_rate_l_per_min: specs.flow_rate_l_per_min,
            wh_min: energy(specs.min_temp_c),
            wh_max: energy(specs.max_temp_c),
            wh_init: energy(specs.start_temp_c),
        })
    }

    /// kWh needed to raise the whole tank by one kelvin
    pub fn kwh_per_kelvin(&self) -> f64 {
        self.capacity_l * WATER_HEAT_CAPACITY / 3600.0
    }

    pub fn energy_at(&self, temp_c: f64) -> f64 {
        temp_c * self.kwh_per_kelvin()
    }

    pub fn temp_of(&self, energy_kwh: f64) -> f64 {
        energy_kwh / self.kwh_per_kelvin()
    }

    /// Minimum energy content after a draw: the comfort temperature raised by `margin`
    pub fn comfort_energy_floor(&self, margin: f64) -> f64 {
        self.energy_at(self.comfort_temp_c * (1.0 + margin))
    }

    /// Loss coefficient U·A, kW/K
    pub fn loss_coefficient(&self) -> f64 {
        self.heat_transfer_coeff * self.surface_area_m2
    }

    /// Thermal loss over `hours` at tank temperature `temp_c`, kWh
    pub fn loss(&self, temp_c: f64, hours: f64) -> f64 {
        self.loss_coefficient() * (temp_c - self.ambient_temp_c) * hours
    }

    /// Stored energy after `drawn_l` litres leave at `temp_c` and are replaced by inlet water
    pub fn mixed_energy(&self, temp_c: f64, drawn_l: f64, inlet_c: f64) -> f64 {
        let drawn_l = drawn_l.clamp(0.0, self.capacity_l);
        (temp_c * (self.capacity_l - drawn_l) + inlet_c * drawn_l) * WATER_HEAT_CAPACITY / 3600.0
    }
}
