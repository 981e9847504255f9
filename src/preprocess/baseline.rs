use crate::domain::EwhConfig;
use crate::optimizer::exact_water_energy;

/// Hysteresis below the standard temperature at which the thermostat switches on (K)
pub const THERMOSTAT_HYSTERESIS_K: f64 = 3.0;

/// Load (W) of a conventionally thermostat-controlled heater serving `draws`.
///
/// The tank starts at its start temperature, heats at full power once it drops
/// [`THERMOSTAT_HYSTERESIS_K`] below the standard temperature and stops on reaching it.
/// Used as the unoptimised baseline when no measured load exists.
pub fn simulate_thermostat_load(ewh: &EwhConfig, draws: &[f64], step_minutes: u32) -> Vec<f64> {
    let step_minutes = f64::from(step_minutes);
    let hours = step_minutes / 60.0;
    let mut on = false;
    let mut w_tot = ewh.wh_init;

    draws
        .iter()
        .map(|&draw| {
            let temp = ewh.temp_of(w_tot);
            if temp < ewh.standard_temp_c - THERMOSTAT_HYSTERESIS_K {
                on = true;
            }
            if temp >= ewh.standard_temp_c {
                on = false;
            }

            let w_water = exact_water_energy(ewh, temp, ewh.inlet_temp_c, draw, step_minutes);
            let w_loss = ewh.loss(temp, hours);
            let w_in = if on { ewh.thermal_power_kw * hours } else { 0.0 };
            w_tot = w_water + w_in - w_loss;

            if on {
                ewh.thermal_power_kw * 1000.0
            } else {
                0.0
            }
        })
        .collect()
}
