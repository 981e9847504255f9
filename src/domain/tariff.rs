use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::{ConfigError, TariffSpecs};

/// Pricing scheme; exactly one price series is active per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TariffMode {
    Flat,
    DayNight,
    /// Externally supplied price series
    Dynamic,
}

/// Resolved tariff for one run
#[derive(Debug, Clone)]
pub struct TariffConfig {
    pub mode: TariffMode,
    pub price_flat: f64,
    pub price_day: f64,
    pub price_night: f64,
    /// Fixed network tariff of the active mode, €/day
    pub daily_tariff: f64,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub timezone: Tz,
}

impl TariffConfig {
    pub fn new(specs: &TariffSpecs) -> Result<Self, ConfigError> {
        let timezone: Tz = specs
            .timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(specs.timezone.clone()))?;

        let daily_tariff = match specs.mode {
            TariffMode::Flat => specs.daily_tariff_flat,
            TariffMode::DayNight => specs.daily_tariff_day_night,
            TariffMode::Dynamic => specs.daily_tariff_dynamic,
        };

        Ok(Self {
            mode: specs.mode,
            price_flat: specs.price_flat,
            price_day: specs.price_day,
            price_night: specs.price_night,
            daily_tariff,
            night_start_hour: specs.night_start_hour,
            night_end_hour: specs.night_end_hour,
            timezone,
        })
    }

    /// Whether the local hour falls in the night window (which may wrap midnight)
    pub fn is_night(&self, ts: DateTime<Utc>) -> bool {
        let hour = ts.with_timezone(&self.timezone).hour();
        if self.night_start_hour <= self.night_end_hour {
            (self.night_start_hour..self.night_end_hour).contains(&hour)
        } else {
            hour >= self.night_start_hour || hour < self.night_end_hour
        }
    }

    /// Energy price at `ts` (€/kWh). `None` in dynamic mode, where prices come from outside.
    pub fn price_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        match self.mode {
            TariffMode::Flat => Some(self.price_flat),
            TariffMode::DayNight if self.is_night(ts) => Some(self.price_night),
            TariffMode::DayNight => Some(self.price_day),
            TariffMode::Dynamic => None,
        }
    }

    /// Share of the daily network tariff attributable to a step of `hours`
    pub fn network_cost(&self, hours: f64) -> f64 {
        self.daily_tariff * hours / 24.0
    }
}
