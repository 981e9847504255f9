use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

use crate::domain::TariffMode;
use crate::optimizer::{Activation, ComfortTrigger};

/// Default location of the TOML layer, overridable through `EWH_FLEX_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config/ewh-flex.toml";

/// Plausible nameplate power range (W). Outside of it the power is estimated from the load signal.
pub const RATED_POWER_RANGE_W: (f64, f64) = (250.0, 5000.0);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("comfort temperature {comfort}°C must be below the maximum temperature {max}°C")]
    ComfortNotBelowMax { comfort: f64, max: f64 },
    #[error("invalid configuration: {0}")]
    Inconsistent(String),
    #[error("unknown timezone '{0}'")]
    Timezone(String),
    #[error("rated power {0:?} W is implausible and no load signal is available to estimate it")]
    RatedPowerUnavailable(Option<f64>),
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub ewh: EwhSpecs,
    pub tariff: TariffSpecs,
    pub model: ModelConfig,
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub user: String,
    /// Optimisation step length; the input grid is resampled when this is coarser
    pub step_minutes: u32,
    /// Write the MILP in CPLEX LP format here before solving
    pub lp_dump_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            user: "sample_user".to_string(),
            step_minutes: 1,
            lp_dump_path: None,
        }
    }
}

/// Water heater specification as supplied by the user (before derivation)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EwhSpecs {
    #[validate(range(min = 1.0, max = 1000.0))]
    pub capacity_l: f64,
    /// Nameplate heating power. `None` or an implausible value triggers detection from the load signal.
    pub rated_power_w: Option<f64>,
    #[validate(range(min = 1.0, max = 100.0))]
    pub max_temp_c: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_temp_c: f64,
    #[validate(range(min = 1.0, max = 100.0))]
    pub comfort_temp_c: f64,
    /// Thermostat setpoint used by the unoptimised baseline
    #[validate(range(min = 1.0, max = 100.0))]
    pub standard_temp_c: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub start_temp_c: f64,
    #[validate(range(min = 0.0, max = 60.0))]
    pub inlet_temp_c: f64,
    #[validate(range(max = 60.0))]
    pub ambient_temp_c: f64,
    /// Overall heat transfer coefficient (kW/(m²·K))
    #[validate(range(min = 0.0, max = 0.1))]
    pub heat_transfer_coeff: f64,
    /// Minimum outlet flow rate during a draw (L/min)
    #[validate(range(min = 0.1, max = 100.0))]
    pub flow_rate_l_per_min: f64,
    #[validate(range(min = 10.0, max = 500.0))]
    pub height_cm: f64,
}

impl Default for EwhSpecs {
    fn default() -> Self {
        Self {
            capacity_l: 100.0,
            rated_power_w: Some(1800.0),
            max_temp_c: 80.0,
            min_temp_c: 0.0,
            comfort_temp_c: 40.0,
            standard_temp_c: 60.0,
            start_temp_c: 60.0,
            inlet_temp_c: 20.0,
            ambient_temp_c: 20.0,
            heat_transfer_coeff: 0.00125,
            flow_rate_l_per_min: 8.5,
            height_cm: 100.0,
        }
    }
}

impl EwhSpecs {
    /// Validate ranges and the ordering between temperature fields
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.comfort_temp_c >= self.max_temp_c {
            return Err(ConfigError::ComfortNotBelowMax {
                comfort: self.comfort_temp_c,
                max: self.max_temp_c,
            });
        }
        if self.min_temp_c > self.comfort_temp_c {
            return Err(ConfigError::Inconsistent(format!(
                "minimum temperature {}°C exceeds comfort temperature {}°C",
                self.min_temp_c, self.comfort_temp_c
            )));
        }
        if self.inlet_temp_c >= self.comfort_temp_c {
            return Err(ConfigError::Inconsistent(format!(
                "inlet temperature {}°C must be below comfort temperature {}°C",
                self.inlet_temp_c, self.comfort_temp_c
            )));
        }
        if !(self.min_temp_c..=self.max_temp_c).contains(&self.start_temp_c) {
            return Err(ConfigError::Inconsistent(format!(
                "start temperature {}°C outside [{}, {}]°C",
                self.start_temp_c, self.min_temp_c, self.max_temp_c
            )));
        }
        if self.standard_temp_c > self.max_temp_c {
            return Err(ConfigError::Inconsistent(format!(
                "standard temperature {}°C exceeds maximum temperature {}°C",
                self.standard_temp_c, self.max_temp_c
            )));
        }
        Ok(())
    }

    /// Nameplate power when it lies strictly inside the plausible range
    pub fn nameplate_power_w(&self) -> Option<f64> {
        let (low, high) = RATED_POWER_RANGE_W;
        self.rated_power_w.filter(|p| *p > low && *p < high)
    }

    pub fn apply_overrides(mut self, overrides: &EwhSpecsOverrides) -> Self {
        if let Some(v) = overrides.capacity_l {
            self.capacity_l = v;
        }
        if overrides.rated_power_w.is_some() {
            self.rated_power_w = overrides.rated_power_w;
        }
        if let Some(v) = overrides.max_temp_c {
            self.max_temp_c = v;
        }
        if let Some(v) = overrides.min_temp_c {
            self.min_temp_c = v;
        }
        if let Some(v) = overrides.comfort_temp_c {
            self.comfort_temp_c = v;
        }
        if let Some(v) = overrides.standard_temp_c {
            self.standard_temp_c = v;
        }
        if let Some(v) = overrides.start_temp_c {
            self.start_temp_c = v;
        }
        if let Some(v) = overrides.inlet_temp_c {
            self.inlet_temp_c = v;
        }
        if let Some(v) = overrides.ambient_temp_c {
            self.ambient_temp_c = v;
        }
        self
    }
}

/// Sparse per-run override of [`EwhSpecs`]; present fields win
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EwhSpecsOverrides {
    pub capacity_l: Option<f64>,
    pub rated_power_w: Option<f64>,
    pub max_temp_c: Option<f64>,
    pub min_temp_c: Option<f64>,
    pub comfort_temp_c: Option<f64>,
    pub standard_temp_c: Option<f64>,
    pub start_temp_c: Option<f64>,
    pub inlet_temp_c: Option<f64>,
    pub ambient_temp_c: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TariffSpecs {
    pub mode: TariffMode,
    /// €/kWh
    #[validate(range(min = 0.0))]
    pub price_flat: f64,
    #[validate(range(min = 0.0))]
    pub price_day: f64,
    #[validate(range(min = 0.0))]
    pub price_night: f64,
    /// Fixed network access tariff, €/day
    #[validate(range(min = 0.0))]
    pub daily_tariff_flat: f64,
    #[validate(range(min = 0.0))]
    pub daily_tariff_day_night: f64,
    #[validate(range(min = 0.0))]
    pub daily_tariff_dynamic: f64,
    #[validate(range(max = 23))]
    pub night_start_hour: u32,
    #[validate(range(max = 23))]
    pub night_end_hour: u32,
    /// IANA name used for hour-of-day tariff windows
    pub timezone: String,
}

impl Default for TariffSpecs {
    fn default() -> Self {
        Self {
            mode: TariffMode::Flat,
            price_flat: 0.119585,
            price_day: 0.149118,
            price_night: 0.070511,
            daily_tariff_flat: 0.3604,
            daily_tariff_day_night: 0.4285,
            daily_tariff_dynamic: 0.0,
            night_start_hour: 22,
            night_end_hour: 8,
            timezone: "UTC".to_string(),
        }
    }
}

impl TariffSpecs {
    pub fn apply_overrides(mut self, overrides: &TariffOverrides) -> Self {
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(v) = overrides.price_flat {
            self.price_flat = v;
        }
        if let Some(v) = overrides.price_day {
            self.price_day = v;
        }
        if let Some(v) = overrides.price_night {
            self.price_night = v;
        }
        if let Some(v) = overrides.daily_tariff_flat {
            self.daily_tariff_flat = v;
        }
        if let Some(v) = overrides.daily_tariff_day_night {
            self.daily_tariff_day_night = v;
        }
        if let Some(v) = overrides.daily_tariff_dynamic {
            self.daily_tariff_dynamic = v;
        }
        if let Some(tz) = &overrides.timezone {
            self.timezone = tz.clone();
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffOverrides {
    pub mode: Option<TariffMode>,
    pub price_flat: Option<f64>,
    pub price_day: Option<f64>,
    pub price_night: Option<f64>,
    pub daily_tariff_flat: Option<f64>,
    pub daily_tariff_day_night: Option<f64>,
    pub daily_tariff_dynamic: Option<f64>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ModelConfig {
    pub activation: Activation,
    pub comfort_trigger: ComfortTrigger,
    /// Fraction above the comfort-temperature energy used as the floor after a draw
    #[validate(range(min = 0.0, max = 0.1))]
    pub comfort_margin: f64,
    #[validate(range(min = 0.0))]
    pub cost_weight: f64,
    #[validate(range(min = 0.0))]
    pub comfort_weight: f64,
    /// Replaces both derived big-M constants when set
    pub big_m: Option<f64>,
    /// Surrogate fits below this R² are flagged
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_r_squared: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Binary,
            comfort_trigger: ComfortTrigger::DrawDecrease,
            comfort_margin: 0.005,
            cost_weight: 100.0,
            comfort_weight: 1000.0,
            big_m: None,
            min_r_squared: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SolverConfig {
    #[validate(range(min = 1.0))]
    pub base_time_limit_s: f64,
    #[validate(range(min = 0.0))]
    pub time_limit_per_day_s: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub gap_rel: f64,
    /// Relative gap once the horizon exceeds `long_horizon_days`
    #[validate(range(min = 0.0, max = 1.0))]
    pub gap_rel_long: f64,
    pub long_horizon_days: f64,
    #[validate(range(min = 1))]
    pub threads: u32,
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            base_time_limit_s: 60.0,
            time_limit_per_day_s: 10.0,
            gap_rel: 0.005,
            gap_rel_long: 0.01,
            long_horizon_days: 7.0,
            threads: 1,
            verbose: false,
        }
    }
}

/// Sparse parameters supplied with a single run (the user-facing input document)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub user: Option<String>,
    pub step_minutes: Option<u32>,
    pub ewh: EwhSpecsOverrides,
    pub tariff: TariffOverrides,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("EWH_FLEX_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Load with the TOML layer read from `path` (a missing file is skipped)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::figment(path).extract().map_err(ConfigError::from)
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("EWH__").split("__"))
    }

    /// Fill a run's sparse parameters with this configuration; run values win
    pub fn with_params(&self, params: &RunParams) -> Config {
        let mut cfg = self.clone();
        if let Some(user) = &params.user {
            cfg.run.user = user.clone();
        }
        if let Some(step) = params.step_minutes {
            cfg.run.step_minutes = step;
        }
        cfg.ewh = cfg.ewh.apply_overrides(&params.ewh);
        cfg.tariff = cfg.tariff.apply_overrides(&params.tariff);
        cfg
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.run.step_minutes == 0 {
            return Err(ConfigError::Inconsistent("step_minutes must be at least 1".to_string()));
        }
        self.ewh.check()?;
        self.tariff.validate()?;
        self.model.validate()?;
        self.solver.validate()?;
        if let Some(m) = self.model.big_m {
            if !(m.is_finite() && m > 0.0) {
                return Err(ConfigError::Inconsistent(format!("big_m must be positive, got {m}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().check().unwrap();
    }

    #[test]
    fn test_overrides_win_and_defaults_fill() {
        let params: RunParams = serde_json::from_str(
            r#"{ "user": "u42", "ewh": { "capacity_l": 150, "comfort_temp_c": 45 } }"#,
        )
        .unwrap();
        let cfg = Config::default().with_params(&params);
        assert_eq!(cfg.run.user, "u42");
        assert_eq!(cfg.ewh.capacity_l, 150.0);
        assert_eq!(cfg.ewh.comfort_temp_c, 45.0);
        // untouched fields keep their defaults
        assert_eq!(cfg.ewh.max_temp_c, 80.0);
        assert_eq!(cfg.tariff.mode, TariffMode::Flat);
        assert_eq!(cfg.run.step_minutes, 1);
    }

    #[test]
    fn test_comfort_must_be_below_max() {
        let specs = EwhSpecs {
            comfort_temp_c: 80.0,
            ..Default::default()
        };
        assert!(matches!(
            specs.check(),
            Err(ConfigError::ComfortNotBelowMax { .. })
        ));
    }

    #[test]
    fn test_capacity_range_rejected() {
        let specs = EwhSpecs {
            capacity_l: 0.0,
            ..Default::default()
        };
        assert!(matches!(specs.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_nameplate_power_plausibility() {
        let mut specs = EwhSpecs::default();
        assert_eq!(specs.nameplate_power_w(), Some(1800.0));
        specs.rated_power_w = Some(100.0);
        assert_eq!(specs.nameplate_power_w(), None);
        specs.rated_power_w = Some(5000.0);
        assert_eq!(specs.nameplate_power_w(), None);
        specs.rated_power_w = None;
        assert_eq!(specs.nameplate_power_w(), None);
    }

    #[test]
    fn test_figment_env_layer() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "ewh.toml",
                r#"
                [ewh]
                capacity_l = 80.0

                [tariff]
                mode = "day_night"
                "#,
            )?;
            jail.set_env("EWH__SOLVER__GAP_REL", "0.02");
            let cfg: Config = Config::figment("ewh.toml").extract()?;
            assert_eq!(cfg.ewh.capacity_l, 80.0);
            assert_eq!(cfg.tariff.mode, TariffMode::DayNight);
            assert_eq!(cfg.solver.gap_rel, 0.02);
            assert_eq!(cfg.ewh.max_temp_c, 80.0);
            Ok(())
        });
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        figment::Jail::expect_with(|_jail| {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
            let shipped = Config::load_from(path).unwrap();
            assert_eq!(
                serde_json::to_value(&shipped).unwrap(),
                serde_json::to_value(Config::default()).unwrap()
            );
            Ok(())
        });
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let cfg = Config::load_from("absent.toml").unwrap();
            assert_eq!(cfg.tariff.timezone, "UTC");
            assert_eq!(cfg.run.step_minutes, 1);
            Ok(())
        });
    }
}
