//! # ewh-flex
//!
//! Computes an optimal ON/OFF (or fractional power) operating schedule for a storage-type
//! electric water heater (EWH) over a finite horizon, minimising energy cost and comfort
//! violations against the tank's thermal dynamics, hot-water draws and a tariff.
//!
//! ## Pipeline
//!
//! - **config / domain::ewh**: layered configuration, derived tank geometry and energy bounds
//! - **preprocess**: measured load or manual calendar into a uniform draw/price [`domain::TimeSeries`]
//! - **optimizer::surrogate**: piecewise-linear regression of the water-mixing physics
//! - **optimizer::formulation / solver**: MILP build and HiGHS solve
//! - **results**: schedule extraction, flexibility and savings KPIs
//!
//! ```no_run
//! use ewh_flex::{config::Config, pipeline::{EwhOptimizer, RunInput}, preprocess::DrawEvent};
//! use chrono::{TimeZone, Utc};
//!
//! let config = Config::load()?;
//! let input = RunInput::calendar(vec![DrawEvent {
//!     start: Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap(),
//!     duration_minutes: 5,
//! }]);
//! let result = EwhOptimizer::new(config).run(&input)?;
//! println!("{}", result.kpis.total_flexibility_min);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod preprocess;
pub mod results;
pub mod telemetry;

pub use error::EwhFlexError;
