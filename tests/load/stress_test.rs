//! Multi-day horizons against the solve budget.
//!
//! The budget grows with the horizon (base plus a per-day allowance) and the
//! relative gap loosens past a week, so these check that long runs still come
//! back with a usable schedule inside that allowance.

use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, TimeZone, Utc};
use ewh_flex::config::{Config, EwhSpecsOverrides, RunParams};
use ewh_flex::optimizer::SolveBudget;
use ewh_flex::pipeline::{EwhOptimizer, RunInput};
use ewh_flex::preprocess::LoadSample;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

/// One-minute thermostat trace: morning and evening reheats at 2 kW
fn measured_week(days: i64) -> Vec<LoadSample> {
    (0..days * 1440)
        .map(|m| {
            let minute_of_day = m % 1440;
            let heating = (390..410).contains(&minute_of_day) || (1140..1165).contains(&minute_of_day);
            LoadSample {
                timestamp: start() + Duration::minutes(m),
                load_w: if heating { 2000.0 } else { 0.0 },
            }
        })
        .collect()
}

fn input(days: i64, step_minutes: u32) -> RunInput {
    RunInput::measured(measured_week(days)).with_params(RunParams {
        step_minutes: Some(step_minutes),
        ewh: EwhSpecsOverrides {
            rated_power_w: Some(2000.0),
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Week at 15 minute resolution
#[test]
#[ignore] // slow
fn test_week_at_quarter_hours() {
    let config = Config::default();
    let started = Instant::now();
    let result = EwhOptimizer::new(config.clone()).run(&input(7, 15)).unwrap();
    let elapsed = started.elapsed();

    println!("7 days @ 15 min: {:?} status={} objective={:.4}", elapsed, result.status, result.objective_value);

    assert!(result.status.is_usable());
    assert_eq!(result.steps.len(), 7 * 96);
    assert!((result.period.days - 7.0).abs() < 1e-9);

    let budget = SolveBudget::for_horizon(&config.solver, 7.0);
    // model build and extraction on top of the solver limit
    let allowance = StdDuration::from_secs_f64(budget.time_limit_s + 30.0);
    assert!(elapsed < allowance, "run took {elapsed:?}, budget {allowance:?}");
}

/// Three days at full one-minute resolution
#[test]
#[ignore] // slow
fn test_three_days_minute_resolution() {
    let config = Config::default();
    let started = Instant::now();
    let result = EwhOptimizer::new(config.clone()).run(&input(3, 1)).unwrap();
    let elapsed = started.elapsed();

    println!("3 days @ 1 min: {:?} status={}", elapsed, result.status);

    assert!(result.status.is_usable());
    assert_eq!(result.steps.len(), 3 * 1440);
    assert!(result.kpis.optimized_load_kwh > 0.0);

    let budget = SolveBudget::for_horizon(&config.solver, 3.0);
    let allowance = StdDuration::from_secs_f64(budget.time_limit_s + 30.0);
    assert!(elapsed < allowance, "run took {elapsed:?}, budget {allowance:?}");
}

/// Past a week the gap loosens
#[test]
#[ignore] // slow
fn test_ten_days_uses_long_horizon_gap() {
    let config = Config::default();
    let budget = SolveBudget::for_horizon(&config.solver, 10.0);
    assert_eq!(budget.gap_rel, config.solver.gap_rel_long);

    let result = EwhOptimizer::new(config).run(&input(10, 30)).unwrap();
    assert!(result.status.is_usable());
    assert_eq!(result.steps.len(), 10 * 48);
}
