use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use ewh_flex::cli::{Args, LogFormat};
use ewh_flex::{config::Config, pipeline::{EwhOptimizer, RunInput}, telemetry};
use tracing::{info, warn};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    match args.log_format {
        LogFormat::Json => telemetry::init_tracing(),
        LogFormat::Pretty => telemetry::init_tracing_pretty(),
    }

    let cfg = Config::load_from(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let input: RunInput = serde_json::from_str(&raw)
        .with_context(|| format!("invalid run input in {}", args.input.display()))?;

    let result = EwhOptimizer::new(cfg)
        .run(&input)
        .context("optimisation run failed")?;

    if result.surrogate.degraded {
        warn!(
            r_squared_above = result.surrogate.r_squared_above,
            r_squared_below = result.surrogate.r_squared_below,
            "schedule built on a degraded surrogate fit"
        );
    }

    let json = serde_json::to_string_pretty(&result)?;
    match args.output {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), status = %result.status, "results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
