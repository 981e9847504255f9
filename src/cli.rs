use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Run input document (JSON): usage data, optional prices and per-run parameters.
    pub input: PathBuf,

    /// Where to write the results (JSON). Printed to stdout when omitted.
    pub output: Option<PathBuf>,

    /// TOML configuration layer. Missing files are skipped.
    #[clap(long, env = "EWH_FLEX_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[clap(long, value_enum, env = "EWH_FLEX_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Human readable
    Pretty,
}
