//! Command-line parsing for the retail data source pipelines.
//!
//! Argument parsing and command dispatch stay separate from the engine and the
//! source clients.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::{
    ApportionConfig, DEFAULT_ESTABLISHMENT_SHARE, DEFAULT_PAYROLL_SHARE, DEFAULT_SHARE_TOLERANCE,
    DEFAULT_VALUE_DECIMALS, DEFAULT_WEIGHT_DECIMALS,
};
use crate::sink::ExportSchema;
use crate::sink::sql::DEFAULT_BATCH_SIZE;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "rds",
    version,
    about = "Retail data sources: Census sales apportionment, FRED indicators, OpenWeather aggregates"
)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch Census CBP + MARTS data, apportion national sales to states, validate and export.
    Census(CensusArgs),
    /// Apportion from a local inputs JSON (metrics, totals, excluded units) without network access.
    Apportion(ApportionArgs),
    /// Fetch and classify FRED economic indicators.
    Fred(FredArgs),
    /// Fetch OpenWeather monthly aggregates for the configured states.
    Weather(WeatherArgs),
    /// Run every source; a failing source is logged and the others still run.
    All(AllArgs),
}

/// Engine constants, overridable per run.
#[derive(Debug, Args, Clone)]
pub struct EngineArgs {
    /// Payroll share of the blended weight.
    #[arg(long, default_value_t = DEFAULT_PAYROLL_SHARE)]
    pub payroll_share: f64,

    /// Establishment-count share of the blended weight.
    #[arg(long, default_value_t = DEFAULT_ESTABLISHMENT_SHARE)]
    pub establishment_share: f64,

    /// Decimal places kept on weights.
    #[arg(long, default_value_t = DEFAULT_WEIGHT_DECIMALS)]
    pub weight_decimals: u32,

    /// Decimal places kept on allocated values.
    #[arg(long, default_value_t = DEFAULT_VALUE_DECIMALS)]
    pub value_decimals: u32,

    /// Lower bound of the accepted per-category share sum.
    #[arg(long, default_value_t = DEFAULT_SHARE_TOLERANCE.0)]
    pub share_min: f64,

    /// Upper bound of the accepted per-category share sum.
    #[arg(long, default_value_t = DEFAULT_SHARE_TOLERANCE.1)]
    pub share_max: f64,
}

impl EngineArgs {
    pub fn to_config(&self) -> ApportionConfig {
        ApportionConfig {
            payroll_share: self.payroll_share,
            establishment_share: self.establishment_share,
            weight_decimals: self.weight_decimals,
            value_decimals: self.value_decimals,
            share_tolerance_low: self.share_min,
            share_tolerance_high: self.share_max,
        }
    }
}

/// Where results go.
#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    /// Directory for JSON outputs.
    #[arg(long, default_value = "output")]
    pub out: PathBuf,

    /// Also write a MERGE load script to this file.
    #[arg(long)]
    pub sql: Option<PathBuf>,

    /// Target schema of the load script.
    #[arg(long, default_value = "RETAIL")]
    pub schema: String,

    /// Rows per MERGE statement.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

/// Options shared by the Census-backed and the offline apportionment.
#[derive(Debug, Args, Clone)]
pub struct ApportionOutputArgs {
    /// Layout of retail_sales.json.
    #[arg(long, value_enum, default_value_t = ExportSchema::Flat)]
    pub format: ExportSchema,

    /// Table prefix for the load script (`<table>_sales`, `<table>_national_totals`, `<table>_metadata`).
    #[arg(long, default_value = "retail_sales")]
    pub table: String,

    /// Write outputs even when validation fails.
    #[arg(long)]
    pub force: bool,

    /// Rows shown in the terminal top-allocation tables.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Debug, Args, Clone)]
pub struct CensusArgs {
    /// Year(s) of national sales to apportion (repeatable; default: current year).
    #[arg(long = "year")]
    pub years: Vec<i32>,

    /// NAICS category code(s) (repeatable; default: 445 and 448).
    #[arg(long = "category")]
    pub categories: Vec<String>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub apportion: ApportionOutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ApportionArgs {
    /// Inputs JSON: `{"metrics": {cat: {unit: {payroll, establishments}}}, "totals": [...], "excluded": [...]}`.
    #[arg(long)]
    pub input: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub apportion: ApportionOutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct FredArgs {
    /// First observation date.
    #[arg(long, default_value = crate::data::fred::DEFAULT_START)]
    pub start: NaiveDate,

    /// Last observation date (default: today).
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// JSON file overriding classification rules per indicator.
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Target table of the load script.
    #[arg(long, default_value = "economic_metrics")]
    pub table: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct WeatherArgs {
    /// First month (1-12).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month_from: u32,

    /// Last month (1-12).
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..=12))]
    pub month_to: u32,

    /// Target table of the load script.
    #[arg(long, default_value = "weather_statistics")]
    pub table: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct AllArgs {
    /// Year(s) of national sales to apportion (default: current year).
    #[arg(long = "year")]
    pub years: Vec<i32>,

    /// Write Census outputs even when validation fails.
    #[arg(long)]
    pub force: bool,

    /// Directory for JSON outputs.
    #[arg(long, default_value = "output")]
    pub out: PathBuf,

    /// Directory for the three load scripts (census.sql, fred.sql, weather.sql).
    #[arg(long)]
    pub sql_dir: Option<PathBuf>,

    /// Target schema of the load scripts.
    #[arg(long, default_value = "RETAIL")]
    pub schema: String,
}
