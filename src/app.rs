//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - turns arguments into engine and sink settings
//! - runs the requested pipeline(s)
//! - prints terminal summaries

use std::path::Path;

use chrono::Datelike;
use clap::Parser;
use tracing::{error, info};

use crate::classify::Classifier;
use crate::cli::{AllArgs, ApportionArgs, CensusArgs, Command, FredArgs, OutputArgs, WeatherArgs};
use crate::domain::reference::{category_label, default_categories};
use crate::domain::{ApportionConfig, Category, CategoryId};
use crate::engine::RunInputs;
use crate::error::{AppError, EXIT_CONFIG};
use crate::sink::ExportSchema;
use crate::sink::json::read_json;
use crate::sink::sql::{DEFAULT_BATCH_SIZE, SqlTarget};

pub mod pipeline;

use pipeline::{CensusOutput, SinkSettings, SqlOutput, Written};

/// Entry point for the `rds` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    crate::logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Census(args) => handle_census(args),
        Command::Apportion(args) => handle_apportion(args),
        Command::Fred(args) => handle_fred(args),
        Command::Weather(args) => handle_weather(args),
        Command::All(args) => handle_all(args),
    }
}

fn handle_census(args: CensusArgs) -> Result<(), AppError> {
    let config = engine_config(&args.engine.to_config())?;
    let sink = sink_settings(&args.output, &args.apportion.table)?;
    let categories = categories_from_args(&args.categories);
    let years = years_or_current(&args.years);

    let output = pipeline::run_census(&years, categories, config)?;
    finish_census(&output, &sink, args.apportion.format, args.apportion.force, args.apportion.top)
}

fn handle_apportion(args: ApportionArgs) -> Result<(), AppError> {
    let config = engine_config(&args.engine.to_config())?;
    let sink = sink_settings(&args.output, &args.apportion.table)?;
    let inputs: RunInputs = read_json(&args.input)?;

    let ids: Vec<String> = inputs.metrics.keys().map(|c| c.to_string()).collect();
    let categories = categories_from_args(&ids);
    let output = pipeline::run_apportionment(&inputs, config, categories, chrono::Local::now().date_naive())?;
    finish_census(&output, &sink, args.apportion.format, args.apportion.force, args.apportion.top)
}

fn finish_census(
    output: &CensusOutput,
    sink: &SinkSettings,
    schema: ExportSchema,
    force: bool,
    top_n: usize,
) -> Result<(), AppError> {
    println!(
        "{}",
        crate::report::format_census_summary(&output.run, &output.units, &output.categories, top_n)
    );
    let written = pipeline::write_census_outputs(output, sink, schema, force)?;
    log_written(&written);
    Ok(())
}

fn handle_fred(args: FredArgs) -> Result<(), AppError> {
    let sink = sink_settings(&args.output, &args.table)?;
    let classifier = classifier_from(args.rules.as_deref())?;
    let end = args.end.unwrap_or_else(|| chrono::Local::now().date_naive());
    if end < args.start {
        return Err(AppError::new(
            EXIT_CONFIG,
            format!("--end ({end}) is before --start ({}).", args.start),
        ));
    }

    let months = pipeline::run_fred(&classifier, args.start, end)?;
    println!("{}", crate::report::format_economic_summary(&months));
    log_written(&pipeline::write_fred_outputs(&months, &sink)?);
    Ok(())
}

fn handle_weather(args: WeatherArgs) -> Result<(), AppError> {
    if args.month_from > args.month_to {
        return Err(AppError::new(
            EXIT_CONFIG,
            format!("--month-from ({}) is after --month-to ({}).", args.month_from, args.month_to),
        ));
    }
    let sink = sink_settings(&args.output, &args.table)?;

    let states = pipeline::run_weather(args.month_from..=args.month_to)?;
    println!("{}", crate::report::format_weather_summary(&states));
    log_written(&pipeline::write_weather_outputs(&states, &sink)?);
    Ok(())
}

/// Run FRED, Census and weather in turn with default settings.
///
/// A failing source does not stop the others; the first failure's exit code is
/// returned once all have run.
fn handle_all(args: AllArgs) -> Result<(), AppError> {
    let sink_for = |name: &str, table: &str| -> Result<SinkSettings, AppError> {
        let sql = match &args.sql_dir {
            Some(dir) => Some(SqlOutput {
                path: dir.join(format!("{name}.sql")),
                target: SqlTarget::new(&args.schema, table)?,
                batch_size: DEFAULT_BATCH_SIZE,
            }),
            None => None,
        };
        Ok(SinkSettings {
            out_dir: args.out.clone(),
            sql,
        })
    };

    let fred = || -> Result<(), AppError> {
        let sink = sink_for("fred", "economic_metrics")?;
        let start = chrono::NaiveDate::parse_from_str(crate::data::fred::DEFAULT_START, "%Y-%m-%d")
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Invalid default start date: {e}")))?;
        let months = pipeline::run_fred(&Classifier::default(), start, chrono::Local::now().date_naive())?;
        println!("{}", crate::report::format_economic_summary(&months));
        log_written(&pipeline::write_fred_outputs(&months, &sink)?);
        Ok(())
    };

    let census = || -> Result<(), AppError> {
        let sink = sink_for("census", "retail_sales")?;
        let output = pipeline::run_census(
            &years_or_current(&args.years),
            default_categories(),
            ApportionConfig::default(),
        )?;
        finish_census(&output, &sink, ExportSchema::Flat, args.force, 10)
    };

    let weather = || -> Result<(), AppError> {
        let sink = sink_for("weather", "weather_statistics")?;
        let states = pipeline::run_weather(1..=12)?;
        println!("{}", crate::report::format_weather_summary(&states));
        log_written(&pipeline::write_weather_outputs(&states, &sink)?);
        Ok(())
    };

    let mut failures: Vec<(&str, AppError)> = Vec::new();
    for (name, result) in [("fred", fred()), ("census", census()), ("weather", weather())] {
        match result {
            Ok(()) => info!(source = name, "source finished"),
            Err(err) => {
                error!(source = name, error = %err, "source failed");
                failures.push((name, err));
            }
        }
    }

    let Some((_, first)) = failures.first() else {
        return Ok(());
    };
    let names: Vec<&str> = failures.iter().map(|(n, _)| *n).collect();
    Err(AppError::new(
        first.exit_code(),
        format!("{} of 3 sources failed: {}.", failures.len(), names.join(", ")),
    ))
}

fn engine_config(config: &ApportionConfig) -> Result<ApportionConfig, AppError> {
    config.check()?;
    Ok(*config)
}

fn sink_settings(output: &OutputArgs, table: &str) -> Result<SinkSettings, AppError> {
    let sql = match &output.sql {
        Some(path) => Some(SqlOutput {
            path: path.clone(),
            target: SqlTarget::new(&output.schema, table)?,
            batch_size: output.batch_size.max(1),
        }),
        None => None,
    };
    Ok(SinkSettings {
        out_dir: output.out.clone(),
        sql,
    })
}

fn classifier_from(rules: Option<&Path>) -> Result<Classifier, AppError> {
    match rules {
        Some(path) => Classifier::from_json_file(path),
        None => Ok(Classifier::default()),
    }
}

/// Requested categories, or the built-in pair when none are given.
pub fn categories_from_args(codes: &[String]) -> Vec<Category> {
    if codes.is_empty() {
        return default_categories();
    }
    codes
        .iter()
        .map(|code| {
            let id = CategoryId::new(code.trim());
            let label = category_label(&id).unwrap_or(id.as_str()).to_string();
            Category { id, label }
        })
        .collect()
}

fn years_or_current(years: &[i32]) -> Vec<i32> {
    if years.is_empty() {
        vec![chrono::Local::now().year()]
    } else {
        years.to_vec()
    }
}

fn log_written(written: &Written) {
    for path in &written.files {
        info!(path = %path.display(), "wrote output");
    }
}
