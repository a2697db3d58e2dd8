//! Shared pipeline logic used by the single-source commands and by `rds all`.
//!
//! Census: CBP + MARTS fetch -> normalize -> apportion -> validate -> JSON / SQL
//! FRED: series fetch -> monthly panel -> classify -> JSON / SQL
//! Weather: per-state monthly fetch -> JSON / SQL

use std::ops::RangeInclusive;
use std::path::PathBuf;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::data::census::CensusClient;
use crate::data::fred::FredClient;
use crate::data::weather::{DEFAULT_LOCATIONS, StateWeather, WeatherClient};
use crate::domain::economic::EconomicMonth;
use crate::domain::reference::{excluded_territories, state_table};
use crate::domain::{ApportionConfig, Category, UnitTable};
use crate::engine::{ApportionRun, Apportioner, RunInputs, run as run_engine};
use crate::error::{AppError, EXIT_DATA, EXIT_VALIDATION};
use crate::sink::ExportSchema;
use crate::sink::json::{self, RetailMetadata};
use crate::sink::sql::{self, SqlTarget};

/// Load script destination.
#[derive(Debug, Clone)]
pub struct SqlOutput {
    pub path: PathBuf,
    pub target: SqlTarget,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub out_dir: PathBuf,
    pub sql: Option<SqlOutput>,
}

/// Everything one apportionment produced, plus the tables it ran against.
#[derive(Debug, Clone)]
pub struct CensusOutput {
    pub run: ApportionRun,
    pub units: UnitTable,
    pub categories: Vec<Category>,
    pub metadata: RetailMetadata,
}

/// Files written by a sink step.
#[derive(Debug, Clone, Default)]
pub struct Written {
    pub files: Vec<PathBuf>,
}

/// Fetch CBP metrics per category and MARTS totals per year and category.
///
/// Categories are fetched in parallel. A category whose metrics cannot be fetched
/// is left out; a missing year of totals is logged and skipped.
pub fn fetch_census_inputs(client: &CensusClient, years: &[i32], categories: &[Category]) -> Result<RunInputs, AppError> {
    let fetched: Vec<_> = categories
        .par_iter()
        .map(|category| {
            let metrics = match client.fetch_unit_metrics(&category.id) {
                Ok(m) => m,
                Err(err) => {
                    warn!(category = %category.id, error = %err, "CBP metrics unavailable; category skipped");
                    return None;
                }
            };
            let mut totals = Vec::new();
            for year in years {
                match client.fetch_national_totals(*year, &category.id) {
                    Ok(t) => totals.extend(t),
                    Err(err) => warn!(category = %category.id, year, error = %err, "MARTS totals unavailable"),
                }
            }
            Some((category.id.clone(), metrics, totals))
        })
        .collect();

    let mut inputs = RunInputs {
        excluded: excluded_territories(),
        ..RunInputs::default()
    };
    for (category, metrics, totals) in fetched.into_iter().flatten() {
        inputs.metrics.insert(category, metrics);
        inputs.totals.extend(totals);
    }

    if inputs.metrics.is_empty() {
        return Err(AppError::new(EXIT_DATA, "No Census category data could be fetched."));
    }
    Ok(inputs)
}

/// Run the engine over materialized inputs against the state reference table.
pub fn run_apportionment(
    inputs: &RunInputs,
    config: ApportionConfig,
    categories: Vec<Category>,
    last_updated: NaiveDate,
) -> Result<CensusOutput, AppError> {
    let units = state_table();
    let engine = Apportioner::new(config, &units)?;
    let run = run_engine(&engine, inputs);
    info!(
        allocations = run.allocations.len(),
        skipped = run.skipped.len(),
        valid = run.report.is_valid(),
        "apportionment finished"
    );

    let metadata = RetailMetadata::new(last_updated, &categories);
    Ok(CensusOutput {
        run,
        units,
        categories,
        metadata,
    })
}

pub fn run_census(years: &[i32], categories: Vec<Category>, config: ApportionConfig) -> Result<CensusOutput, AppError> {
    let client = CensusClient::from_env()?;
    let inputs = fetch_census_inputs(&client, years, &categories)?;
    run_apportionment(&inputs, config, categories, chrono::Local::now().date_naive())
}

/// Write the validation report, then the sales outputs if the run is valid.
///
/// An invalid run is refused with exit code 3 unless `force` is set; the
/// validation report is written either way.
pub fn write_census_outputs(
    output: &CensusOutput,
    sink: &SinkSettings,
    schema: ExportSchema,
    force: bool,
) -> Result<Written, AppError> {
    let mut written = Written::default();
    written.files.push(json::write_validation(&sink.out_dir, &output.run)?);

    if !output.run.report.is_valid() {
        let failing: Vec<String> = output
            .run
            .report
            .failing_periods()
            .iter()
            .map(|p| p.to_string())
            .collect();
        if !force {
            return Err(AppError::new(
                EXIT_VALIDATION,
                format!(
                    "Validation failed for {}; sales not written (see {}, or rerun with --force).",
                    failing.join(", "),
                    json::VALIDATION_FILE
                ),
            ));
        }
        warn!(periods = %failing.join(", "), "validation failed; writing outputs anyway");
    }

    written.files.push(json::write_retail_sales(
        &sink.out_dir,
        &output.run,
        &output.units,
        &output.metadata,
        schema,
    )?);

    if let Some(sql_out) = &sink.sql {
        let script = sql::census_script(
            &sql_out.target,
            &output.run,
            &output.units,
            &output.metadata,
            sql_out.batch_size,
        );
        script.write(&sql_out.path)?;
        written.files.push(sql_out.path.clone());
    }

    Ok(written)
}

pub fn run_fred(classifier: &Classifier, start: NaiveDate, end: NaiveDate) -> Result<Vec<EconomicMonth>, AppError> {
    let client = FredClient::from_env()?;
    let panel = client.fetch_panel(start, end)?;
    let months = classifier.classify_panel(&panel);
    info!(months = months.len(), "classified FRED panel");
    Ok(months)
}

pub fn write_fred_outputs(months: &[EconomicMonth], sink: &SinkSettings) -> Result<Written, AppError> {
    let mut written = Written::default();
    written.files.push(json::write_economic(&sink.out_dir, months)?);
    if let Some(sql_out) = &sink.sql {
        sql::economic_script(&sql_out.target, months, sql_out.batch_size).write(&sql_out.path)?;
        written.files.push(sql_out.path.clone());
    }
    Ok(written)
}

pub fn run_weather(months: RangeInclusive<u32>) -> Result<Vec<StateWeather>, AppError> {
    let client = WeatherClient::from_env()?;
    let states = client.fetch_states(&DEFAULT_LOCATIONS, months);
    if states.iter().all(|s| s.months.is_empty()) {
        return Err(AppError::new(EXIT_DATA, "No weather data could be fetched."));
    }
    Ok(states)
}

pub fn write_weather_outputs(states: &[StateWeather], sink: &SinkSettings) -> Result<Written, AppError> {
    let mut written = Written::default();
    written.files.push(json::write_weather(&sink.out_dir, states)?);
    if let Some(sql_out) = &sink.sql {
        sql::weather_script(&sql_out.target, states, sql_out.batch_size).write(&sql_out.path)?;
        written.files.push(sql_out.path.clone());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::domain::reference::default_categories;
    use crate::domain::{CategoryId, Period, PeriodTotal, RawMetrics, UnitId};

    fn last_updated() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    /// Every state with identical metrics, plus Puerto Rico, over two months.
    fn full_inputs() -> RunInputs {
        let mut metrics: BTreeMap<UnitId, RawMetrics> = state_table()
            .iter()
            .map(|u| {
                (
                    u.id.clone(),
                    RawMetrics {
                        payroll: 1_000.0,
                        establishments: 10.0,
                    },
                )
            })
            .collect();
        metrics.insert(
            UnitId::from("72"),
            RawMetrics {
                payroll: 5_000_000.0,
                establishments: 900.0,
            },
        );
        RunInputs {
            metrics: BTreeMap::from([(CategoryId::from("445"), metrics)]),
            totals: vec![
                PeriodTotal {
                    period: Period::new(2024, 1).unwrap(),
                    category: "445".into(),
                    value: 51_000.0,
                },
                PeriodTotal {
                    period: Period::new(2024, 2).unwrap(),
                    category: "445".into(),
                    value: 52_000.0,
                },
            ],
            excluded: excluded_territories(),
        }
    }

    fn sink(dir: &std::path::Path, with_sql: bool) -> SinkSettings {
        SinkSettings {
            out_dir: dir.join("out"),
            sql: with_sql.then(|| SqlOutput {
                path: dir.join("census.sql"),
                target: SqlTarget::new("RETAIL", "retail_sales").unwrap(),
                batch_size: 20,
            }),
        }
    }

    #[test]
    fn valid_run_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let output =
            run_apportionment(&full_inputs(), ApportionConfig::default(), default_categories(), last_updated())
                .unwrap();
        assert!(output.run.report.is_valid());
        assert_eq!(output.run.allocations.len(), 51 * 2);

        let written = write_census_outputs(&output, &sink(dir.path(), true), ExportSchema::Flat, false).unwrap();
        assert_eq!(written.files.len(), 3);
        assert!(written.files.iter().all(|f| f.exists()));

        let sql = std::fs::read_to_string(dir.path().join("census.sql")).unwrap();
        // 102 sales rows in batches of 20.
        assert_eq!(sql.matches("MERGE INTO RETAIL.retail_sales_sales").count(), 6);
        assert!(!sql.contains("'72'"));
    }

    #[test]
    fn invalid_run_is_refused_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = full_inputs();
        // Only three states reported.
        for metrics in inputs.metrics.values_mut() {
            metrics.retain(|id, _| ["01", "02", "04"].contains(&id.as_str()));
        }
        let output =
            run_apportionment(&inputs, ApportionConfig::default(), default_categories(), last_updated()).unwrap();
        assert!(!output.run.report.is_valid());

        let settings = sink(dir.path(), true);
        let err = write_census_outputs(&output, &settings, ExportSchema::Flat, false).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        assert!(err.message().contains("2024-01"));
        // The report is written; the sales and the script are not.
        assert!(settings.out_dir.join(json::VALIDATION_FILE).exists());
        assert!(!settings.out_dir.join(json::RETAIL_SALES_FILE).exists());
        assert!(!dir.path().join("census.sql").exists());

        let written = write_census_outputs(&output, &settings, ExportSchema::Nested, true).unwrap();
        assert_eq!(written.files.len(), 3);
        assert!(settings.out_dir.join(json::RETAIL_SALES_FILE).exists());
    }

    #[test]
    fn bad_engine_config_is_rejected() {
        let config = ApportionConfig {
            payroll_share: 0.7,
            ..ApportionConfig::default()
        };
        let err = run_apportionment(&full_inputs(), config, default_categories(), last_updated()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG);
    }

    #[test]
    fn fred_and_weather_outputs_land_in_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SinkSettings {
            out_dir: dir.path().to_path_buf(),
            sql: None,
        };
        let written = write_fred_outputs(&[], &settings).unwrap();
        assert_eq!(written.files, vec![dir.path().join(json::ECONOMIC_FILE)]);
        let written = write_weather_outputs(&[], &settings).unwrap();
        assert_eq!(written.files, vec![dir.path().join(json::WEATHER_FILE)]);
    }
}
