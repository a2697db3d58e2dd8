//! JSON documents written after each run.
//!
//! Retail sales come in two layouts (see `ExportSchema`):
//!
//! - flat (`schema_version: 2`): metadata, national totals and allocations as lists
//! - nested: `sales_data[YYYY-MM].states[ABBR][category] = {sales_value, state_share}`
//!   plus `sales_data[YYYY-MM].national_total[category]`
//!
//! The validation report always goes to its own file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::weather::{MonthlyWeather, StateWeather};
use crate::domain::economic::{Classification, EconomicMonth, Indicator};
use crate::domain::{AllocationSet, Category, CategoryId, Period, PeriodTotal, TotalTable, UnitTable, ValidationReport};
use crate::engine::ApportionRun;
use crate::error::{AppError, EXIT_CONFIG};
use crate::sink::ExportSchema;

pub const RETAIL_SALES_FILE: &str = "retail_sales.json";
pub const VALIDATION_FILE: &str = "retail_sales_validation.json";
pub const ECONOMIC_FILE: &str = "economic_metrics.json";
pub const WEATHER_FILE: &str = "weather_statistics.json";

pub const FLAT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailMetadata {
    pub last_updated: NaiveDate,
    pub categories: BTreeMap<CategoryId, String>,
}

impl RetailMetadata {
    pub fn new(last_updated: NaiveDate, categories: &[Category]) -> Self {
        Self {
            last_updated,
            categories: categories.iter().map(|c| (c.id.clone(), c.label.clone())).collect(),
        }
    }
}

#[derive(Serialize)]
struct FlatRetailDocument<'a> {
    schema_version: u32,
    metadata: &'a RetailMetadata,
    national_totals: Vec<PeriodTotal>,
    allocations: &'a AllocationSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSales {
    pub sales_value: f64,
    pub state_share: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedMonth {
    pub states: BTreeMap<String, BTreeMap<CategoryId, NestedSales>>,
    pub national_total: BTreeMap<CategoryId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedRetailDocument {
    pub metadata: RetailMetadata,
    pub sales_data: BTreeMap<Period, NestedMonth>,
}

#[derive(Serialize)]
struct ValidationDocument<'a> {
    generated_at: String,
    is_valid: bool,
    failing_periods: Vec<Period>,
    skipped: Vec<SkippedEntry>,
    report: &'a ValidationReport,
}

#[derive(Serialize)]
struct SkippedEntry {
    scope: String,
    reason: String,
}

pub fn national_totals(totals: &TotalTable) -> Vec<PeriodTotal> {
    totals
        .iter()
        .map(|((period, category), value)| PeriodTotal {
            period: *period,
            category: category.clone(),
            value: *value,
        })
        .collect()
}

/// Fold flat allocations into the month/state/category tree.
///
/// States are keyed by display code; units missing from `units` keep their id.
pub fn build_nested(
    allocations: &AllocationSet,
    totals: &TotalTable,
    units: &UnitTable,
    metadata: &RetailMetadata,
) -> NestedRetailDocument {
    let mut sales_data: BTreeMap<Period, NestedMonth> = BTreeMap::new();

    for ((period, category), value) in totals {
        sales_data
            .entry(*period)
            .or_default()
            .national_total
            .insert(category.clone(), *value);
    }

    for a in allocations.iter() {
        sales_data
            .entry(a.period)
            .or_default()
            .states
            .entry(units.display_code(&a.unit).to_string())
            .or_default()
            .insert(
                a.category.clone(),
                NestedSales {
                    sales_value: a.value,
                    state_share: a.share,
                },
            );
    }

    NestedRetailDocument {
        metadata: metadata.clone(),
        sales_data,
    }
}

pub fn write_retail_sales(
    dir: &Path,
    run: &ApportionRun,
    units: &UnitTable,
    metadata: &RetailMetadata,
    schema: ExportSchema,
) -> Result<PathBuf, AppError> {
    let path = dir.join(RETAIL_SALES_FILE);
    match schema {
        ExportSchema::Flat => {
            let doc = FlatRetailDocument {
                schema_version: FLAT_SCHEMA_VERSION,
                metadata,
                national_totals: national_totals(&run.totals),
                allocations: &run.allocations,
            };
            write_json(&path, &doc)?;
        }
        ExportSchema::Nested => {
            let doc = build_nested(&run.allocations, &run.totals, units, metadata);
            write_json(&path, &doc)?;
        }
    }
    Ok(path)
}

pub fn write_validation(dir: &Path, run: &ApportionRun) -> Result<PathBuf, AppError> {
    let path = dir.join(VALIDATION_FILE);
    let doc = ValidationDocument {
        generated_at: chrono::Local::now().to_rfc3339(),
        is_valid: run.report.is_valid(),
        failing_periods: run.report.failing_periods(),
        skipped: run
            .skipped
            .iter()
            .map(|s| SkippedEntry {
                scope: s.scope.to_string(),
                reason: s.reason.to_string(),
            })
            .collect(),
        report: &run.report,
    };
    write_json(&path, &doc)?;
    Ok(path)
}

/// `{ "YYYY-MM": { indicator: classification } }`
pub fn write_economic(dir: &Path, months: &[EconomicMonth]) -> Result<PathBuf, AppError> {
    let path = dir.join(ECONOMIC_FILE);
    let doc: BTreeMap<Period, &BTreeMap<Indicator, Classification>> =
        months.iter().map(|m| (m.period, &m.metrics)).collect();
    write_json(&path, &doc)?;
    Ok(path)
}

/// `{ "CA": { "1": monthly stats } }`
pub fn write_weather(dir: &Path, states: &[StateWeather]) -> Result<PathBuf, AppError> {
    let path = dir.join(WEATHER_FILE);
    let doc: BTreeMap<&str, &BTreeMap<u32, MonthlyWeather>> =
        states.iter().map(|s| (s.state.as_str(), &s.months)).collect();
    write_json(&path, &doc)?;
    Ok(path)
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::new(EXIT_CONFIG, format!("Failed to create directory '{}': {e}", parent.display()))
        })?;
    }
    let file = File::create(path)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, value)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to write '{}': {e}", path.display())))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open '{}': {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Invalid JSON in '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reference::{default_categories, state_table};
    use crate::domain::{ApportionConfig, RawMetrics, UnitId};
    use crate::engine::{Apportioner, RunInputs, run};
    use serde_json::Value;

    fn sample_run(units: &UnitTable) -> ApportionRun {
        let engine = Apportioner::new(ApportionConfig::default(), units).unwrap();
        let metrics = BTreeMap::from([
            (UnitId::from("01"), RawMetrics { payroll: 60.0, establishments: 40.0 }),
            (UnitId::from("02"), RawMetrics { payroll: 30.0, establishments: 40.0 }),
            (UnitId::from("04"), RawMetrics { payroll: 10.0, establishments: 20.0 }),
        ]);
        let inputs = RunInputs {
            metrics: BTreeMap::from([(CategoryId::from("445"), metrics)]),
            totals: vec![PeriodTotal {
                period: Period::new(2024, 1).unwrap(),
                category: "445".into(),
                value: 1000.0,
            }],
            excluded: Default::default(),
        };
        run(&engine, &inputs)
    }

    fn metadata() -> RetailMetadata {
        RetailMetadata::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), &default_categories())
    }

    #[test]
    fn flat_document_is_versioned() {
        let dir = tempfile::tempdir().unwrap();
        let units = state_table();
        let run = sample_run(&units);

        let path = write_retail_sales(dir.path(), &run, &units, &metadata(), ExportSchema::Flat).unwrap();
        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["schema_version"], 2);
        assert_eq!(doc["metadata"]["last_updated"], "2024-06-01");
        assert_eq!(doc["metadata"]["categories"]["445"], "Food and Beverage Stores");
        assert_eq!(doc["national_totals"][0]["value"], 1000.0);
        let allocations = doc["allocations"].as_array().unwrap();
        assert_eq!(allocations.len(), 3);
        assert_eq!(allocations[0]["unit"], "01");
        assert_eq!(allocations[0]["period"], "2024-01");
        assert_eq!(allocations[0]["value"], 520.0);
    }

    #[test]
    fn nested_document_groups_by_month_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let units = state_table();
        let run = sample_run(&units);

        let path = write_retail_sales(dir.path(), &run, &units, &metadata(), ExportSchema::Nested).unwrap();
        let doc: NestedRetailDocument = read_json(&path).unwrap();
        let jan = &doc.sales_data[&Period::new(2024, 1).unwrap()];
        assert_eq!(jan.national_total[&CategoryId::from("445")], 1000.0);
        let al = &jan.states["AL"][&CategoryId::from("445")];
        assert_eq!(al.sales_value, 520.0);
        assert_eq!(al.state_share, 0.52);
        assert_eq!(jan.states.len(), 3);
    }

    #[test]
    fn validation_document_carries_verdict() {
        let dir = tempfile::tempdir().unwrap();
        // Three-state run validated against all 51 units: incomplete.
        let units = state_table();
        let run = sample_run(&units);

        let path = write_validation(dir.path(), &run).unwrap();
        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["is_valid"], false);
        assert_eq!(doc["failing_periods"][0], "2024-01");
        assert_eq!(
            doc["report"]["periods"]["2024-01"]["missing_units"].as_array().unwrap().len(),
            48
        );
        assert!(doc["generated_at"].is_string());
    }

    #[test]
    fn economic_document_is_keyed_by_month() {
        let dir = tempfile::tempdir().unwrap();
        let month = EconomicMonth {
            period: Period::new(2024, 3).unwrap(),
            metrics: BTreeMap::from([(
                Indicator::UnemploymentRate,
                Classification {
                    value: Some(3.9),
                    category: "low_unemployment".into(),
                    description: "d".into(),
                    impact: "i".into(),
                    label: "Unemployment Rate (UNRATE)".into(),
                },
            )]),
        };
        let path = write_economic(dir.path(), &[month]).unwrap();
        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["2024-03"]["unemployment_rate"]["category"], "low_unemployment");
    }

    #[test]
    fn writer_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out").join("weather");
        let states = vec![StateWeather {
            state: "TX".into(),
            months: BTreeMap::from([(1, MonthlyWeather { month: 1, ..Default::default() })]),
        }];
        let path = write_weather(&nested, &states).unwrap();
        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["TX"]["1"]["month"], 1);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Value>(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }
}
