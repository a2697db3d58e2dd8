//! Census Bureau API integration.
//!
//! - County Business Patterns (CBP): payroll and establishment counts per state for
//!   one NAICS category. These feed the weight normalizer.
//! - Monthly Retail Trade (MARTS): national monthly sales per category.
//!
//! Both endpoints answer with a JSON table: an array of rows, header row first.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{CategoryId, Period, PeriodTotal, RawMetrics, UnitId};
use crate::error::{AppError, EXIT_CONFIG, EXIT_DATA};

const CBP_URL: &str = "https://api.census.gov/data/2021/cbp";
const MARTS_URL: &str = "https://api.census.gov/data/timeseries/eits/marts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// MARTS rows kept: monthly sales, not seasonally adjusted.
const MARTS_SALES_CODE: &str = "SM";
const MARTS_NOT_ADJUSTED: &str = "no";

/// Raw API table: header row followed by data rows.
pub type CensusTable = Vec<Vec<Value>>;

pub struct CensusClient {
    client: Client,
    api_key: String,
}

impl CensusClient {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("CENSUS_API_KEY")
            .map_err(|_| AppError::new(EXIT_CONFIG, "Missing CENSUS_API_KEY in environment (.env)."))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }

    /// Per-state payroll and establishment counts for one category.
    ///
    /// Territories are returned as-is; excluding them is the engine's job.
    pub fn fetch_unit_metrics(&self, category: &CategoryId) -> Result<BTreeMap<UnitId, RawMetrics>, AppError> {
        let table = self.get_table(
            CBP_URL,
            &[
                ("get", "GEO_ID,NAICS2017,ESTAB,PAYANN"),
                ("for", "state:*"),
                ("NAICS2017", category.as_str()),
            ],
        )?;
        let metrics = parse_cbp_table(&table)?;
        debug!(%category, units = metrics.len(), "fetched CBP metrics");
        Ok(metrics)
    }

    /// Monthly national sales for one category over one year.
    pub fn fetch_national_totals(&self, year: i32, category: &CategoryId) -> Result<Vec<PeriodTotal>, AppError> {
        let year = year.to_string();
        let table = self.get_table(
            MARTS_URL,
            &[
                ("get", "data_type_code,seasonally_adj,category_code,cell_value,error_data"),
                ("time", year.as_str()),
                ("category_code", category.as_str()),
            ],
        )?;
        let totals = parse_marts_table(&table, category)?;
        debug!(%category, %year, months = totals.len(), "fetched MARTS totals");
        Ok(totals)
    }

    fn get_table(&self, url: &str, params: &[(&str, &str)]) -> Result<CensusTable, AppError> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .map_err(|e| AppError::new(EXIT_DATA, format!("Census request failed: {e}")))?;

        // The API answers an empty selection with 204 and no body.
        if resp.status() == StatusCode::NO_CONTENT {
            warn!(url, "Census API returned no content");
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(AppError::new(
                EXIT_DATA,
                format!("Census request failed with status {}.", resp.status()),
            ));
        }

        resp.json()
            .map_err(|e| AppError::new(EXIT_DATA, format!("Failed to parse Census response: {e}")))
    }
}

/// Column positions of a table, by header name. The first occurrence wins;
/// predicate columns are echoed back a second time by the API.
struct Header<'a> {
    names: Vec<&'a str>,
}

impl<'a> Header<'a> {
    fn new(row: &'a [Value]) -> Self {
        Self {
            names: row.iter().map(|v| v.as_str().unwrap_or("")).collect(),
        }
    }

    fn position(&self, name: &str) -> Result<usize, AppError> {
        self.names
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| AppError::new(EXIT_DATA, format!("Census response is missing column '{name}'.")))
    }
}

fn cell(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric_cell(row: &[Value], idx: usize, column: &str) -> Result<f64, AppError> {
    let raw = cell(row, idx).ok_or_else(|| AppError::new(EXIT_DATA, format!("Missing {column} value.")))?;
    raw.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::new(EXIT_DATA, format!("Invalid {column} value '{raw}'.")))
}

/// Parse a CBP table into raw metrics keyed by state FIPS code.
pub fn parse_cbp_table(table: &[Vec<Value>]) -> Result<BTreeMap<UnitId, RawMetrics>, AppError> {
    let Some((head, rows)) = table.split_first() else {
        return Ok(BTreeMap::new());
    };
    let header = Header::new(head);
    let state = header.position("state")?;
    let estab = header.position("ESTAB")?;
    let payann = header.position("PAYANN")?;

    let mut out = BTreeMap::new();
    for row in rows {
        let unit = cell(row, state).ok_or_else(|| AppError::new(EXIT_DATA, "CBP row without state code."))?;
        let metrics = RawMetrics {
            payroll: numeric_cell(row, payann, "PAYANN")?,
            establishments: numeric_cell(row, estab, "ESTAB")?,
        };
        out.insert(UnitId::new(unit), metrics);
    }
    Ok(out)
}

/// Parse a MARTS table into monthly national totals for `category`.
///
/// Only non-adjusted monthly sales rows are kept. `time` is `YYYY-MM` or `YYYYMM`.
pub fn parse_marts_table(table: &[Vec<Value>], category: &CategoryId) -> Result<Vec<PeriodTotal>, AppError> {
    let Some((head, rows)) = table.split_first() else {
        return Ok(Vec::new());
    };
    let header = Header::new(head);
    let data_type = header.position("data_type_code")?;
    let adjusted = header.position("seasonally_adj")?;
    let value = header.position("cell_value")?;
    let time = header.position("time")?;
    let category_col = header.position("category_code").ok();

    let mut by_period: BTreeMap<Period, f64> = BTreeMap::new();
    for row in rows {
        if cell(row, data_type).as_deref() != Some(MARTS_SALES_CODE)
            || cell(row, adjusted).as_deref() != Some(MARTS_NOT_ADJUSTED)
        {
            continue;
        }
        if let Some(col) = category_col {
            if cell(row, col).as_deref() != Some(category.as_str()) {
                continue;
            }
        }

        let raw_time = cell(row, time).ok_or_else(|| AppError::new(EXIT_DATA, "MARTS row without time."))?;
        let period: Period = raw_time
            .parse()
            .map_err(|e: String| AppError::new(EXIT_DATA, e))?;
        by_period.insert(period, numeric_cell(row, value, "cell_value")?);
    }

    Ok(by_period
        .into_iter()
        .map(|(period, value)| PeriodTotal {
            period,
            category: category.clone(),
            value,
        })
        .collect())
}
