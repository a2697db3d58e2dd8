//! FRED API integration for the economic indicator panel.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::Period;
use crate::domain::economic::{Indicator, IndicatorPanel, SeriesTransform};
use crate::error::{AppError, EXIT_CONFIG, EXIT_DATA};

const BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First observation date requested when none is given.
pub const DEFAULT_START: &str = "2019-10-01";

/// Monthly observations of one series; `None` where FRED reported no value.
pub type MonthlySeries = BTreeMap<Period, Option<f64>>;

pub struct FredClient {
    client: Client,
    api_key: String,
}

impl FredClient {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("FRED_API_KEY")
            .map_err(|_| AppError::new(EXIT_CONFIG, "Missing FRED_API_KEY in environment (.env)."))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }

    /// Fetch every indicator and merge them into one monthly panel.
    ///
    /// A series that fails to download is logged and left empty; the call only
    /// fails when no series at all could be fetched.
    pub fn fetch_panel(&self, start: NaiveDate, end: NaiveDate) -> Result<IndicatorPanel, AppError> {
        let mut series = BTreeMap::new();
        let mut failures = Vec::new();

        for indicator in Indicator::ALL {
            // Year-over-year changes need a year of history before `start`.
            let from = match indicator.transform() {
                SeriesTransform::YearOverYearPct => start
                    .checked_sub_months(chrono::Months::new(12))
                    .unwrap_or(start),
                SeriesTransform::Level => start,
            };
            match self.fetch_series(indicator.series_id(), from, end) {
                Ok(obs) => {
                    debug!(series = indicator.series_id(), months = obs.len(), "fetched FRED series");
                    series.insert(indicator, obs);
                }
                Err(err) => {
                    warn!(series = indicator.series_id(), error = %err, "FRED series unavailable");
                    failures.push(indicator.series_id());
                }
            }
        }

        if series.is_empty() {
            return Err(AppError::new(
                EXIT_DATA,
                format!("Failed to fetch any FRED series ({}).", failures.join(", ")),
            ));
        }

        let first = Period::from_date(start);
        let mut panel = merge_series(&series);
        panel.retain(|period, _| *period >= first);
        Ok(panel)
    }

    pub fn fetch_series(&self, series_id: &str, start: NaiveDate, end: NaiveDate) -> Result<MonthlySeries, AppError> {
        let (start, end) = (start.to_string(), end.to_string());
        let resp = self
            .client
            .get(BASE_URL)
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
                ("observation_end", end.as_str()),
            ])
            .send()
            .map_err(|e| AppError::new(EXIT_DATA, format!("FRED request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::new(
                EXIT_DATA,
                format!("FRED request for {series_id} failed with status {}.", resp.status()),
            ));
        }

        let body: ObservationsResponse = resp
            .json()
            .map_err(|e| AppError::new(EXIT_DATA, format!("Failed to parse FRED response: {e}")))?;

        monthly_observations(&body.observations)
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

/// Bucket observations by month; a later observation in the same month wins.
fn monthly_observations(observations: &[Observation]) -> Result<MonthlySeries, AppError> {
    let mut out = MonthlySeries::new();
    for obs in observations {
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d")
            .map_err(|e| AppError::new(EXIT_DATA, format!("Invalid FRED date '{}': {e}", obs.date)))?;
        out.insert(Period::from_date(date), parse_value(&obs.value));
    }
    Ok(out)
}

fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed == "." || trimmed.is_empty() {
        return None;
    }
    let v = trimmed.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

/// Percent change against the same month of the previous year.
fn year_over_year(series: &MonthlySeries) -> MonthlySeries {
    series
        .iter()
        .map(|(period, value)| {
            let prior = period
                .months_before(12)
                .and_then(|p| series.get(&p).copied().flatten());
            let change = match (value, prior) {
                (Some(v), Some(p)) if p != 0.0 => Some((v / p - 1.0) * 100.0),
                _ => None,
            };
            (*period, change)
        })
        .collect()
}

/// Union of all months across series; every indicator is present in every month.
pub fn merge_series(series: &BTreeMap<Indicator, MonthlySeries>) -> IndicatorPanel {
    let transformed: BTreeMap<Indicator, MonthlySeries> = series
        .iter()
        .map(|(indicator, obs)| {
            let values = match indicator.transform() {
                SeriesTransform::Level => obs.clone(),
                SeriesTransform::YearOverYearPct => year_over_year(obs),
            };
            (*indicator, values)
        })
        .collect();

    let mut panel = IndicatorPanel::new();
    for period in transformed.values().flat_map(|s| s.keys()) {
        panel.entry(*period).or_insert_with(|| {
            Indicator::ALL
                .iter()
                .map(|indicator| {
                    let value = transformed
                        .get(indicator)
                        .and_then(|s| s.get(period).copied().flatten());
                    (*indicator, value)
                })
                .collect()
        });
    }
    panel
}
