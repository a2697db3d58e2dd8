//! OpenWeather monthly aggregate statistics for a fixed set of state locations.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppError, EXIT_CONFIG, EXIT_DATA};

const BASE_URL: &str = "https://history.openweathermap.org/data/2.5/aggregated/month";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A representative coordinate for one state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub state: &'static str,
    pub lat: f64,
    pub lon: f64,
}

pub const DEFAULT_LOCATIONS: [Location; 3] = [
    Location {
        state: "CA",
        lat: 36.7783,
        lon: -119.4179,
    },
    Location {
        state: "NY",
        lat: 42.1497,
        lon: -74.9384,
    },
    Location {
        state: "TX",
        lat: 31.9686,
        lon: -99.9018,
    },
];

/// Summary statistics of one measure; absent fields read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherStats {
    pub record_min: f64,
    pub record_max: f64,
    pub average_min: f64,
    pub average_max: f64,
    pub median: f64,
    pub mean: f64,
    pub p25: f64,
    pub p75: f64,
    pub st_dev: f64,
    pub num: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlyWeather {
    pub month: u32,
    pub temp: WeatherStats,
    pub pressure: WeatherStats,
    pub humidity: WeatherStats,
    pub wind: WeatherStats,
    pub precipitation: WeatherStats,
    pub clouds: WeatherStats,
    pub sunshine_hours: f64,
}

/// All fetched months of one state, keyed by month number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateWeather {
    pub state: String,
    pub months: BTreeMap<u32, MonthlyWeather>,
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    cod: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<MonthlyWeather>,
}

pub struct WeatherClient {
    client: Client,
    api_key: String,
}

impl WeatherClient {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("OPENWEATHER_API_KEY")
            .map_err(|_| AppError::new(EXIT_CONFIG, "Missing OPENWEATHER_API_KEY in environment (.env)."))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }

    /// Fetch every month in `months` for every location.
    ///
    /// Months the API refuses or that fail to download are logged and left out.
    pub fn fetch_states(&self, locations: &[Location], months: RangeInclusive<u32>) -> Vec<StateWeather> {
        locations
            .iter()
            .map(|loc| {
                let mut state = StateWeather {
                    state: loc.state.to_string(),
                    months: BTreeMap::new(),
                };
                for month in months.clone() {
                    match self.fetch_month(loc, month) {
                        Ok(Some(data)) => {
                            state.months.insert(data.month, data);
                        }
                        Ok(None) => {}
                        Err(err) => warn!(state = loc.state, month, error = %err, "weather month skipped"),
                    }
                }
                debug!(state = loc.state, months = state.months.len(), "fetched weather");
                state
            })
            .collect()
    }

    pub fn fetch_month(&self, location: &Location, month: u32) -> Result<Option<MonthlyWeather>, AppError> {
        let resp = self
            .client
            .get(BASE_URL)
            .query(&[
                ("lat", location.lat.to_string()),
                ("lon", location.lon.to_string()),
                ("month", month.to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .map_err(|e| AppError::new(EXIT_DATA, format!("OpenWeather request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::new(
                EXIT_DATA,
                format!("OpenWeather request failed with status {}.", resp.status()),
            ));
        }

        let body: AggregateResponse = resp
            .json()
            .map_err(|e| AppError::new(EXIT_DATA, format!("Failed to parse OpenWeather response: {e}")))?;

        Ok(parse_aggregate(body, location.state))
    }
}

/// `cod` arrives as a number or as a numeric string depending on the endpoint.
fn cod_is_ok(cod: &Value) -> bool {
    match cod {
        Value::Number(n) => n.as_u64() == Some(200),
        Value::String(s) => s.trim() == "200",
        _ => false,
    }
}

fn parse_aggregate(body: AggregateResponse, state: &str) -> Option<MonthlyWeather> {
    if !cod_is_ok(&body.cod) {
        warn!(
            state,
            cod = %body.cod,
            message = body.message.as_deref().unwrap_or("Unknown error"),
            "OpenWeather API error"
        );
        return None;
    }
    Some(body.result.unwrap_or_default())
}
