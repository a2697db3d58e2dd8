//! Economic indicator types (FRED side of the pipeline).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Period;

/// How a raw FRED series is turned into the value that gets classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesTransform {
    /// Use the observation as-is (the series is already a rate or an index level).
    Level,
    /// Percent change against the same month one year earlier.
    YearOverYearPct,
}

/// The indicators pulled from FRED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    ConsumerConfidence,
    UnemploymentRate,
    InflationRate,
    GdpGrowthRate,
    FederalFundsRate,
    RetailSales,
}

impl Indicator {
    pub const ALL: [Indicator; 6] = [
        Indicator::ConsumerConfidence,
        Indicator::UnemploymentRate,
        Indicator::InflationRate,
        Indicator::GdpGrowthRate,
        Indicator::FederalFundsRate,
        Indicator::RetailSales,
    ];

    pub fn series_id(self) -> &'static str {
        match self {
            Indicator::ConsumerConfidence => "UMCSENT",
            Indicator::UnemploymentRate => "UNRATE",
            Indicator::InflationRate => "CPIAUCSL",
            Indicator::GdpGrowthRate => "A191RL1Q225SBEA",
            Indicator::FederalFundsRate => "FEDFUNDS",
            Indicator::RetailSales => "RSXFS",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Indicator::ConsumerConfidence => "consumer_confidence",
            Indicator::UnemploymentRate => "unemployment_rate",
            Indicator::InflationRate => "inflation_rate",
            Indicator::GdpGrowthRate => "gdp_growth_rate",
            Indicator::FederalFundsRate => "federal_funds_rate",
            Indicator::RetailSales => "retail_sales",
        }
    }

    /// CPI and retail sales are index/dollar levels; their thresholds are growth rates.
    pub fn transform(self) -> SeriesTransform {
        match self {
            Indicator::InflationRate | Indicator::RetailSales => SeriesTransform::YearOverYearPct,
            _ => SeriesTransform::Level,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Monthly values per indicator; `None` where the series had no usable observation.
pub type IndicatorPanel = BTreeMap<Period, BTreeMap<Indicator, Option<f64>>>;

/// Interpretation of one indicator value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub value: Option<f64>,
    pub category: String,
    pub description: String,
    pub impact: String,
    pub label: String,
}

/// All classified indicators for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicMonth {
    pub period: Period,
    pub metrics: BTreeMap<Indicator, Classification>,
}
