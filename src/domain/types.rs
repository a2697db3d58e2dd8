//! Shared domain types.
//!
//! One canonical record model for the whole pipeline. Sources produce these,
//! the engine consumes and derives them, and the sinks convert them into
//! whatever layout a consumer needs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Payroll share of the blended weight.
pub const DEFAULT_PAYROLL_SHARE: f64 = 0.6;
/// Establishment-count share of the blended weight.
pub const DEFAULT_ESTABLISHMENT_SHARE: f64 = 0.4;
/// Decimal places kept on weights.
pub const DEFAULT_WEIGHT_DECIMALS: u32 = 4;
/// Decimal places kept on allocated values.
pub const DEFAULT_VALUE_DECIMALS: u32 = 2;
/// Accepted band for a per-category share sum.
pub const DEFAULT_SHARE_TOLERANCE: (f64, f64) = (0.98, 1.02);

/// Identifier of an apportionment unit (for states: the two-digit FIPS code).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Classification code selecting a national total series (e.g. NAICS `445`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub String);

impl CategoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CategoryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A calendar month. Rendered and parsed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        // `new` and `from_date` only admit valid months.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// The period `n` months earlier.
    pub fn months_before(self, n: u32) -> Option<Period> {
        self.first_day()
            .checked_sub_months(Months::new(n))
            .map(Period::from_date)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    /// Accepts `YYYY-MM`, `YYYYMM` and `YYYY-MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::from_date(date));
        }
        if !s.is_ascii() {
            return Err(format!("Invalid period '{s}' (expected YYYY-MM)."));
        }
        let (year, month) = match (s.len(), s.as_bytes().get(4)) {
            (7, Some(b'-')) => (&s[..4], &s[5..]),
            (6, _) => (&s[..4], &s[4..]),
            _ => return Err(format!("Invalid period '{s}' (expected YYYY-MM).")),
        };
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid year in period '{s}'."))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in period '{s}'."))?;
        Period::new(year, month).ok_or_else(|| format!("Invalid period '{s}'."))
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference data for one unit. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    /// Display code (e.g. `CA`).
    pub abbreviation: String,
}

/// Immutable lookup of known units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitTable {
    units: BTreeMap<UnitId, Unit>,
}

impl UnitTable {
    pub fn new(units: impl IntoIterator<Item = Unit>) -> Self {
        Self {
            units: units.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }

    pub fn get(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.units.contains_key(id)
    }

    /// Display code for a unit, falling back to the raw id for unknown units.
    pub fn display_code<'a>(&'a self, id: &'a UnitId) -> &'a str {
        self.units
            .get(id)
            .map(|u| u.abbreviation.as_str())
            .unwrap_or(id.as_str())
    }

    pub fn ids(&self) -> BTreeSet<UnitId> {
        self.units.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub label: String,
}

/// Raw magnitudes a weight is blended from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    /// Annual payroll.
    pub payroll: f64,
    /// Establishment count.
    pub establishments: f64,
}

/// Fraction of a category's national total attributed to one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    pub unit: UnitId,
    pub category: CategoryId,
    pub weight: f64,
    pub payroll: f64,
    pub establishments: f64,
}

/// Weights for one category, ordered by unit id.
pub type WeightSet = BTreeMap<UnitId, Weight>;

/// Weight sets per category.
pub type CategoryWeights = BTreeMap<CategoryId, WeightSet>;

/// National totals keyed by `(period, category)`.
pub type TotalTable = BTreeMap<(Period, CategoryId), f64>;

/// One national scalar per period per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotal {
    pub period: Period,
    pub category: CategoryId,
    pub value: f64,
}

/// Collect totals into a lookup table. Later entries replace earlier ones.
pub fn total_table(totals: &[PeriodTotal]) -> TotalTable {
    totals
        .iter()
        .map(|t| ((t.period, t.category.clone()), t.value))
        .collect()
}

/// Unit-level apportioned value for one period and category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub period: Period,
    pub unit: UnitId,
    pub category: CategoryId,
    pub value: f64,
    pub share: f64,
}

impl Allocation {
    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            period: self.period,
            unit: self.unit.clone(),
            category: self.category.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationKey {
    pub period: Period,
    pub unit: UnitId,
    pub category: CategoryId,
}

/// Flat, indexed collection of allocations.
///
/// Keyed by `(period, unit, category)`; inserting an existing key replaces the
/// previous record (upsert).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationSet {
    entries: BTreeMap<AllocationKey, Allocation>,
}

impl AllocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, allocation: Allocation) -> Option<Allocation> {
        self.entries.insert(allocation.key(), allocation)
    }

    pub fn get(&self, period: Period, unit: &UnitId, category: &CategoryId) -> Option<&Allocation> {
        self.entries.get(&AllocationKey {
            period,
            unit: unit.clone(),
            category: category.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn periods(&self) -> BTreeSet<Period> {
        self.entries.keys().map(|k| k.period).collect()
    }

    pub fn categories(&self) -> BTreeSet<CategoryId> {
        self.entries.keys().map(|k| k.category.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Allocation> {
        self.entries.values().cloned().collect()
    }
}

impl Extend<Allocation> for AllocationSet {
    fn extend<T: IntoIterator<Item = Allocation>>(&mut self, iter: T) {
        for allocation in iter {
            self.insert(allocation);
        }
    }
}

impl FromIterator<Allocation> for AllocationSet {
    fn from_iter<T: IntoIterator<Item = Allocation>>(iter: T) -> Self {
        let mut set = AllocationSet::new();
        set.extend(iter);
        set
    }
}

impl Serialize for AllocationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

/// Checks for a single period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodValidation {
    pub totals_present: bool,
    pub missing_units: BTreeSet<UnitId>,
    /// Sum of shares per category, rounded to the weight precision.
    pub share_sum_by_category: BTreeMap<CategoryId, f64>,
    pub shares_within_tolerance: bool,
}

impl PeriodValidation {
    pub fn units_complete(&self) -> bool {
        self.missing_units.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.totals_present && self.units_complete() && self.shares_within_tolerance
    }
}

/// Distinct weights observed for one unit/category across the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareVariation {
    /// Sorted, de-duplicated rounded weights.
    pub unique_shares: Vec<f64>,
    /// Number of periods the unit/category was observed in.
    pub periods_observed: usize,
}

impl ShareVariation {
    pub fn variation_count(&self) -> usize {
        self.unique_shares.len()
    }
}

/// Output of the consistency validator. Read-only; never persisted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub periods: BTreeMap<Period, PeriodValidation>,
    pub share_variations: BTreeMap<UnitId, BTreeMap<CategoryId, ShareVariation>>,
    /// Advisory flags; they never fail a run.
    pub concerns: Vec<String>,
}

impl ValidationReport {
    /// The run is valid iff every period passes all of its checks.
    pub fn is_valid(&self) -> bool {
        self.periods.values().all(PeriodValidation::is_valid)
    }

    pub fn failing_periods(&self) -> Vec<Period> {
        self.periods
            .iter()
            .filter(|(_, v)| !v.is_valid())
            .map(|(p, _)| *p)
            .collect()
    }
}

/// Engine constants. Fixed once an `Apportioner` is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApportionConfig {
    pub payroll_share: f64,
    pub establishment_share: f64,
    pub weight_decimals: u32,
    pub value_decimals: u32,
    pub share_tolerance_low: f64,
    pub share_tolerance_high: f64,
}

impl Default for ApportionConfig {
    fn default() -> Self {
        Self {
            payroll_share: DEFAULT_PAYROLL_SHARE,
            establishment_share: DEFAULT_ESTABLISHMENT_SHARE,
            weight_decimals: DEFAULT_WEIGHT_DECIMALS,
            value_decimals: DEFAULT_VALUE_DECIMALS,
            share_tolerance_low: DEFAULT_SHARE_TOLERANCE.0,
            share_tolerance_high: DEFAULT_SHARE_TOLERANCE.1,
        }
    }
}

impl ApportionConfig {
    pub fn check(&self) -> Result<(), EngineError> {
        let shares = [self.payroll_share, self.establishment_share];
        if shares.iter().any(|s| !s.is_finite() || *s < 0.0 || *s > 1.0) {
            return Err(EngineError::InvalidInput(
                "Metric shares must be finite and within [0, 1].".to_string(),
            ));
        }
        if (self.payroll_share + self.establishment_share - 1.0).abs() > 1e-9 {
            return Err(EngineError::InvalidInput(format!(
                "Metric shares must sum to 1 (got {} + {}).",
                self.payroll_share, self.establishment_share
            )));
        }
        if self.weight_decimals > 12 || self.value_decimals > 12 {
            return Err(EngineError::InvalidInput(
                "Rounding precision must be at most 12 decimals.".to_string(),
            ));
        }
        let (lo, hi) = (self.share_tolerance_low, self.share_tolerance_high);
        if !(lo.is_finite() && hi.is_finite() && lo <= 1.0 && 1.0 <= hi) {
            return Err(EngineError::InvalidInput(format!(
                "Share tolerance band [{lo}, {hi}] must contain 1.0."
            )));
        }
        Ok(())
    }

    pub fn share_within_tolerance(&self, sum: f64) -> bool {
        self.share_tolerance_low <= sum && sum <= self.share_tolerance_high
    }
}
