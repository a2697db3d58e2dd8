//! Threshold classifier for economic indicators.
//!
//! Each indicator has an ordered list of bands. A value falls into the first band
//! whose inclusive `[min, max]` range contains it (an open end is unbounded), so
//! boundary values belong to the earlier band. A missing value is `unknown`; a
//! value no band covers is `undefined`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::economic::{Classification, EconomicMonth, Indicator, IndicatorPanel};
use crate::error::{AppError, EXIT_CONFIG};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: String,
    pub impact: String,
}

impl Band {
    fn new(name: &str, min: Option<f64>, max: Option<f64>, description: &str, impact: &str) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            description: description.to_string(),
            impact: impact.to_string(),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|lo| value >= lo) && self.max.is_none_or(|hi| value <= hi)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRules {
    pub label: String,
    pub bands: Vec<Band>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    rules: BTreeMap<Indicator, IndicatorRules>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl Classifier {
    /// Built-in rules with any indicator in `overrides` replaced.
    pub fn with_overrides(overrides: BTreeMap<Indicator, IndicatorRules>) -> Self {
        let mut rules = default_rules();
        rules.extend(overrides);
        Self { rules }
    }

    /// Load rule overrides from a JSON object keyed by indicator name.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(EXIT_CONFIG, format!("Failed to read rules file {}: {e}", path.display()))
        })?;
        let overrides: BTreeMap<Indicator, IndicatorRules> = serde_json::from_str(&raw).map_err(|e| {
            AppError::new(EXIT_CONFIG, format!("Invalid rules file {}: {e}", path.display()))
        })?;
        Ok(Self::with_overrides(overrides))
    }

    pub fn rules(&self, indicator: Indicator) -> Option<&IndicatorRules> {
        self.rules.get(&indicator)
    }

    pub fn classify(&self, indicator: Indicator, value: Option<f64>) -> Classification {
        let label = self
            .rules(indicator)
            .map(|r| r.label.clone())
            .unwrap_or_else(|| indicator.key().to_string());

        let Some(value) = value else {
            return Classification {
                value: None,
                category: "unknown".to_string(),
                description: "No data available".to_string(),
                impact: "Unable to determine impact".to_string(),
                label,
            };
        };

        let band = self
            .rules(indicator)
            .and_then(|r| r.bands.iter().find(|b| b.contains(value)));

        match band {
            Some(b) => Classification {
                value: Some(value),
                category: b.name.clone(),
                description: b.description.clone(),
                impact: b.impact.clone(),
                label,
            },
            None => Classification {
                value: Some(value),
                category: "undefined".to_string(),
                description: String::new(),
                impact: String::new(),
                label,
            },
        }
    }

    /// Classify every indicator of every month in the panel.
    pub fn classify_panel(&self, panel: &IndicatorPanel) -> Vec<EconomicMonth> {
        panel
            .iter()
            .map(|(period, values)| EconomicMonth {
                period: *period,
                metrics: values
                    .iter()
                    .map(|(indicator, value)| (*indicator, self.classify(*indicator, *value)))
                    .collect(),
            })
            .collect()
    }
}

fn default_rules() -> BTreeMap<Indicator, IndicatorRules> {
    let rules = |label: &str, bands: Vec<Band>| IndicatorRules {
        label: label.to_string(),
        bands,
    };

    BTreeMap::from([
        (
            Indicator::ConsumerConfidence,
            rules(
                "Consumer Confidence Index (UMCSENT)",
                vec![
                    Band::new(
                        "high_confidence",
                        Some(100.0),
                        None,
                        "Above 100 indicates positive consumer outlook",
                        "Increased consumer spending, higher demand in retail",
                    ),
                    Band::new(
                        "low_confidence",
                        Some(0.0),
                        Some(100.0),
                        "Below 100 indicates low consumer confidence",
                        "Consumers are more cautious, reducing demand",
                    ),
                ],
            ),
        ),
        (
            Indicator::UnemploymentRate,
            rules(
                "Unemployment Rate (UNRATE)",
                vec![
                    Band::new(
                        "low_unemployment",
                        Some(0.0),
                        Some(5.0),
                        "Below 5% suggests a strong economy",
                        "Increased demand for goods and services",
                    ),
                    Band::new(
                        "moderate_unemployment",
                        Some(5.0),
                        Some(10.0),
                        "Between 5-10% indicates economic challenges",
                        "Moderate caution in consumer spending",
                    ),
                    Band::new(
                        "high_unemployment",
                        Some(10.0),
                        None,
                        "Above 10% suggests a struggling economy",
                        "Lower demand for non-essential items",
                    ),
                ],
            ),
        ),
        (
            Indicator::InflationRate,
            rules(
                "Inflation Rate (CPIAUCSL)",
                vec![
                    Band::new(
                        "low_inflation",
                        Some(0.0),
                        Some(3.0),
                        "Below 3% suggests a stable economy",
                        "Stable or growing demand across categories",
                    ),
                    Band::new(
                        "moderate_inflation",
                        Some(3.0),
                        Some(5.0),
                        "3-5% indicates moderate inflation",
                        "Slight caution in consumer spending",
                    ),
                    Band::new(
                        "high_inflation",
                        Some(5.0),
                        None,
                        "Above 5% indicates high inflation",
                        "Reduced purchasing power and demand",
                    ),
                ],
            ),
        ),
        (
            Indicator::RetailSales,
            rules(
                "Retail Sales Index (RSXFS)",
                vec![
                    Band::new(
                        "strong_growth",
                        Some(5.0),
                        None,
                        "Strong growth in retail sales",
                        "Robust consumer spending across categories",
                    ),
                    Band::new(
                        "moderate_growth",
                        Some(0.0),
                        Some(5.0),
                        "Moderate growth in retail sales",
                        "Stable consumer spending",
                    ),
                    Band::new(
                        "decline",
                        None,
                        Some(0.0),
                        "Declining retail sales",
                        "Reduced consumer demand",
                    ),
                ],
            ),
        ),
        (
            Indicator::GdpGrowthRate,
            rules(
                "GDP Growth Rate (A191RL1Q225SBEA)",
                vec![
                    Band::new(
                        "strong_growth",
                        Some(2.0),
                        None,
                        "Strong positive growth suggests robust economic expansion",
                        "Higher GDP growth signals rising demand for consumer goods and services",
                    ),
                    Band::new(
                        "moderate_growth",
                        Some(0.0),
                        Some(2.0),
                        "Moderate growth indicates stable economic conditions",
                        "Stable demand across most sectors with potential for growth",
                    ),
                    Band::new(
                        "contraction",
                        None,
                        Some(0.0),
                        "Negative growth suggests economic contraction",
                        "Decreased demand due to economic slowdown, focus on essential products",
                    ),
                ],
            ),
        ),
        (
            Indicator::FederalFundsRate,
            rules(
                "Federal Funds Rate (FEDFUNDS)",
                vec![
                    Band::new(
                        "low_rate",
                        Some(0.0),
                        Some(2.0),
                        "Below 2% signals easy borrowing conditions",
                        "Stimulates consumer spending and investment, increased demand in retail",
                    ),
                    Band::new(
                        "moderate_rate",
                        Some(2.0),
                        Some(5.0),
                        "2-5% signals neutral economic conditions",
                        "Neutral conditions with manageable borrowing costs, stable demand",
                    ),
                    Band::new(
                        "high_rate",
                        Some(5.0),
                        None,
                        "Above 5% signals tight monetary policy",
                        "High borrowing costs may reduce consumer demand for non-essentials",
                    ),
                ],
            ),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Period;

    #[test]
    fn every_indicator_has_rules() {
        let classifier = Classifier::default();
        for indicator in Indicator::ALL {
            let rules = classifier.rules(indicator).unwrap();
            assert!(rules.label.contains(indicator.series_id()));
            assert!(!rules.bands.is_empty());
        }
    }

    #[test]
    fn boundary_value_goes_to_first_matching_band() {
        let classifier = Classifier::default();
        let c = classifier.classify(Indicator::UnemploymentRate, Some(5.0));
        assert_eq!(c.category, "low_unemployment");

        let c = classifier.classify(Indicator::ConsumerConfidence, Some(100.0));
        assert_eq!(c.category, "high_confidence");

        let c = classifier.classify(Indicator::GdpGrowthRate, Some(0.0));
        assert_eq!(c.category, "moderate_growth");
    }

    #[test]
    fn open_ended_bands() {
        let classifier = Classifier::default();
        assert_eq!(
            classifier.classify(Indicator::RetailSales, Some(-3.2)).category,
            "decline"
        );
        assert_eq!(
            classifier.classify(Indicator::FederalFundsRate, Some(5.33)).category,
            "high_rate"
        );
        let c = classifier.classify(Indicator::InflationRate, Some(3.4));
        assert_eq!(c.category, "moderate_inflation");
        assert_eq!(c.value, Some(3.4));
        assert_eq!(c.label, "Inflation Rate (CPIAUCSL)");
        assert_eq!(c.impact, "Slight caution in consumer spending");
    }

    #[test]
    fn missing_value_is_unknown() {
        let c = Classifier::default().classify(Indicator::GdpGrowthRate, None);
        assert_eq!(c.value, None);
        assert_eq!(c.category, "unknown");
        assert_eq!(c.description, "No data available");
        assert_eq!(c.impact, "Unable to determine impact");
        assert_eq!(c.label, "GDP Growth Rate (A191RL1Q225SBEA)");
    }

    #[test]
    fn uncovered_value_is_undefined() {
        // Unemployment bands start at zero.
        let c = Classifier::default().classify(Indicator::UnemploymentRate, Some(-1.0));
        assert_eq!(c.category, "undefined");
        assert!(c.description.is_empty());
        assert!(c.impact.is_empty());
        assert_eq!(c.label, "Unemployment Rate (UNRATE)");
    }

    #[test]
    fn overrides_replace_single_indicator() {
        let overrides: BTreeMap<Indicator, IndicatorRules> = serde_json::from_str(
            r#"{"federal_funds_rate": {"label": "Fed funds", "bands": [
                {"name": "any", "min": null, "max": null, "description": "d", "impact": "i"}
            ]}}"#,
        )
        .unwrap();
        let classifier = Classifier::with_overrides(overrides);
        let c = classifier.classify(Indicator::FederalFundsRate, Some(12.0));
        assert_eq!(c.category, "any");
        assert_eq!(c.label, "Fed funds");
        // Others keep the built-in rules.
        assert_eq!(
            classifier.classify(Indicator::UnemploymentRate, Some(4.0)).category,
            "low_unemployment"
        );
    }

    #[test]
    fn classifies_a_panel() {
        let may = Period::new(2024, 5).unwrap();
        let panel: IndicatorPanel = BTreeMap::from([(
            may,
            BTreeMap::from([
                (Indicator::UnemploymentRate, Some(4.0)),
                (Indicator::GdpGrowthRate, None),
            ]),
        )]);
        let months = Classifier::default().classify_panel(&panel);
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].period, may);
        assert_eq!(months[0].metrics[&Indicator::UnemploymentRate].category, "low_unemployment");
        assert_eq!(months[0].metrics[&Indicator::GdpGrowthRate].category, "unknown");
    }
}
