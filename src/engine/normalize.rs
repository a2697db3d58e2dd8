//! Weight normalizer.
//!
//! For each included unit:
//!
//! `weight = round(p * payroll / Σpayroll + e * establishments / Σestablishments, d)`
//!
//! with `p`/`e` the configured metric shares and `d` the weight precision. Sums are
//! taken over the included units only. Rounding means the weights of a category
//! need not sum to exactly 1; the validator tolerates that.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{CategoryId, RawMetrics, UnitId, Weight, WeightSet};
use crate::engine::{Apportioner, round_to};
use crate::error::EngineError;

impl Apportioner<'_> {
    /// Blend raw payroll/establishment magnitudes into per-unit weights.
    ///
    /// Units in `excluded` are dropped before anything else, whatever their metrics.
    /// Fails with `DataUnavailable` when nothing is left or when either metric sums
    /// to zero; no partial weight set is produced.
    pub fn normalize(
        &self,
        category: &CategoryId,
        raw: &BTreeMap<UnitId, RawMetrics>,
        excluded: &BTreeSet<UnitId>,
    ) -> Result<WeightSet, EngineError> {
        let included: Vec<(&UnitId, &RawMetrics)> =
            raw.iter().filter(|(id, _)| !excluded.contains(*id)).collect();

        if included.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "No units left to weight for category {category}."
            )));
        }

        for (unit, metrics) in &included {
            check_metric(category, unit, "payroll", metrics.payroll)?;
            check_metric(category, unit, "establishments", metrics.establishments)?;
        }

        let total_payroll: f64 = included.iter().map(|(_, m)| m.payroll).sum();
        let total_establishments: f64 = included.iter().map(|(_, m)| m.establishments).sum();

        if !(total_payroll.is_finite() && total_establishments.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "Metric totals overflow for category {category}."
            )));
        }
        if total_payroll == 0.0 {
            return Err(EngineError::DataUnavailable(format!(
                "Total payroll is zero for category {category}."
            )));
        }
        if total_establishments == 0.0 {
            return Err(EngineError::DataUnavailable(format!(
                "Total establishment count is zero for category {category}."
            )));
        }

        let config = self.config();
        let weights = included
            .into_iter()
            .map(|(unit, metrics)| {
                let blended = config.payroll_share * (metrics.payroll / total_payroll)
                    + config.establishment_share * (metrics.establishments / total_establishments);
                let weight = Weight {
                    unit: unit.clone(),
                    category: category.clone(),
                    weight: round_to(blended, config.weight_decimals),
                    payroll: metrics.payroll,
                    establishments: metrics.establishments,
                };
                (unit.clone(), weight)
            })
            .collect();

        Ok(weights)
    }
}

fn check_metric(category: &CategoryId, unit: &UnitId, name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "Unit {unit} has invalid {name} ({value}) for category {category}."
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reference::{excluded_territories, state_table};
    use crate::domain::{ApportionConfig, UnitTable};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn metrics(payroll: f64, establishments: f64) -> RawMetrics {
        RawMetrics {
            payroll,
            establishments,
        }
    }

    fn three_units() -> BTreeMap<UnitId, RawMetrics> {
        BTreeMap::from([
            (UnitId::from("01"), metrics(60.0, 40.0)),
            (UnitId::from("02"), metrics(30.0, 40.0)),
            (UnitId::from("04"), metrics(10.0, 20.0)),
        ])
    }

    #[test]
    fn blends_payroll_and_establishments() {
        let units = state_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let weights = engine
            .normalize(&"445".into(), &three_units(), &BTreeSet::new())
            .unwrap();

        // 0.6 * 60/100 + 0.4 * 40/100 = 0.52, and so on.
        assert!((weights[&UnitId::from("01")].weight - 0.52).abs() < 1e-12);
        assert!((weights[&UnitId::from("02")].weight - 0.34).abs() < 1e-12);
        assert!((weights[&UnitId::from("04")].weight - 0.14).abs() < 1e-12);

        let sum: f64 = weights.values().map(|w| w.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9);

        let w = &weights[&UnitId::from("01")];
        assert_eq!(w.category, CategoryId::from("445"));
        assert_eq!(w.payroll, 60.0);
        assert_eq!(w.establishments, 40.0);
    }

    #[test]
    fn excluded_units_never_get_a_weight() {
        let units = state_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let mut raw = three_units();
        // Puerto Rico with a dominant payroll.
        raw.insert(UnitId::from("72"), metrics(1_000_000.0, 5_000.0));

        let weights = engine
            .normalize(&"445".into(), &raw, &excluded_territories())
            .unwrap();

        assert!(!weights.contains_key(&UnitId::from("72")));
        assert_eq!(weights.len(), 3);
        // Totals are over included units only.
        assert!((weights[&UnitId::from("01")].weight - 0.52).abs() < 1e-12);
    }

    #[test]
    fn zero_payroll_total_is_data_unavailable() {
        let units = UnitTable::default();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let raw = BTreeMap::from([
            (UnitId::from("01"), metrics(0.0, 5.0)),
            (UnitId::from("02"), metrics(0.0, 7.0)),
        ]);
        let err = engine.normalize(&"448".into(), &raw, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn zero_establishment_total_is_data_unavailable() {
        let units = UnitTable::default();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let raw = BTreeMap::from([(UnitId::from("01"), metrics(10.0, 0.0))]);
        let err = engine.normalize(&"448".into(), &raw, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn empty_after_exclusion_is_data_unavailable() {
        let units = UnitTable::default();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let raw = BTreeMap::from([(UnitId::from("72"), metrics(10.0, 3.0))]);
        let err = engine
            .normalize(&"445".into(), &raw, &excluded_territories())
            .unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable(_)));
    }

    #[test]
    fn negative_or_nan_metrics_are_invalid_input() {
        let units = UnitTable::default();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();

        let raw = BTreeMap::from([(UnitId::from("01"), metrics(-1.0, 3.0))]);
        let err = engine.normalize(&"445".into(), &raw, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let raw = BTreeMap::from([(UnitId::from("01"), metrics(4.0, f64::NAN))]);
        let err = engine.normalize(&"445".into(), &raw, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn metric_split_follows_config() {
        let units = UnitTable::default();
        let config = ApportionConfig {
            payroll_share: 1.0,
            establishment_share: 0.0,
            ..ApportionConfig::default()
        };
        let engine = Apportioner::new(config, &units).unwrap();
        let weights = engine
            .normalize(&"445".into(), &three_units(), &BTreeSet::new())
            .unwrap();
        assert!((weights[&UnitId::from("01")].weight - 0.6).abs() < 1e-12);
        assert!((weights[&UnitId::from("04")].weight - 0.1).abs() < 1e-12);
    }

    #[test]
    fn synthetic_weights_sum_close_to_one() {
        let units = UnitTable::default();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let n = rng.gen_range(1..=56);
            let raw: BTreeMap<UnitId, RawMetrics> = (0..n)
                .map(|i| {
                    (
                        UnitId::new(format!("{i:02}")),
                        metrics(rng.gen_range(1.0..5.0e7), rng.gen_range(1.0..2.0e4)),
                    )
                })
                .collect();

            let weights = engine.normalize(&"445".into(), &raw, &BTreeSet::new()).unwrap();
            let sum: f64 = weights.values().map(|w| w.weight).sum();
            assert!((0.98..=1.02).contains(&sum), "sum={sum} for n={n}");
            assert!(weights.values().all(|w| (0.0..=1.0).contains(&w.weight)));
        }
    }
}
