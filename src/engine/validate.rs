//! Consistency validator.
//!
//! Per period:
//! - totals present for every weighted category
//! - every required unit has at least one allocation
//! - per-category share sums inside the tolerance band, for every category that
//!   is weighted or has a national total in the period
//!
//! Across the run: distinct rounded weights per unit/category. A unit whose weight
//! never changes across several periods gets an advisory "constant share" concern;
//! concerns never fail the run.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    AllocationSet, CategoryId, CategoryWeights, Period, PeriodValidation, ShareVariation, TotalTable,
    UnitId, ValidationReport,
};
use crate::engine::{Apportioner, round_to};

#[derive(Default)]
struct PeriodTally {
    units: BTreeSet<UnitId>,
    share_sums: BTreeMap<CategoryId, f64>,
}

#[derive(Default)]
struct VariationTally {
    /// Weights scaled to integers at the weight precision, so equality is exact.
    scaled: BTreeSet<i64>,
    periods: usize,
}

impl Apportioner<'_> {
    /// Cross-check a run's allocations against its weights and totals.
    ///
    /// `weights_by_period` holds, per period, the weight set each category was
    /// apportioned with. Pure: nothing passed in is modified.
    pub fn validate(
        &self,
        allocations: &AllocationSet,
        weights_by_period: &BTreeMap<Period, CategoryWeights>,
        totals: &TotalTable,
        required_units: &BTreeSet<UnitId>,
    ) -> ValidationReport {
        let config = self.config();

        let mut tallies: BTreeMap<Period, PeriodTally> = BTreeMap::new();
        for a in allocations.iter() {
            let tally = tallies.entry(a.period).or_default();
            tally.units.insert(a.unit.clone());
            *tally.share_sums.entry(a.category.clone()).or_insert(0.0) += a.share;
        }

        let mut periods: BTreeSet<Period> = allocations.periods();
        periods.extend(weights_by_period.keys().copied());
        periods.extend(totals.keys().map(|(p, _)| *p));

        let empty_weights = CategoryWeights::new();
        let empty_tally = PeriodTally::default();
        let mut report = ValidationReport::default();

        for period in periods {
            let weighted = weights_by_period.get(&period).unwrap_or(&empty_weights);
            let tally = tallies.get(&period).unwrap_or(&empty_tally);

            let totals_present = weighted
                .keys()
                .all(|category| totals.contains_key(&(period, category.clone())));

            let missing_units: BTreeSet<UnitId> =
                required_units.difference(&tally.units).cloned().collect();

            // A weighted or totalled category without allocations sums to zero.
            let mut sums = tally.share_sums.clone();
            let totalled = totals.keys().filter(|(p, _)| *p == period).map(|(_, c)| c);
            for category in weighted.keys().chain(totalled) {
                sums.entry(category.clone()).or_insert(0.0);
            }
            let shares_within_tolerance =
                !sums.is_empty() && sums.values().all(|s| config.share_within_tolerance(*s));

            let share_sum_by_category = sums
                .into_iter()
                .map(|(c, s)| (c, round_to(s, config.weight_decimals)))
                .collect();

            report.periods.insert(
                period,
                PeriodValidation {
                    totals_present,
                    missing_units,
                    share_sum_by_category,
                    shares_within_tolerance,
                },
            );
        }

        let scale = 10f64.powi(config.weight_decimals as i32);
        let mut variations: BTreeMap<(UnitId, CategoryId), VariationTally> = BTreeMap::new();
        for weights in weights_by_period.values() {
            for (category, set) in weights {
                for (unit, w) in set {
                    let tally = variations.entry((unit.clone(), category.clone())).or_default();
                    tally.scaled.insert((w.weight * scale).round() as i64);
                    tally.periods += 1;
                }
            }
        }

        let decimals = config.weight_decimals as usize;
        for ((unit, category), tally) in variations {
            let variation = ShareVariation {
                unique_shares: tally.scaled.iter().map(|s| *s as f64 / scale).collect(),
                periods_observed: tally.periods,
            };

            if variation.variation_count() == 1 && variation.periods_observed > 1 {
                report.concerns.push(format!(
                    "Unit {} has constant share ({:.decimals$}) for category {} across {} periods",
                    self.units().display_code(&unit),
                    variation.unique_shares[0],
                    category,
                    variation.periods_observed,
                ));
            }

            report
                .share_variations
                .entry(unit)
                .or_default()
                .insert(category, variation);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reference::state_table;
    use crate::domain::{Allocation, ApportionConfig, Unit, UnitTable, Weight, WeightSet};

    fn small_table() -> UnitTable {
        UnitTable::new([("01", "AL"), ("02", "AK"), ("04", "AZ")].map(|(id, abbr)| Unit {
            id: id.into(),
            abbreviation: abbr.to_string(),
        }))
    }

    fn weight_set(category: &str, weights: &[(&str, f64)]) -> WeightSet {
        weights
            .iter()
            .map(|(unit, w)| {
                (
                    UnitId::from(*unit),
                    Weight {
                        unit: UnitId::from(*unit),
                        category: category.into(),
                        weight: *w,
                        payroll: 1.0,
                        establishments: 1.0,
                    },
                )
            })
            .collect()
    }

    fn month(m: u32) -> Period {
        Period::new(2024, m).unwrap()
    }

    /// Apportion the same total in every listed period and collect everything the
    /// validator needs.
    fn build(
        engine: &Apportioner<'_>,
        per_period: &[(Period, WeightSet)],
    ) -> (AllocationSet, BTreeMap<Period, CategoryWeights>, TotalTable) {
        let mut allocations = AllocationSet::new();
        let mut weights_by_period = BTreeMap::new();
        let mut totals = TotalTable::new();
        for (period, set) in per_period {
            let category = set.values().next().unwrap().category.clone();
            totals.insert((*period, category.clone()), 1000.0);
            allocations.extend(engine.apportion(*period, &category, 1000.0, set).unwrap());
            weights_by_period
                .entry(*period)
                .or_insert_with(CategoryWeights::new)
                .insert(category, set.clone());
        }
        (allocations, weights_by_period, totals)
    }

    #[test]
    fn consistent_run_passes() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let set = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let (allocations, weights, totals) = build(&engine, &[(month(1), set)]);

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let jan = &report.periods[&month(1)];
        assert!(jan.totals_present);
        assert!(jan.units_complete());
        assert!(jan.shares_within_tolerance);
        assert_eq!(jan.share_sum_by_category[&CategoryId::from("445")], 1.0);
        assert!(report.is_valid());
        // A single period is never flagged as constant.
        assert!(report.concerns.is_empty());
    }

    #[test]
    fn constant_share_across_three_periods_is_flagged_once() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let set = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let (allocations, weights, totals) = build(
            &engine,
            &[(month(1), set.clone()), (month(2), set.clone()), (month(3), set)],
        );

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let al: Vec<&String> = report.concerns.iter().filter(|c| c.contains("Unit AL ")).collect();
        assert_eq!(al.len(), 1);
        assert_eq!(
            al[0],
            "Unit AL has constant share (0.5200) for category 445 across 3 periods"
        );
        assert_eq!(report.concerns.len(), 3);
        // Concerns are advisory.
        assert!(report.is_valid());

        let variation = &report.share_variations[&UnitId::from("01")][&CategoryId::from("445")];
        assert_eq!(variation.unique_shares, vec![0.52]);
        assert_eq!(variation.periods_observed, 3);
    }

    #[test]
    fn changing_share_is_not_flagged() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let base = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let moved = weight_set("445", &[("01", 0.5201), ("02", 0.3399), ("04", 0.14)]);
        let (allocations, weights, totals) = build(
            &engine,
            &[(month(1), base.clone()), (month(2), base), (month(3), moved)],
        );

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        assert!(!report.concerns.iter().any(|c| c.contains("Unit AL ")));
        assert!(!report.concerns.iter().any(|c| c.contains("Unit AK ")));
        assert!(report.concerns.iter().any(|c| c.contains("Unit AZ ")));

        let variation = &report.share_variations[&UnitId::from("01")][&CategoryId::from("445")];
        assert_eq!(variation.unique_shares, vec![0.52, 0.5201]);
    }

    #[test]
    fn missing_units_fail_the_period() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let set = weight_set("445", &[("01", 0.6), ("02", 0.4)]);
        let (allocations, weights, totals) = build(&engine, &[(month(1), set)]);

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let jan = &report.periods[&month(1)];
        assert_eq!(jan.missing_units, BTreeSet::from([UnitId::from("04")]));
        assert!(jan.shares_within_tolerance);
        assert!(!report.is_valid());
        assert_eq!(report.failing_periods(), vec![month(1)]);
    }

    #[test]
    fn share_sum_outside_band_fails_without_raising() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let set = weight_set("448", &[("01", 0.5), ("02", 0.3), ("04", 0.1)]);
        let (allocations, weights, totals) = build(&engine, &[(month(4), set)]);

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let apr = &report.periods[&month(4)];
        assert!(!apr.shares_within_tolerance);
        assert_eq!(apr.share_sum_by_category[&CategoryId::from("448")], 0.9);
        assert!(!report.is_valid());
    }

    #[test]
    fn weighted_category_without_total_is_reported() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let food = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let clothing = weight_set("448", &[("01", 0.3), ("02", 0.3), ("04", 0.4)]);
        let (allocations, mut weights, totals) = build(&engine, &[(month(1), food)]);
        // Clothing was weighted for January but no national total arrived.
        weights
            .get_mut(&month(1))
            .unwrap()
            .insert("448".into(), clothing);

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let jan = &report.periods[&month(1)];
        assert!(!jan.totals_present);
        assert!(!jan.shares_within_tolerance);
        assert_eq!(jan.share_sum_by_category[&CategoryId::from("448")], 0.0);
    }

    #[test]
    fn totalled_category_without_allocations_fails_the_period() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let food = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let (allocations, weights, mut totals) = build(&engine, &[(month(1), food)]);
        // Clothing has a January total but was never weighted or apportioned.
        totals.insert((month(1), "448".into()), 500.0);

        let report = engine.validate(&allocations, &weights, &totals, &units.ids());
        let jan = &report.periods[&month(1)];
        assert!(jan.totals_present);
        assert!(jan.units_complete());
        assert_eq!(jan.share_sum_by_category[&CategoryId::from("445")], 1.0);
        assert_eq!(jan.share_sum_by_category[&CategoryId::from("448")], 0.0);
        assert!(!jan.shares_within_tolerance);
        assert!(!report.is_valid());
    }

    #[test]
    fn periods_with_only_totals_are_incomplete() {
        let units = state_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let mut totals = TotalTable::new();
        totals.insert((month(2), "445".into()), 10.0);

        let report = engine.validate(&AllocationSet::new(), &BTreeMap::new(), &totals, &units.ids());
        let feb = &report.periods[&month(2)];
        assert_eq!(feb.missing_units.len(), 51);
        assert!(!feb.shares_within_tolerance);
        assert!(!report.is_valid());
    }

    #[test]
    fn validation_leaves_allocations_untouched() {
        let units = small_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let set = weight_set("445", &[("01", 0.52), ("02", 0.34), ("04", 0.14)]);
        let (allocations, weights, totals) = build(&engine, &[(month(1), set)]);
        let before = allocations.clone();
        let _ = engine.validate(&allocations, &weights, &totals, &units.ids());
        assert_eq!(allocations, before);
        let a: &Allocation = allocations.iter().next().unwrap();
        assert_eq!(a.unit.as_str(), "01");
    }
}
