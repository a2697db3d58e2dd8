//! Run driver: every category x period through normalize -> apportion, then validate.
//!
//! Categories are independent, so they fan out across the rayon pool and their
//! allocations are merged afterwards. Within a category, allocations keep the
//! deterministic unit order of `apportion`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    Allocation, AllocationSet, CategoryId, CategoryWeights, Period, PeriodTotal, RawMetrics, TotalTable, UnitId,
    ValidationReport, WeightSet, total_table,
};
use crate::domain::reference::excluded_territories;
use crate::engine::Apportioner;
use crate::error::EngineError;

/// Raw metrics per category, per unit.
pub type CategoryMetrics = BTreeMap<CategoryId, BTreeMap<UnitId, RawMetrics>>;

/// Fully materialized inputs of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInputs {
    pub metrics: CategoryMetrics,
    pub totals: Vec<PeriodTotal>,
    /// Unit ids dropped before normalization; the territories when absent.
    #[serde(default = "excluded_territories")]
    pub excluded: BTreeSet<UnitId>,
}

/// Which part of a run was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipScope {
    Category(CategoryId),
    PeriodCategory(Period, CategoryId),
}

impl fmt::Display for SkipScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipScope::Category(c) => write!(f, "category {c}"),
            SkipScope::PeriodCategory(p, c) => write!(f, "{p} category {c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub scope: SkipScope,
    pub reason: EngineError,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct ApportionRun {
    pub allocations: AllocationSet,
    /// Weight sets that normalized successfully.
    pub weights: CategoryWeights,
    /// National totals that produced allocations. Rejected or unweighted totals
    /// are left out.
    pub totals: TotalTable,
    pub report: ValidationReport,
    /// Items left out of the output, and why.
    pub skipped: Vec<SkippedItem>,
}

struct CategoryOutcome {
    category: CategoryId,
    weights: Option<WeightSet>,
    allocations: Vec<Allocation>,
    skipped: Vec<SkippedItem>,
}

/// Execute normalize -> apportion -> validate over all inputs.
///
/// Engine errors never abort the run: the failing category (or period/category)
/// is logged, recorded in `skipped`, and absent from the allocations.
pub fn run(apportioner: &Apportioner<'_>, inputs: &RunInputs) -> ApportionRun {
    let totals = total_table(&inputs.totals);

    let outcomes: Vec<CategoryOutcome> = inputs
        .metrics
        .par_iter()
        .map(|(category, raw)| run_category(apportioner, category, raw, &inputs.excluded, &totals))
        .collect();

    let mut allocations = AllocationSet::new();
    let mut weights = CategoryWeights::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        allocations.extend(outcome.allocations);
        if let Some(set) = outcome.weights {
            weights.insert(outcome.category, set);
        }
        skipped.extend(outcome.skipped);
    }

    // One weight snapshot serves every period of the run.
    let periods: BTreeSet<Period> = totals.keys().map(|(p, _)| *p).collect();
    let weights_by_period: BTreeMap<Period, CategoryWeights> =
        periods.into_iter().map(|p| (p, weights.clone())).collect();

    let required = apportioner.units().ids();
    let report = apportioner.validate(&allocations, &weights_by_period, &totals, &required);

    let allocated: BTreeSet<(Period, CategoryId)> =
        allocations.iter().map(|a| (a.period, a.category.clone())).collect();
    let totals: TotalTable = totals
        .into_iter()
        .filter(|(key, _)| allocated.contains(key))
        .collect();

    ApportionRun {
        allocations,
        weights,
        totals,
        report,
        skipped,
    }
}

fn run_category(
    apportioner: &Apportioner<'_>,
    category: &CategoryId,
    raw: &BTreeMap<UnitId, RawMetrics>,
    excluded: &BTreeSet<UnitId>,
    totals: &TotalTable,
) -> CategoryOutcome {
    let mut outcome = CategoryOutcome {
        category: category.clone(),
        weights: None,
        allocations: Vec::new(),
        skipped: Vec::new(),
    };

    let unknown: Vec<&str> = raw
        .keys()
        .filter(|id| !excluded.contains(*id) && !apportioner.units().contains(*id))
        .map(UnitId::as_str)
        .collect();
    if !unknown.is_empty() {
        warn!(
            %category,
            units = %unknown.join(","),
            "units outside the reference table are weighted but never allocated"
        );
    }

    let weights = match apportioner.normalize(category, raw, excluded) {
        Ok(w) => w,
        Err(reason) => {
            warn!(%category, error = %reason, "skipping category");
            outcome.skipped.push(SkippedItem {
                scope: SkipScope::Category(category.clone()),
                reason,
            });
            return outcome;
        }
    };
    debug!(%category, units = weights.len(), "normalized weights");

    for ((period, _), value) in totals.iter().filter(|((_, c), _)| c == category) {
        match apportioner.apportion(*period, category, *value, &weights) {
            Ok(batch) => outcome.allocations.extend(batch),
            Err(reason) => {
                warn!(%period, %category, error = %reason, "skipping period");
                outcome.skipped.push(SkippedItem {
                    scope: SkipScope::PeriodCategory(*period, category.clone()),
                    reason,
                });
            }
        }
    }

    outcome.weights = Some(weights);
    outcome
}
