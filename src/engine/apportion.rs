//! Apportionment calculator: national total x weight -> per-unit allocation.

use crate::domain::{Allocation, CategoryId, Period, WeightSet};
use crate::engine::{Apportioner, round_to};
use crate::error::EngineError;

impl Apportioner<'_> {
    /// Distribute `national_total` across the units of `weights`.
    ///
    /// One allocation per weighted unit, in unit id order, with
    /// `value = round(national_total * weight, value_decimals)` and `share = weight`.
    /// A zero total is valid and yields all-zero allocations. Units missing from the
    /// reference table are skipped without error.
    pub fn apportion(
        &self,
        period: Period,
        category: &CategoryId,
        national_total: f64,
        weights: &WeightSet,
    ) -> Result<Vec<Allocation>, EngineError> {
        if !national_total.is_finite() || national_total < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "National total for {period}/{category} must be finite and non-negative (got {national_total})."
            )));
        }
        if weights.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "No weights available for category {category}."
            )));
        }

        // Reject the whole set before emitting anything.
        for (unit, w) in weights {
            if !w.weight.is_finite() || !(0.0..=1.0).contains(&w.weight) {
                return Err(EngineError::InvalidInput(format!(
                    "Weight for unit {unit} in category {category} is outside [0, 1] (got {}).",
                    w.weight
                )));
            }
            if &w.category != category {
                return Err(EngineError::InvalidInput(format!(
                    "Weight for unit {unit} belongs to category {}, not {category}.",
                    w.category
                )));
            }
        }

        let decimals = self.config().value_decimals;
        let allocations = weights
            .values()
            .filter(|w| self.units().contains(&w.unit))
            .map(|w| Allocation {
                period,
                unit: w.unit.clone(),
                category: category.clone(),
                value: round_to(national_total * w.weight, decimals),
                share: w.weight,
            })
            .collect();

        Ok(allocations)
    }
}
