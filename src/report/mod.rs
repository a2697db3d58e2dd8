//! Reporting utilities: allocation rankings and formatted terminal output.

use crate::domain::{Allocation, AllocationSet, CategoryId, Period};

pub mod format;

pub use format::*;

/// Largest allocations of one period/category, highest value first.
pub fn top_allocations(
    allocations: &AllocationSet,
    period: Period,
    category: &CategoryId,
    top_n: usize,
) -> Vec<Allocation> {
    let mut rows: Vec<Allocation> = allocations
        .iter()
        .filter(|a| a.period == period && &a.category == category)
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
    rows.truncate(top_n);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(unit: &str, category: &str, month: u32, value: f64) -> Allocation {
        Allocation {
            period: Period::new(2024, month).unwrap(),
            unit: unit.into(),
            category: category.into(),
            value,
            share: 0.0,
        }
    }

    #[test]
    fn ranks_by_value_within_period_and_category() {
        let set: AllocationSet = [
            alloc("01", "445", 1, 10.0),
            alloc("06", "445", 1, 90.0),
            alloc("36", "445", 1, 40.0),
            alloc("06", "448", 1, 500.0),
            alloc("06", "445", 2, 900.0),
        ]
        .into_iter()
        .collect();

        let top = top_allocations(&set, Period::new(2024, 1).unwrap(), &"445".into(), 2);
        let units: Vec<&str> = top.iter().map(|a| a.unit.as_str()).collect();
        assert_eq!(units, vec!["06", "36"]);
    }
}
