//! Formatted terminal output for each pipeline.
//!
//! Formatting lives here so the engine and the sources stay free of presentation
//! concerns, and so output changes stay localized.

use crate::data::weather::StateWeather;
use crate::domain::economic::EconomicMonth;
use crate::domain::{Allocation, Category, UnitTable};
use crate::engine::ApportionRun;
use crate::report::top_allocations;

/// Concerns printed before the list is cut short.
const MAX_CONCERNS_SHOWN: usize = 10;

/// Run summary: coverage, per-period checks, skips, concerns, and the largest
/// allocations of the latest period.
pub fn format_census_summary(run: &ApportionRun, units: &UnitTable, categories: &[Category], top_n: usize) -> String {
    let mut out = String::new();

    out.push_str("=== rds - Census retail apportionment ===\n");
    let cats: Vec<String> = categories.iter().map(|c| format!("{} ({})", c.id, c.label)).collect();
    out.push_str(&format!("Categories: {}\n", cats.join(", ")));

    let periods = run.allocations.periods();
    match (periods.first(), periods.last()) {
        (Some(first), Some(last)) => {
            out.push_str(&format!("Periods: {} ({first} .. {last})\n", periods.len()));
        }
        _ => out.push_str("Periods: 0\n"),
    }
    out.push_str(&format!(
        "Allocations: {} | skipped: {}\n",
        run.allocations.len(),
        run.skipped.len()
    ));

    let failing = run.report.failing_periods();
    if failing.is_empty() {
        out.push_str("Validation: PASS\n");
    } else {
        out.push_str(&format!("Validation: FAIL ({} failing periods)\n", failing.len()));
    }

    out.push_str("\nPer-period checks:\n");
    for (period, v) in &run.report.periods {
        let sums: Vec<String> = v
            .share_sum_by_category
            .iter()
            .map(|(c, s)| format!("{c}:{s:.4}"))
            .collect();
        out.push_str(&format!(
            "{period}  totals={} units={}/{} shares=[{}] {}\n",
            if v.totals_present { "ok" } else { "missing" },
            units.len().saturating_sub(v.missing_units.len()),
            units.len(),
            sums.join(" "),
            if v.is_valid() { "PASS" } else { "FAIL" },
        ));
    }

    if !run.skipped.is_empty() {
        out.push_str("\nSkipped:\n");
        for s in &run.skipped {
            out.push_str(&format!("- {}: {}\n", s.scope, s.reason));
        }
    }

    if !run.report.concerns.is_empty() {
        out.push_str(&format!("\nConcerns ({}):\n", run.report.concerns.len()));
        for c in run.report.concerns.iter().take(MAX_CONCERNS_SHOWN) {
            out.push_str(&format!("- {c}\n"));
        }
        let hidden = run.report.concerns.len().saturating_sub(MAX_CONCERNS_SHOWN);
        if hidden > 0 {
            out.push_str(&format!("  ... and {hidden} more\n"));
        }
    }

    if let Some(latest) = periods.last() {
        for category in run.allocations.categories() {
            let rows = top_allocations(&run.allocations, *latest, &category, top_n);
            if rows.is_empty() {
                continue;
            }
            out.push_str(&format!("\nTop {} for {category} in {latest}:\n", rows.len()));
            out.push_str(&format_allocation_table(&rows, units));
        }
    }

    out
}

pub fn format_allocation_table(rows: &[Allocation], units: &UnitTable) -> String {
    let mut out = String::new();
    out.push_str(format!("{:<8} {:<8} {:>16} {:>10}", "state", "category", "value", "share").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<8} {:-<16} {:-<10}", "", "", "", "").trim_end());
    out.push('\n');

    for a in rows {
        out.push_str(
            format!(
                "{:<8} {:<8} {:>16.2} {:>10.4}",
                truncate(units.display_code(&a.unit), 8),
                truncate(a.category.as_str(), 8),
                a.value,
                a.share,
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

/// Latest month of the indicator panel.
pub fn format_economic_summary(months: &[EconomicMonth]) -> String {
    let mut out = String::new();
    out.push_str("=== rds - FRED economic indicators ===\n");
    out.push_str(&format!("Months: {}\n", months.len()));

    let Some(latest) = months.last() else {
        return out;
    };

    out.push_str(&format!("\nLatest ({}):\n", latest.period));
    out.push_str(format!("{:<22} {:>10} {:<24} {}", "indicator", "value", "category", "impact").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<22} {:-<10} {:-<24} {:-<6}", "", "", "", "").trim_end());
    out.push('\n');
    for (indicator, c) in &latest.metrics {
        let value = c.value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string());
        out.push_str(
            format!(
                "{:<22} {:>10} {:<24} {}",
                indicator.key(),
                value,
                truncate(&c.category, 24),
                c.impact,
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_weather_summary(states: &[StateWeather]) -> String {
    let mut out = String::new();
    out.push_str("=== rds - OpenWeather monthly aggregates ===\n");
    out.push_str(format!("{:<6} {:>7} {:>14} {:>14}", "state", "months", "mean temp (K)", "sunshine (h)").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<6} {:-<7} {:-<14} {:-<14}", "", "", "", "").trim_end());
    out.push('\n');

    for s in states {
        let n = s.months.len();
        let (temp, sun) = if n == 0 {
            ("-".to_string(), "-".to_string())
        } else {
            let temp: f64 = s.months.values().map(|m| m.temp.mean).sum::<f64>() / n as f64;
            let sun: f64 = s.months.values().map(|m| m.sunshine_hours).sum();
            (format!("{temp:.1}"), format!("{sun:.1}"))
        };
        out.push_str(format!("{:<6} {:>7} {:>14} {:>14}", truncate(&s.state, 6), n, temp, sun).trim_end());
        out.push('\n');
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::data::weather::MonthlyWeather;
    use crate::domain::economic::{Classification, Indicator};
    use crate::domain::reference::{default_categories, state_table};
    use crate::domain::{ApportionConfig, CategoryId, Period, PeriodTotal, RawMetrics, UnitId};
    use crate::engine::{Apportioner, RunInputs, run};

    #[test]
    fn census_summary_lists_failures_and_top_rows() {
        let units = state_table();
        let engine = Apportioner::new(ApportionConfig::default(), &units).unwrap();
        let metrics = BTreeMap::from([
            (UnitId::from("01"), RawMetrics { payroll: 60.0, establishments: 40.0 }),
            (UnitId::from("02"), RawMetrics { payroll: 30.0, establishments: 40.0 }),
            (UnitId::from("04"), RawMetrics { payroll: 10.0, establishments: 20.0 }),
        ]);
        let inputs = RunInputs {
            metrics: BTreeMap::from([(CategoryId::from("445"), metrics)]),
            totals: vec![PeriodTotal {
                period: Period::new(2024, 1).unwrap(),
                category: "445".into(),
                value: 1000.0,
            }],
            excluded: Default::default(),
        };
        let out = run(&engine, &inputs);

        let text = format_census_summary(&out, &units, &default_categories(), 2);
        assert!(text.contains("Periods: 1 (2024-01 .. 2024-01)"));
        assert!(text.contains("Validation: FAIL (1 failing periods)"));
        assert!(text.contains("2024-01  totals=ok units=3/51 shares=[445:1.0000] FAIL"));
        assert!(text.contains("Top 2 for 445 in 2024-01:"));
        assert!(text.contains("AL"));
        assert!(text.contains("520.00"));
        // Only two rows in the table.
        assert!(!text.contains("140.00"));
    }

    #[test]
    fn economic_summary_shows_latest_month() {
        let month = |m: u32, v: f64| EconomicMonth {
            period: Period::new(2024, m).unwrap(),
            metrics: BTreeMap::from([(
                Indicator::FederalFundsRate,
                Classification {
                    value: Some(v),
                    category: "high_rate".into(),
                    description: String::new(),
                    impact: "High borrowing costs".into(),
                    label: "Federal Funds Rate (FEDFUNDS)".into(),
                },
            )]),
        };
        let text = format_economic_summary(&[month(1, 5.1), month(2, 5.33)]);
        assert!(text.contains("Months: 2"));
        assert!(text.contains("Latest (2024-02):"));
        assert!(text.contains("5.33"));
        assert!(text.contains("federal_funds_rate"));
    }

    #[test]
    fn weather_summary_handles_empty_states() {
        let mut jan = MonthlyWeather {
            month: 1,
            sunshine_hours: 100.0,
            ..Default::default()
        };
        jan.temp.mean = 280.0;
        let states = vec![
            StateWeather {
                state: "CA".into(),
                months: BTreeMap::from([(1, jan)]),
            },
            StateWeather {
                state: "NY".into(),
                months: BTreeMap::new(),
            },
        ];
        let text = format_weather_summary(&states);
        assert!(text.contains("280.0"));
        assert!(text.lines().any(|l| l.starts_with("NY") && l.contains('-')));
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("445", 8), "445");
        assert_eq!(truncate("abcdefghij", 5), "abcd.");
    }
}
