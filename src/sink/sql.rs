//! Warehouse load scripts.
//!
//! Each dataset becomes a series of idempotent `MERGE` statements keyed on its
//! natural key, one statement per batch of rows, wrapped in a single
//! `BEGIN; ... COMMIT;` transaction. Re-running a script upserts in place.
//!
//! Values are rendered as literals: strings single-quoted with embedded quotes
//! doubled, missing or non-finite numbers as `NULL`. Schema and table names
//! must be plain identifiers.

use std::fs;
use std::path::Path;

use crate::data::weather::{StateWeather, WeatherStats};
use crate::domain::economic::{EconomicMonth, Indicator};
use crate::domain::UnitTable;
use crate::engine::ApportionRun;
use crate::error::{AppError, EXIT_CONFIG};
use crate::sink::json::RetailMetadata;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

const STAMP_COLUMN: &str = "inserted_at";

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<&str, AppError> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(AppError::new(EXIT_CONFIG, format!("Invalid SQL identifier '{name}'.")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Float(f64),
    Int(i64),
    Null,
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(s.into())
    }

    pub fn float(v: Option<f64>) -> Self {
        v.map_or(SqlValue::Null, SqlValue::Float)
    }

    pub fn render(&self) -> String {
        match self {
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Float(v) if v.is_finite() => format!("{v}"),
            SqlValue::Float(_) | SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: &'static str,
}

impl Column {
    fn new(name: impl Into<String>, sql_type: &'static str) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

/// Target table of a MERGE: its columns in row order and the key columns.
#[derive(Debug, Clone)]
pub struct MergeTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub keys: Vec<String>,
    /// Column set to `CURRENT_TIMESTAMP()` on update.
    pub stamp: Option<String>,
}

impl MergeTable {
    fn is_key(&self, column: &str) -> bool {
        self.keys.iter().any(|k| k == column)
    }

    /// One MERGE statement covering `rows`. Each row holds one value per column.
    pub fn render_merge(&self, rows: &[Vec<SqlValue>]) -> String {
        let mut out = String::new();
        out.push_str(&format!("MERGE INTO {} AS target\nUSING (\n", self.name));

        for (i, row) in rows.iter().enumerate() {
            let select: Vec<String> = self
                .columns
                .iter()
                .zip(row)
                .map(|(col, value)| format!("{}::{} AS {}", value.render(), col.sql_type, col.name))
                .collect();
            let lead = if i == 0 { "    SELECT " } else { "    UNION ALL SELECT " };
            out.push_str(lead);
            out.push_str(&select.join(", "));
            out.push('\n');
        }
        out.push_str(") AS source\n");

        let on: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("target.{k} = source.{k}"))
            .collect();
        out.push_str(&format!("ON {}\n", on.join(" AND ")));

        let mut updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.is_key(&c.name))
            .map(|c| format!("{0} = source.{0}", c.name))
            .collect();
        if let Some(stamp) = &self.stamp {
            updates.push(format!("{stamp} = CURRENT_TIMESTAMP()"));
        }
        if !updates.is_empty() {
            out.push_str(&format!("WHEN MATCHED THEN UPDATE SET {}\n", updates.join(", ")));
        }

        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let sources: Vec<String> = names.iter().map(|n| format!("source.{n}")).collect();
        out.push_str(&format!(
            "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});\n",
            names.join(", "),
            sources.join(", ")
        ));
        out
    }
}

/// Qualified `schema.table` prefix for generated table names.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlTarget {
    schema: String,
    table: String,
}

impl SqlTarget {
    pub fn new(schema: &str, table: &str) -> Result<Self, AppError> {
        Ok(Self {
            schema: validate_identifier(schema)?.to_string(),
            table: validate_identifier(table)?.to_string(),
        })
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn qualified_with(&self, suffix: &str) -> String {
        format!("{}.{}_{suffix}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlScript {
    statements: Vec<String>,
}

impl SqlScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one MERGE per chunk of at most `batch_size` rows.
    pub fn push_merge(&mut self, table: &MergeTable, rows: &[Vec<SqlValue>], batch_size: usize) {
        for chunk in rows.chunks(batch_size.max(1)) {
            self.statements.push(table.render_merge(chunk));
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("BEGIN;\n\n");
        for stmt in &self.statements {
            out.push_str(stmt);
            out.push('\n');
        }
        out.push_str("COMMIT;\n");
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::new(EXIT_CONFIG, format!("Failed to create directory '{}': {e}", parent.display()))
            })?;
        }
        fs::write(path, self.render())
            .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to write SQL script '{}': {e}", path.display())))
    }
}

/// Sales, national totals and category metadata of an apportionment run.
pub fn census_script(
    target: &SqlTarget,
    run: &ApportionRun,
    units: &UnitTable,
    metadata: &RetailMetadata,
    batch_size: usize,
) -> SqlScript {
    let mut script = SqlScript::new();

    let metadata_table = MergeTable {
        name: target.qualified_with("metadata"),
        columns: vec![
            Column::new("last_updated", "TIMESTAMP_NTZ"),
            Column::new("category_code", "VARCHAR"),
            Column::new("category_description", "VARCHAR"),
        ],
        keys: vec!["category_code".to_string()],
        stamp: None,
    };
    let metadata_rows: Vec<Vec<SqlValue>> = metadata
        .categories
        .iter()
        .map(|(id, label)| {
            vec![
                SqlValue::text(metadata.last_updated.to_string()),
                SqlValue::text(id.as_str()),
                SqlValue::text(label.as_str()),
            ]
        })
        .collect();
    script.push_merge(&metadata_table, &metadata_rows, batch_size);

    let totals_table = MergeTable {
        name: target.qualified_with("national_totals"),
        columns: vec![
            Column::new("month", "VARCHAR"),
            Column::new("category_code", "VARCHAR"),
            Column::new("total_sales", "DECIMAL(20,2)"),
        ],
        keys: vec!["month".to_string(), "category_code".to_string()],
        stamp: Some(STAMP_COLUMN.to_string()),
    };
    let total_rows: Vec<Vec<SqlValue>> = run
        .totals
        .iter()
        .map(|((period, category), value)| {
            vec![
                SqlValue::text(period.to_string()),
                SqlValue::text(category.as_str()),
                SqlValue::Float(*value),
            ]
        })
        .collect();
    script.push_merge(&totals_table, &total_rows, batch_size);

    let sales_table = MergeTable {
        name: target.qualified_with("sales"),
        columns: vec![
            Column::new("month", "VARCHAR"),
            Column::new("state_code", "VARCHAR"),
            Column::new("category_code", "VARCHAR"),
            Column::new("sales_value", "DECIMAL(20,2)"),
            Column::new("state_share", "DECIMAL(10,6)"),
        ],
        keys: vec![
            "month".to_string(),
            "state_code".to_string(),
            "category_code".to_string(),
        ],
        stamp: Some(STAMP_COLUMN.to_string()),
    };
    let sales_rows: Vec<Vec<SqlValue>> = run
        .allocations
        .iter()
        .map(|a| {
            vec![
                SqlValue::text(a.period.to_string()),
                SqlValue::text(units.display_code(&a.unit)),
                SqlValue::text(a.category.as_str()),
                SqlValue::Float(a.value),
                SqlValue::Float(a.share),
            ]
        })
        .collect();
    script.push_merge(&sales_table, &sales_rows, batch_size);

    script
}

/// One row per month, five columns per indicator.
pub fn economic_script(target: &SqlTarget, months: &[EconomicMonth], batch_size: usize) -> SqlScript {
    let mut columns = vec![Column::new("DATE", "VARCHAR")];
    for indicator in Indicator::ALL {
        let prefix = indicator.key().to_uppercase();
        columns.push(Column::new(format!("{prefix}_VALUE"), "FLOAT"));
        for field in ["CATEGORY", "DESCRIPTION", "IMPACT", "LABEL"] {
            columns.push(Column::new(format!("{prefix}_{field}"), "VARCHAR"));
        }
    }
    let table = MergeTable {
        name: target.qualified(),
        columns,
        keys: vec!["DATE".to_string()],
        stamp: Some(STAMP_COLUMN.to_uppercase()),
    };

    let rows: Vec<Vec<SqlValue>> = months
        .iter()
        .map(|m| {
            let mut row = vec![SqlValue::text(m.period.to_string())];
            for indicator in Indicator::ALL {
                match m.metrics.get(&indicator) {
                    Some(c) => row.extend([
                        SqlValue::float(c.value),
                        SqlValue::text(c.category.as_str()),
                        SqlValue::text(c.description.as_str()),
                        SqlValue::text(c.impact.as_str()),
                        SqlValue::text(c.label.as_str()),
                    ]),
                    None => row.extend(std::iter::repeat_n(SqlValue::Null, 5)),
                }
            }
            row
        })
        .collect();

    let mut script = SqlScript::new();
    script.push_merge(&table, &rows, batch_size);
    script
}

const WEATHER_MEASURES: [&str; 6] = ["TEMPERATURE", "PRESSURE", "HUMIDITY", "WIND", "PRECIPITATION", "CLOUDS"];
const WEATHER_FIELDS: [&str; 10] = [
    "RECORD_MIN",
    "RECORD_MAX",
    "AVERAGE_MIN",
    "AVERAGE_MAX",
    "MEDIAN",
    "MEAN",
    "P25",
    "P75",
    "ST_DEV",
    "NUM",
];

fn stat_values(stats: &WeatherStats) -> [SqlValue; 10] {
    [
        SqlValue::Float(stats.record_min),
        SqlValue::Float(stats.record_max),
        SqlValue::Float(stats.average_min),
        SqlValue::Float(stats.average_max),
        SqlValue::Float(stats.median),
        SqlValue::Float(stats.mean),
        SqlValue::Float(stats.p25),
        SqlValue::Float(stats.p75),
        SqlValue::Float(stats.st_dev),
        SqlValue::Int(i64::try_from(stats.num).unwrap_or(i64::MAX)),
    ]
}

/// One row per state and month.
pub fn weather_script(target: &SqlTarget, states: &[StateWeather], batch_size: usize) -> SqlScript {
    let mut columns = vec![Column::new("STATE_NAME", "VARCHAR"), Column::new("MONTH", "INTEGER")];
    for measure in WEATHER_MEASURES {
        for field in WEATHER_FIELDS {
            let sql_type = if field == "NUM" { "INTEGER" } else { "FLOAT" };
            columns.push(Column::new(format!("{measure}_{field}"), sql_type));
        }
    }
    columns.push(Column::new("SUNSHINE_HOURS_TOTAL", "FLOAT"));
    let table = MergeTable {
        name: target.qualified(),
        columns,
        keys: vec!["STATE_NAME".to_string(), "MONTH".to_string()],
        stamp: Some(STAMP_COLUMN.to_uppercase()),
    };

    let mut rows = Vec::new();
    for state in states {
        for (month, data) in &state.months {
            let mut row = vec![SqlValue::text(state.state.as_str()), SqlValue::Int(i64::from(*month))];
            for stats in [
                &data.temp,
                &data.pressure,
                &data.humidity,
                &data.wind,
                &data.precipitation,
                &data.clouds,
            ] {
                row.extend(stat_values(stats));
            }
            row.push(SqlValue::Float(data.sunshine_hours));
            rows.push(row);
        }
    }

    let mut script = SqlScript::new();
    script.push_merge(&table, &rows, batch_size);
    script
}
