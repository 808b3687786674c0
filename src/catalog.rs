//! Schema Catalog
//!
//! Read-only description of the loaded dataset: which columns are dimensions
//! (categorical, groupable) and which are metrics (numeric, aggregatable),
//! plus derived-metric formulas over base metrics. The catalog is immutable
//! per dataset version; the ingestion boundary rebuilds it whenever the
//! underlying dataset changes.

use crate::error::{InsightError, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strsim::jaro_winkler;

/// Minimum similarity for a nearest-column suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// How many leading rows are sampled when sniffing date-shaped text columns.
const DATE_SAMPLE_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Dimension,
    Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub data_type: ColumnType,
    pub nullable: bool,
}

/// Formula for a derived metric, defined over base metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Formula {
    /// `numerator / denominator`, aggregated as ratio-of-sums.
    Ratio { numerator: String, denominator: String },
}

impl Formula {
    pub fn display(&self) -> String {
        match self {
            Formula::Ratio { numerator, denominator } => {
                format!("ratio({}, {})", numerator, denominator)
            }
        }
    }
}

/// Snapshot returned by [`SchemaCatalog::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct CatalogDescription {
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub derived: Vec<(String, String)>,
}

/// Ordered mapping of column name -> spec, plus derived-metric formulas.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    columns: Vec<ColumnSpec>,
    derived: Vec<(String, Formula)>,

    // Indexes for fast lookup
    columns_by_name: HashMap<String, usize>,
    derived_by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        if columns.is_empty() {
            return Err(InsightError::SchemaUnavailable(
                "no columns in dataset".to_string(),
            ));
        }
        let columns_by_name = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.name.clone(), idx))
            .collect();
        Ok(Self {
            columns,
            derived: Vec::new(),
            columns_by_name,
            derived_by_name: HashMap::new(),
        })
    }

    /// Infer a catalog from a raw dataset sample, in column order. O(columns)
    /// up to a bounded per-column value sample for date sniffing.
    ///
    /// Numeric columns become metrics; everything else is a dimension. Text
    /// columns whose leading values parse as ISO dates are typed `Date` so
    /// the guard can type-check date filters against them.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        if df.width() == 0 {
            return Err(InsightError::SchemaUnavailable(
                "no dataset has been loaded".to_string(),
            ));
        }

        let mut columns = Vec::with_capacity(df.width());
        for series in df.get_columns() {
            let name = series.name().to_string();
            let nullable = series.null_count() > 0;
            let (kind, data_type) = match series.dtype() {
                dt if dt.is_numeric() => (ColumnKind::Metric, ColumnType::Number),
                DataType::Boolean => (ColumnKind::Dimension, ColumnType::Boolean),
                DataType::Date | DataType::Datetime(_, _) => {
                    (ColumnKind::Dimension, ColumnType::Date)
                }
                _ => {
                    if Self::looks_like_date(series) {
                        (ColumnKind::Dimension, ColumnType::Date)
                    } else {
                        (ColumnKind::Dimension, ColumnType::Text)
                    }
                }
            };
            columns.push(ColumnSpec {
                name,
                kind,
                data_type,
                nullable,
            });
        }
        Self::new(columns)
    }

    fn looks_like_date(series: &Series) -> bool {
        let Ok(strings) = series.str() else {
            return false;
        };
        let mut seen = false;
        for value in strings.into_iter().take(DATE_SAMPLE_ROWS).flatten() {
            if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
                return false;
            }
            seen = true;
        }
        seen
    }

    /// Register a derived metric. The formula's base metrics must already be
    /// catalogued as metrics.
    pub fn with_derived(mut self, name: &str, formula: Formula) -> Result<Self> {
        let Formula::Ratio { numerator, denominator } = &formula;
        for base in [numerator, denominator] {
            match self.column(base) {
                Some(spec) if spec.kind == ColumnKind::Metric => {}
                _ => {
                    return Err(InsightError::SchemaUnavailable(format!(
                        "derived metric '{}' references unknown base metric '{}'",
                        name, base
                    )))
                }
            }
        }
        self.derived_by_name
            .insert(name.to_string(), self.derived.len());
        self.derived.push((name.to_string(), formula));
        Ok(self)
    }

    pub fn describe(&self) -> CatalogDescription {
        CatalogDescription {
            dimensions: self
                .columns
                .iter()
                .filter(|c| c.kind == ColumnKind::Dimension)
                .map(|c| c.name.clone())
                .collect(),
            metrics: self
                .columns
                .iter()
                .filter(|c| c.kind == ColumnKind::Metric)
                .map(|c| c.name.clone())
                .collect(),
            derived: self
                .derived
                .iter()
                .map(|(name, formula)| (name.clone(), formula.display()))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns_by_name.get(name).map(|idx| &self.columns[*idx])
    }

    pub fn derived_formula(&self, name: &str) -> Option<&Formula> {
        self.derived_by_name
            .get(name)
            .map(|idx| &self.derived[*idx].1)
    }

    pub fn is_dimension(&self, name: &str) -> bool {
        matches!(self.column(name), Some(spec) if spec.kind == ColumnKind::Dimension)
    }

    /// True for base metrics and derived metrics alike.
    pub fn is_metric(&self, name: &str) -> bool {
        matches!(self.column(name), Some(spec) if spec.kind == ColumnKind::Metric)
            || self.derived_by_name.contains_key(name)
    }

    /// True when `name` resolves to any known column or derived metric.
    pub fn knows(&self, name: &str) -> bool {
        self.columns_by_name.contains_key(name) || self.derived_by_name.contains_key(name)
    }

    /// Nearest known column for remediation hints on unknown-column
    /// rejections. Jaro-Winkler keeps short edit slips ("platfrom") close.
    pub fn closest_column(&self, name: &str) -> Option<String> {
        let target = name.to_lowercase();
        self.columns
            .iter()
            .map(|c| c.name.clone())
            .chain(self.derived.iter().map(|(n, _)| n.clone()))
            .map(|candidate| {
                let score = jaro_winkler(&candidate.to_lowercase(), &target);
                (candidate, score)
            })
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(candidate, _)| candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        df![
            "platform" => ["google", "meta", "google"],
            "date" => ["2024-01-01", "2024-01-02", "2024-01-03"],
            "spend" => [100.0, 50.0, 25.0],
            "clicks" => [10i64, 4, 2],
        ]
        .unwrap()
    }

    #[test]
    fn infers_kinds_from_frame() {
        let catalog = SchemaCatalog::from_frame(&sample_frame()).unwrap();
        let description = catalog.describe();

        assert_eq!(description.dimensions, vec!["platform", "date"]);
        assert_eq!(description.metrics, vec!["spend", "clicks"]);
        assert_eq!(catalog.column("date").unwrap().data_type, ColumnType::Date);
        assert_eq!(
            catalog.column("platform").unwrap().data_type,
            ColumnType::Text
        );
    }

    #[test]
    fn empty_frame_is_schema_unavailable() {
        let df = DataFrame::default();
        let err = SchemaCatalog::from_frame(&df).unwrap_err();
        assert!(matches!(err, InsightError::SchemaUnavailable(_)));
    }

    #[test]
    fn derived_metric_requires_known_bases() {
        let catalog = SchemaCatalog::from_frame(&sample_frame()).unwrap();
        let catalog = catalog
            .with_derived(
                "cpc",
                Formula::Ratio {
                    numerator: "spend".to_string(),
                    denominator: "clicks".to_string(),
                },
            )
            .unwrap();
        assert!(catalog.is_metric("cpc"));
        assert_eq!(
            catalog.describe().derived,
            vec![("cpc".to_string(), "ratio(spend, clicks)".to_string())]
        );

        let bad = catalog.with_derived(
            "cpa",
            Formula::Ratio {
                numerator: "spend".to_string(),
                denominator: "conversions".to_string(),
            },
        );
        assert!(bad.is_err());
    }

    #[test]
    fn suggests_closest_column_for_typos() {
        let catalog = SchemaCatalog::from_frame(&sample_frame()).unwrap();
        assert_eq!(catalog.closest_column("platfrom"), Some("platform".into()));
        assert_eq!(catalog.closest_column("zzz"), None);
    }
}
