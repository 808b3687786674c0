//! Pivot configuration
//!
//! The caller-held state that drives a tree build: ordered row dimensions
//! (order defines nesting depth), an optional column dimension, value
//! metrics, one aggregation function, a layout mode, and presentation-only
//! display options. Configuration errors surface here, before any tree
//! build is attempted.

use crate::catalog::{ColumnKind, SchemaCatalog};
use crate::error::{InsightError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    #[serde(alias = "average")]
    Avg,
    Count,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
        }
    }
}

/// How rows are rendered; never affects computed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// One dimension column, indentation per depth, collapsible rows.
    Nested,
    /// One column per row dimension, leaf rows only, no collapse state.
    Tabular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Compact,
    Normal,
    Comfortable,
}

/// Presentation-only knobs; not part of the aggregation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOptions {
    pub density: Density,
    pub striped: bool,
    pub gridlines: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            density: Density::Normal,
            striped: true,
            gridlines: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotConfiguration {
    /// Row dimensions, outermost first. Order is semantically significant.
    pub rows: Vec<String>,
    /// Optional column dimension; adds one value cell per distinct value.
    #[serde(default)]
    pub column: Option<String>,
    /// Value metrics, in display order.
    pub values: Vec<String>,
    pub aggregation: Aggregation,
    #[serde(default = "PivotConfiguration::default_layout")]
    pub layout: LayoutMode,
    #[serde(default)]
    pub display: DisplayOptions,
}

impl PivotConfiguration {
    pub fn new(rows: Vec<String>, values: Vec<String>, aggregation: Aggregation) -> Self {
        Self {
            rows,
            column: None,
            values,
            aggregation,
            layout: LayoutMode::Nested,
            display: DisplayOptions::default(),
        }
    }

    fn default_layout() -> LayoutMode {
        LayoutMode::Nested
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn with_layout(mut self, layout: LayoutMode) -> Self {
        self.layout = layout;
        self
    }

    /// Swap two adjacent row dimensions; the caller rebuilds the tree after.
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a < self.rows.len() && b < self.rows.len() {
            self.rows.swap(a, b);
        }
    }

    /// Check every referenced column against the catalog. Value metrics must
    /// be base metric columns: derived metrics have no per-record field to
    /// aggregate.
    pub fn validate(&self, catalog: &SchemaCatalog) -> Result<()> {
        if self.values.is_empty() {
            return Err(InsightError::PivotConfig(
                "at least one value metric is required".to_string(),
            ));
        }
        for dim in self.rows.iter().chain(self.column.iter()) {
            if !catalog.is_dimension(dim) {
                return Err(InsightError::PivotConfig(format!(
                    "'{}' is not a known dimension",
                    dim
                )));
            }
        }
        for metric in &self.values {
            match catalog.column(metric) {
                Some(spec) if spec.kind == ColumnKind::Metric => {}
                Some(_) => {
                    return Err(InsightError::PivotConfig(format!(
                        "'{}' is a dimension, not a metric",
                        metric
                    )))
                }
                None => {
                    return Err(InsightError::PivotConfig(format!(
                        "'{}' is not a known metric",
                        metric
                    )))
                }
            }
        }
        Ok(())
    }
}
