//! Campaign record store
//!
//! The ingestion boundary: loads advertising-campaign records from CSV into
//! an immutable in-memory store (polars frame + materialized JSON rows) and
//! builds the schema catalog from the loaded sample. The store is never
//! mutated; an upstream filter change produces a *new* store so pivot
//! sessions never observe a partially rebuilt record set.

use crate::catalog::SchemaCatalog;
use crate::error::{InsightError, Result};
use crate::query::Record;
use chrono::NaiveDate;
use polars::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Inclusive date range over a date-typed column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DateRange {
    pub column: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Clone)]
pub struct CampaignStore {
    frame: DataFrame,
    records: Arc<Vec<Record>>,
    catalog: Arc<SchemaCatalog>,
}

impl CampaignStore {
    /// Load a CSV dataset. Dates stay as ISO text so comparisons work
    /// lexicographically; the catalog types them `Date` from a value sample.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let frame = LazyCsvReader::new(path)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| InsightError::Execution(format!("failed to read CSV: {}", e)))?
            .collect()
            .map_err(|e| InsightError::Execution(format!("failed to collect CSV: {}", e)))?;
        info!(
            "loaded {} records ({} columns) from {}",
            frame.height(),
            frame.width(),
            path.display()
        );
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        let catalog = Arc::new(SchemaCatalog::from_frame(&frame)?);
        let records = Arc::new(frame_to_records(&frame)?);
        Ok(Self {
            frame,
            records,
            catalog,
        })
    }

    /// Swap in a hand-built catalog (e.g. one carrying derived metrics).
    pub fn with_catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn records(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.records)
    }

    pub fn catalog(&self) -> Arc<SchemaCatalog> {
        Arc::clone(&self.catalog)
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Apply upstream filters (platform set, date range) and return a new
    /// store over the narrowed record set. The original store is untouched.
    pub fn filtered(
        &self,
        platform_column: &str,
        platforms: &[String],
        date_range: Option<&DateRange>,
    ) -> Result<Self> {
        let mut predicate: Option<Expr> = None;

        if !platforms.is_empty() {
            if self.catalog.column(platform_column).is_none() {
                return Err(InsightError::Execution(format!(
                    "unknown platform column: {}",
                    platform_column
                )));
            }
            let membership = platforms
                .iter()
                .map(|p| col(platform_column).eq(lit(p.clone())))
                .reduce(|a, b| a.or(b));
            predicate = membership;
        }

        if let Some(range) = date_range {
            if self.catalog.column(&range.column).is_none() {
                return Err(InsightError::Execution(format!(
                    "unknown date column: {}",
                    range.column
                )));
            }
            let start = range.start.format("%Y-%m-%d").to_string();
            let end = range.end.format("%Y-%m-%d").to_string();
            let window = col(&range.column)
                .gt_eq(lit(start))
                .and(col(&range.column).lt_eq(lit(end)));
            predicate = Some(match predicate {
                Some(existing) => existing.and(window),
                None => window,
            });
        }

        let frame = match predicate {
            Some(expr) => self.frame.clone().lazy().filter(expr).collect()?,
            None => self.frame.clone(),
        };

        let records = Arc::new(frame_to_records(&frame)?);
        Ok(Self {
            frame,
            records,
            catalog: Arc::clone(&self.catalog),
        })
    }
}

/// Convert a frame into JSON rows, preserving row and column order.
pub(crate) fn frame_to_records(df: &DataFrame) -> Result<Vec<Record>> {
    let column_names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut row = Record::with_capacity(column_names.len());
        for name in &column_names {
            let series = df.column(name)?;
            row.insert(name.clone(), series_value_to_json(series, row_idx)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Convert a single value from a polars series to JSON.
pub(crate) fn series_value_to_json(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    if series.is_null().get(row_idx).unwrap_or(false) {
        return Ok(serde_json::Value::Null);
    }

    let any_val = series
        .get(row_idx)
        .map_err(|_| InsightError::Execution("failed to get value from series".to_string()))?;

    match series.dtype() {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            match any_val.try_extract::<i64>() {
                Ok(val) => Ok(serde_json::Value::Number(serde_json::Number::from(val))),
                Err(_) => Ok(serde_json::Value::Null),
            }
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            match any_val.try_extract::<u64>() {
                Ok(val) => Ok(serde_json::Value::Number(serde_json::Number::from(val))),
                Err(_) => Ok(serde_json::Value::Null),
            }
        }
        DataType::Float32 | DataType::Float64 => match any_val.try_extract::<f64>() {
            Ok(val) => Ok(serde_json::Number::from_f64(val)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)),
            Err(_) => Ok(serde_json::Value::Null),
        },
        DataType::Boolean => match any_val {
            AnyValue::Boolean(b) => Ok(serde_json::Value::Bool(b)),
            _ => Ok(serde_json::Value::Null),
        },
        DataType::String => match any_val.get_str() {
            Some(s) => Ok(serde_json::Value::String(s.to_string())),
            None => Ok(serde_json::Value::Null),
        },
        _ => Ok(serde_json::Value::String(format!("{}", any_val))),
    }
}
