//! Query Guard
//!
//! Pure validation of an untrusted Candidate Query against the schema
//! catalog and an allow-list of operations. This is the only place a
//! [`ValidatedQuery`] can be constructed, so anything the executor receives
//! has passed every rule below. No I/O.
//!
//! Rule order:
//! 1. read/aggregate operations only; mutation or multi-statement markers in
//!    the operation or any identifier reject as `UnsafeOperation`
//! 2. every referenced column must exist in the catalog (`UnknownColumn`)
//! 3. aggregation functions come from an allow-list (`UnsupportedAggregation`)
//! 4. the row limit is clamped, never rejected
//! 5. filter values are type-checked against the column type (`TypeMismatch`)
//!
//! Filter *values* are data, not identifiers: they are type-checked but not
//! keyword-scanned, and they never reach a query interpreter as text.

use crate::catalog::{ColumnType, SchemaCatalog};
use crate::error::RejectionReason;
use crate::query::{AggFn, AggPlan, CandidateQuery, ValidatedQuery};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

/// Hard cap on rows a single query may return.
pub const MAX_ROW_LIMIT: usize = 10_000;

/// Limit applied when the candidate requests none.
pub const DEFAULT_ROW_LIMIT: usize = 1_000;

lazy_static! {
    static ref UNSAFE_MARKER: Regex = Regex::new(
        r"(?i)\b(drop|delete|insert|update|alter|create|truncate|merge|grant|revoke|attach|exec|vacuum)\b|;|--"
    )
    .unwrap();
}

const ALLOWED_OPERATIONS: &[&str] = &["select", "aggregate"];

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryGuard;

impl QueryGuard {
    pub fn new() -> Self {
        Self
    }

    /// Validate a candidate. Returns the candidate unchanged (modulo row
    /// limit clamping) as a [`ValidatedQuery`], or the first rejection in
    /// rule order.
    pub fn validate(
        &self,
        candidate: &CandidateQuery,
        catalog: &SchemaCatalog,
    ) -> Result<ValidatedQuery, RejectionReason> {
        self.check_operation(candidate)?;
        self.check_columns(candidate, catalog)?;
        let aggregations = self.check_aggregations(candidate)?;
        let limit = candidate
            .limit
            .map(|requested| requested.min(MAX_ROW_LIMIT))
            .unwrap_or(DEFAULT_ROW_LIMIT);
        self.check_filter_types(candidate, catalog)?;

        Ok(ValidatedQuery::new(candidate.clone(), aggregations, limit))
    }

    fn check_operation(&self, candidate: &CandidateQuery) -> Result<(), RejectionReason> {
        let op = candidate.operation.trim();
        if !ALLOWED_OPERATIONS
            .iter()
            .any(|allowed| op.eq_ignore_ascii_case(allowed))
        {
            return Err(RejectionReason::UnsafeOperation {
                detail: format!("operation '{}' is not on the read-only allow-list", op),
            });
        }

        // Identifiers are the only strings an execution layer could ever
        // interpret; scan them all for mutation keywords and statement
        // separators.
        for identifier in self.identifiers(candidate) {
            if UNSAFE_MARKER.is_match(&identifier) {
                return Err(RejectionReason::UnsafeOperation {
                    detail: format!("disallowed marker in identifier '{}'", identifier),
                });
            }
        }
        Ok(())
    }

    fn identifiers(&self, candidate: &CandidateQuery) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        names.extend(candidate.dimensions.iter().cloned());
        names.extend(candidate.metrics.iter().cloned());
        names.extend(candidate.group_by.iter().cloned());
        names.extend(candidate.filters.iter().map(|f| f.column.clone()));
        for agg in &candidate.aggregations {
            names.push(agg.metric.clone());
            if let Some(ref alias) = agg.alias {
                names.push(alias.clone());
            }
        }
        if let Some(ref sort) = candidate.sort {
            names.push(sort.column.clone());
        }
        names
    }

    fn check_columns(
        &self,
        candidate: &CandidateQuery,
        catalog: &SchemaCatalog,
    ) -> Result<(), RejectionReason> {
        let unknown = |name: &str| RejectionReason::UnknownColumn {
            name: name.to_string(),
        };

        for name in candidate
            .dimensions
            .iter()
            .chain(candidate.metrics.iter())
            .chain(candidate.group_by.iter())
        {
            if !catalog.knows(name) {
                return Err(unknown(name));
            }
        }
        for filter in &candidate.filters {
            if !catalog.knows(&filter.column) {
                return Err(unknown(&filter.column));
            }
        }
        for agg in &candidate.aggregations {
            if !catalog.knows(&agg.metric) {
                return Err(unknown(&agg.metric));
            }
        }
        if let Some(ref sort) = candidate.sort {
            if !catalog.knows(&sort.column) && !self.is_output_alias(candidate, &sort.column) {
                return Err(unknown(&sort.column));
            }
        }
        Ok(())
    }

    /// Sort may target an aggregation's output column instead of a schema
    /// column.
    fn is_output_alias(&self, candidate: &CandidateQuery, name: &str) -> bool {
        candidate.aggregations.iter().any(|agg| {
            agg.alias.as_deref() == Some(name)
                || AggFn::parse(&agg.function)
                    .map(|f| default_alias(f, &agg.metric) == name)
                    .unwrap_or(false)
        })
    }

    fn check_aggregations(
        &self,
        candidate: &CandidateQuery,
    ) -> Result<Vec<AggPlan>, RejectionReason> {
        let mut plans = Vec::with_capacity(candidate.aggregations.len());
        for agg in &candidate.aggregations {
            let function = AggFn::parse(&agg.function).ok_or_else(|| {
                RejectionReason::UnsupportedAggregation {
                    function: agg.function.clone(),
                }
            })?;
            let alias = agg
                .alias
                .clone()
                .unwrap_or_else(|| default_alias(function, &agg.metric));
            plans.push(AggPlan {
                function,
                metric: agg.metric.clone(),
                alias,
            });
        }
        Ok(plans)
    }

    fn check_filter_types(
        &self,
        candidate: &CandidateQuery,
        catalog: &SchemaCatalog,
    ) -> Result<(), RejectionReason> {
        for filter in &candidate.filters {
            // Derived metrics have no stored column to filter on; treat them
            // as numbers.
            let expected = catalog
                .column(&filter.column)
                .map(|spec| spec.data_type)
                .unwrap_or(ColumnType::Number);

            match &filter.value {
                serde_json::Value::Array(values) => {
                    for value in values {
                        check_scalar_type(&filter.column, expected, value)?;
                    }
                }
                scalar => check_scalar_type(&filter.column, expected, scalar)?,
            }
        }
        Ok(())
    }
}

pub fn default_alias(function: AggFn, metric: &str) -> String {
    format!("{}_{}", function.as_str(), metric)
}

fn check_scalar_type(
    column: &str,
    expected: ColumnType,
    value: &serde_json::Value,
) -> Result<(), RejectionReason> {
    let ok = match expected {
        ColumnType::Number => value.is_number(),
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Text => value.is_string(),
        ColumnType::Date => value
            .as_str()
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
            .unwrap_or(false),
    };
    if ok {
        Ok(())
    } else {
        Err(RejectionReason::TypeMismatch {
            column: column.to_string(),
            expected: expected.as_str().to_string(),
            got: json_type_name(value).to_string(),
        })
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AggregationSpec, FilterOp, FilterPredicate, SortSpec};
    use polars::prelude::*;

    fn catalog() -> SchemaCatalog {
        let df = df![
            "platform" => ["google", "meta"],
            "date" => ["2024-01-01", "2024-01-02"],
            "spend" => [100.0, 50.0],
            "clicks" => [10i64, 5],
        ]
        .unwrap();
        SchemaCatalog::from_frame(&df).unwrap()
    }

    fn sum_spend_by_platform() -> CandidateQuery {
        CandidateQuery {
            operation: "select".to_string(),
            dimensions: vec!["platform".to_string()],
            group_by: vec!["platform".to_string()],
            aggregations: vec![AggregationSpec {
                function: "sum".to_string(),
                metric: "spend".to_string(),
                alias: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn rejects_mutating_operation() {
        let guard = QueryGuard::new();
        let candidate = CandidateQuery {
            operation: "DROP".to_string(),
            ..Default::default()
        };
        let err = guard.validate(&candidate, &catalog()).unwrap_err();
        assert!(matches!(err, RejectionReason::UnsafeOperation { .. }));
    }

    #[test]
    fn rejects_marker_in_identifier() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.dimensions = vec!["platform; drop table campaigns".to_string()];
        let err = guard.validate(&candidate, &catalog()).unwrap_err();
        assert!(matches!(err, RejectionReason::UnsafeOperation { .. }));
    }

    #[test]
    fn rejects_unknown_column() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.group_by = vec!["device".to_string()];
        let err = guard.validate(&candidate, &catalog()).unwrap_err();
        assert_eq!(
            err,
            RejectionReason::UnknownColumn {
                name: "device".to_string()
            }
        );
    }

    #[test]
    fn rejects_unsupported_aggregation() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.aggregations[0].function = "median".to_string();
        let err = guard.validate(&candidate, &catalog()).unwrap_err();
        assert!(matches!(
            err,
            RejectionReason::UnsupportedAggregation { .. }
        ));
    }

    #[test]
    fn clamps_row_limit_silently() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.limit = Some(1_000_000);
        let validated = guard.validate(&candidate, &catalog()).unwrap();
        assert_eq!(validated.limit(), MAX_ROW_LIMIT);

        candidate.limit = None;
        let validated = guard.validate(&candidate, &catalog()).unwrap();
        assert_eq!(validated.limit(), DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn rejects_type_mismatch() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.filters = vec![FilterPredicate {
            column: "spend".to_string(),
            operator: FilterOp::Gt,
            value: serde_json::json!("lots"),
        }];
        let err = guard.validate(&candidate, &catalog()).unwrap_err();
        assert!(matches!(err, RejectionReason::TypeMismatch { .. }));
    }

    #[test]
    fn date_filters_must_be_iso_dates() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.filters = vec![FilterPredicate {
            column: "date".to_string(),
            operator: FilterOp::Gte,
            value: serde_json::json!("January 1st"),
        }];
        assert!(guard.validate(&candidate, &catalog()).is_err());

        candidate.filters[0].value = serde_json::json!("2024-01-01");
        assert!(guard.validate(&candidate, &catalog()).is_ok());
    }

    #[test]
    fn valid_candidate_passes_unchanged_modulo_clamp() {
        let guard = QueryGuard::new();
        let mut candidate = sum_spend_by_platform();
        candidate.sort = Some(SortSpec {
            column: "sum_spend".to_string(),
            direction: crate::query::SortDirection::Desc,
        });
        candidate.limit = Some(10);

        let validated = guard.validate(&candidate, &catalog()).unwrap();
        assert_eq!(validated.candidate(), &candidate);
        assert_eq!(validated.limit(), 10);
        assert_eq!(validated.aggregations()[0].alias, "sum_spend");
    }
}
