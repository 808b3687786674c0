//! Query Executor
//!
//! Runs a guarded query against the in-memory analytical store and returns a
//! rectangular result set. Synchronous from the caller's perspective;
//! internally the polars collect happens on a blocking thread under a hard
//! timeout. Execution is all-or-nothing: a timeout or error never yields
//! partial rows. An empty result set is a valid, non-error outcome.

use crate::catalog::Formula;
use crate::error::{InsightError, Result};
use crate::query::{AggFn, FilterOp, FilterPredicate, ResultSet, SortDirection, ValidatedQuery};
use crate::store::{frame_to_records, CampaignStore};
use polars::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct QueryExecutor {
    store: CampaignStore,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(store: CampaignStore) -> Self {
        Self {
            store,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &CampaignStore {
        &self.store
    }

    /// Execute a validated (now trusted) query.
    pub async fn execute(&self, validated: &ValidatedQuery) -> Result<ResultSet> {
        let start = Instant::now();
        let plan = self.build_plan(validated)?;

        let collected = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || plan.collect()),
        )
        .await;

        let frame = match collected {
            Err(_) => return Err(InsightError::ExecutionTimeout(self.timeout)),
            Ok(joined) => joined
                .map_err(|e| InsightError::Execution(format!("execution task failed: {}", e)))??,
        };

        let columns: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = frame_to_records(&frame)?;
        let execution_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "query executed in {}ms, {} rows",
            execution_time_ms,
            rows.len()
        );

        Ok(ResultSet {
            columns,
            rows,
            query: validated.clone(),
            execution_time_ms,
        })
    }

    fn build_plan(&self, validated: &ValidatedQuery) -> Result<LazyFrame> {
        let candidate = validated.candidate();
        let catalog = self.store.catalog();
        let mut lf = self.store.frame().clone().lazy();

        for filter in &candidate.filters {
            lf = lf.filter(filter_expr(filter)?);
        }

        if !validated.aggregations().is_empty() {
            let mut agg_exprs: Vec<Expr> = Vec::new();
            // (alias, numerator helper, denominator helper) per derived metric
            let mut ratios: Vec<(String, String, String)> = Vec::new();

            for plan in validated.aggregations() {
                if let Some(Formula::Ratio { numerator, denominator }) =
                    catalog.derived_formula(&plan.metric)
                {
                    let num_alias = format!("__num_{}", plan.alias);
                    let den_alias = format!("__den_{}", plan.alias);
                    agg_exprs.push(col(numerator).sum().alias(&num_alias));
                    agg_exprs.push(col(denominator).sum().alias(&den_alias));
                    ratios.push((plan.alias.clone(), num_alias, den_alias));
                    continue;
                }
                let expr = match plan.function {
                    AggFn::Sum => col(&plan.metric).sum(),
                    AggFn::Avg => col(&plan.metric).mean(),
                    AggFn::Count => len(),
                    AggFn::Min => col(&plan.metric).min(),
                    AggFn::Max => col(&plan.metric).max(),
                };
                agg_exprs.push(expr.alias(&plan.alias));
            }

            lf = if candidate.group_by.is_empty() {
                lf.select(agg_exprs)
            } else {
                let groups: Vec<Expr> = candidate.group_by.iter().map(|g| col(g)).collect();
                lf.group_by(groups).agg(agg_exprs)
            };

            for (alias, num_alias, den_alias) in &ratios {
                lf = lf.with_column(
                    when(
                        col(den_alias)
                            .cast(DataType::Float64)
                            .eq(lit(0.0f64)),
                    )
                    .then(lit(NULL))
                    .otherwise(
                        col(num_alias).cast(DataType::Float64)
                            / col(den_alias).cast(DataType::Float64),
                    )
                    .alias(alias),
                );
            }

            // Output order: group columns, then aggregates as requested.
            let mut final_cols: Vec<Expr> =
                candidate.group_by.iter().map(|g| col(g)).collect();
            for plan in validated.aggregations() {
                final_cols.push(col(&plan.alias));
            }
            lf = lf.select(final_cols);
        } else {
            // Plain projection. Derived metrics materialize per-row.
            for metric in &candidate.metrics {
                if let Some(Formula::Ratio { numerator, denominator }) =
                    catalog.derived_formula(metric)
                {
                    lf = lf.with_column(
                        when(
                            col(denominator)
                                .cast(DataType::Float64)
                                .eq(lit(0.0f64)),
                        )
                        .then(lit(NULL))
                        .otherwise(
                            col(numerator).cast(DataType::Float64)
                                / col(denominator).cast(DataType::Float64),
                        )
                        .alias(metric),
                    );
                }
            }
            let projection: Vec<Expr> = candidate
                .dimensions
                .iter()
                .chain(candidate.metrics.iter())
                .map(|name| col(name))
                .collect();
            if !projection.is_empty() {
                lf = lf.select(projection);
            }
        }

        if let Some(ref sort) = candidate.sort {
            let descending = sort.direction == SortDirection::Desc;
            debug!("sorting by {} (descending: {})", sort.column, descending);
            lf = lf.sort(
                [sort.column.as_str()],
                SortMultipleOptions::default().with_order_descending(descending),
            );
        }

        Ok(lf.limit(validated.limit() as u32))
    }
}

fn filter_expr(filter: &FilterPredicate) -> Result<Expr> {
    let column = col(&filter.column);
    match filter.operator {
        FilterOp::In => {
            let values = filter.value.as_array().ok_or_else(|| {
                InsightError::Execution(format!(
                    "'in' filter on '{}' requires an array value",
                    filter.column
                ))
            })?;
            values
                .iter()
                .map(|v| col(&filter.column).eq(value_to_lit(v)))
                .reduce(|a, b| a.or(b))
                .ok_or_else(|| {
                    InsightError::Execution(format!(
                        "'in' filter on '{}' requires at least one value",
                        filter.column
                    ))
                })
        }
        FilterOp::Eq => Ok(column.eq(value_to_lit(&filter.value))),
        FilterOp::Neq => Ok(column.neq(value_to_lit(&filter.value))),
        FilterOp::Gt => Ok(column.gt(value_to_lit(&filter.value))),
        FilterOp::Lt => Ok(column.lt(value_to_lit(&filter.value))),
        FilterOp::Gte => Ok(column.gt_eq(value_to_lit(&filter.value))),
        FilterOp::Lte => Ok(column.lt_eq(value_to_lit(&filter.value))),
    }
}

fn value_to_lit(value: &serde_json::Value) -> Expr {
    match value {
        serde_json::Value::Bool(b) => lit(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                lit(i)
            } else {
                lit(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => lit(s.clone()),
        other => lit(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Formula, SchemaCatalog};
    use crate::guard::QueryGuard;
    use crate::query::{AggregationSpec, CandidateQuery, SortSpec};

    fn store() -> CampaignStore {
        let frame = df![
            "platform" => ["google", "meta", "google"],
            "spend" => [100.0, 50.0, 25.0],
            "clicks" => [10i64, 5, 0],
        ]
        .unwrap();
        let catalog = SchemaCatalog::from_frame(&frame)
            .unwrap()
            .with_derived(
                "cpc",
                Formula::Ratio {
                    numerator: "spend".to_string(),
                    denominator: "clicks".to_string(),
                },
            )
            .unwrap();
        CampaignStore::from_frame(frame).unwrap().with_catalog(catalog)
    }

    fn validate(candidate: &CandidateQuery, store: &CampaignStore) -> ValidatedQuery {
        QueryGuard::new()
            .validate(candidate, &store.catalog())
            .unwrap()
    }

    #[tokio::test]
    async fn grouped_sum_with_sort() {
        let store = store();
        let candidate = CandidateQuery {
            group_by: vec!["platform".to_string()],
            aggregations: vec![AggregationSpec {
                function: "sum".to_string(),
                metric: "spend".to_string(),
                alias: None,
            }],
            sort: Some(SortSpec {
                column: "sum_spend".to_string(),
                direction: SortDirection::Desc,
            }),
            ..Default::default()
        };
        let validated = validate(&candidate, &store);
        let result = QueryExecutor::new(store).execute(&validated).await.unwrap();

        assert_eq!(result.columns, vec!["platform", "sum_spend"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["platform"], serde_json::json!("google"));
        assert_eq!(result.rows[0]["sum_spend"], serde_json::json!(125.0));
        assert_eq!(result.rows[1]["sum_spend"], serde_json::json!(50.0));
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let store = store();
        let candidate = CandidateQuery {
            filters: vec![crate::query::FilterPredicate {
                column: "platform".to_string(),
                operator: FilterOp::Eq,
                value: serde_json::json!("bing"),
            }],
            dimensions: vec!["platform".to_string()],
            metrics: vec!["spend".to_string()],
            ..Default::default()
        };
        let validated = validate(&candidate, &store);
        let result = QueryExecutor::new(store).execute(&validated).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn derived_metric_aggregates_as_ratio_of_sums() {
        let store = store();
        let candidate = CandidateQuery {
            aggregations: vec![AggregationSpec {
                function: "avg".to_string(),
                metric: "cpc".to_string(),
                alias: Some("cpc".to_string()),
            }],
            ..Default::default()
        };
        let validated = validate(&candidate, &store);
        let result = QueryExecutor::new(store).execute(&validated).await.unwrap();

        // 175 spend over 15 clicks
        let cpc = result.rows[0]["cpc"].as_f64().unwrap();
        assert!((cpc - 175.0 / 15.0).abs() < 1e-9);
    }
}
