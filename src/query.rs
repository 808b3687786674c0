//! Query data model
//!
//! The structured shapes that cross the trust boundary: the translator emits
//! a [`CandidateQuery`] (untrusted), the guard turns it into a
//! [`ValidatedQuery`] (the only thing the executor accepts), and execution
//! yields a [`ResultSet`] that echoes the validated query for traceability.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Row shape shared by result sets and the flat record store.
pub type Record = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in", alias = "IN")]
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub operator: FilterOp,
    pub value: serde_json::Value,
}

/// Aggregation request as emitted by the translator. The function arrives as
/// free text so the guard can reject anything outside its allow-list instead
/// of failing at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub function: String,
    pub metric: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default = "SortSpec::default_direction")]
    pub direction: SortDirection,
}

impl SortSpec {
    fn default_direction() -> SortDirection {
        SortDirection::Desc
    }
}

fn default_operation() -> String {
    "select".to_string()
}

/// Unvalidated structured query produced from natural language.
///
/// Never executed directly; only a [`ValidatedQuery`] reaches the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Intended operation. Anything but a read/aggregate is rejected.
    #[serde(default = "default_operation")]
    pub operation: String,

    /// Dimensions projected into the result.
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Metrics projected or aggregated.
    #[serde(default)]
    pub metrics: Vec<String>,

    #[serde(default)]
    pub filters: Vec<FilterPredicate>,

    #[serde(default)]
    pub group_by: Vec<String>,

    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,

    #[serde(default)]
    pub sort: Option<SortSpec>,

    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for CandidateQuery {
    fn default() -> Self {
        Self {
            operation: default_operation(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            sort: None,
            limit: None,
        }
    }
}

/// Aggregation functions the guard allows through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggFn {
    /// Parse a translator-supplied function name. `None` means the guard
    /// must reject with `UnsupportedAggregation`.
    pub fn parse(raw: &str) -> Option<AggFn> {
        match raw.trim().to_lowercase().as_str() {
            "sum" | "total" => Some(AggFn::Sum),
            "avg" | "average" | "mean" => Some(AggFn::Avg),
            "count" => Some(AggFn::Count),
            "min" => Some(AggFn::Min),
            "max" => Some(AggFn::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggFn::Sum => "sum",
            AggFn::Avg => "avg",
            AggFn::Count => "count",
            AggFn::Min => "min",
            AggFn::Max => "max",
        }
    }
}

/// Aggregation with the function resolved against the allow-list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggPlan {
    pub function: AggFn,
    pub metric: String,
    pub alias: String,
}

/// A Candidate Query that has passed the guard. The constructor is not part
/// of the public API: outside this crate, the only way to obtain one is
/// through `QueryGuard::validate`, which is what makes "validated" mean
/// something to the executor's signature.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedQuery {
    candidate: CandidateQuery,
    aggregations: Vec<AggPlan>,
    limit: usize,
}

impl ValidatedQuery {
    pub(crate) fn new(
        candidate: CandidateQuery,
        aggregations: Vec<AggPlan>,
        limit: usize,
    ) -> Self {
        Self {
            candidate,
            aggregations,
            limit,
        }
    }

    pub fn candidate(&self) -> &CandidateQuery {
        &self.candidate
    }

    pub fn aggregations(&self) -> &[AggPlan] {
        &self.aggregations
    }

    /// Effective row limit after clamping.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Rectangular, ordered result of executing a validated query. Transient;
/// carries the validated query it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    pub query: ValidatedQuery,
    pub execution_time_ms: u64,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A structured request for more input; not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    /// Disambiguating follow-up prompts to show the analyst.
    pub prompts: Vec<String>,
}

/// Tagged translator output. Anything that fails to parse into one of these
/// variants is a parse failure and advances the backend chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranslationOutcome {
    Query { query: CandidateQuery },
    Clarification(ClarificationRequest),
}

/// One prior question/answer exchange, passed explicitly into the translator
/// so follow-ups resolve without implicit session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// The structured query the prior turn executed, when there was one.
    #[serde(default)]
    pub query: Option<CandidateQuery>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_query_parses_translator_json() {
        let raw = r#"{
            "operation": "select",
            "dimensions": ["platform"],
            "metrics": ["spend"],
            "filters": [{"column": "platform", "operator": "=", "value": "google"}],
            "group_by": ["platform"],
            "aggregations": [{"function": "sum", "metric": "spend"}],
            "sort": {"column": "sum_spend", "direction": "desc"},
            "limit": 50
        }"#;
        let query: CandidateQuery = serde_json::from_str(raw).unwrap();
        assert_eq!(query.filters[0].operator, FilterOp::Eq);
        assert_eq!(query.sort.as_ref().unwrap().direction, SortDirection::Desc);
        assert_eq!(query.limit, Some(50));
    }

    #[test]
    fn operation_defaults_to_select() {
        let query: CandidateQuery = serde_json::from_str(r#"{"metrics": ["spend"]}"#).unwrap();
        assert_eq!(query.operation, "select");
    }

    #[test]
    fn translation_outcome_is_tagged() {
        let clarification: TranslationOutcome = serde_json::from_str(
            r#"{"type": "clarification", "prompts": ["Which metric: spend or clicks?"]}"#,
        )
        .unwrap();
        assert!(matches!(
            clarification,
            TranslationOutcome::Clarification(ClarificationRequest { .. })
        ));

        let garbage = serde_json::from_str::<TranslationOutcome>(r#"{"type": "other"}"#);
        assert!(garbage.is_err());
    }

    #[test]
    fn agg_fn_allow_list() {
        assert_eq!(AggFn::parse("AVERAGE"), Some(AggFn::Avg));
        assert_eq!(AggFn::parse("median"), None);
    }
}
