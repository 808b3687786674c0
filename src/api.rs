//! External interface layer
//!
//! Serde-typed request/response shapes for the three read-only surfaces: the
//! ask endpoint, the aggregate-data endpoint that feeds the pivot UI's
//! upstream fetch, and pivot export. No endpoint accepts raw query text from
//! a client; only the Candidate Query's structured fields ever cross the
//! trust boundary, and those still pass through the guard.

use crate::error::Result;
use crate::pipeline::{AskOutcome, AskSession, ModeFlags};
use crate::pivot::{export_delimited, ExportOptions, PivotConfiguration, PivotTree};
use crate::query::Record;
use crate::store::{CampaignStore, DateRange};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub mode_flags: ModeFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateDataRequest {
    /// Platforms to include; empty means all.
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// Dimension columns to project.
    pub dimensions: Vec<String>,
    /// Metric columns to project.
    pub metrics: Vec<String>,
    pub aggregation: crate::pivot::Aggregation,
}

/// Either the flat record set for client-side pivoting, or the
/// pre-aggregated shortcut for simple single-dimension views.
#[derive(Debug, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AggregateDataResponse {
    Records { rows: Vec<Record>, row_count: usize },
    Aggregated { rows: Vec<Record>, row_count: usize },
}

/// The column upstream platform filters apply to.
const PLATFORM_COLUMN: &str = "platform";

pub struct InsightApi {
    session: AskSession,
    store: CampaignStore,
}

impl InsightApi {
    pub fn new(session: AskSession, store: CampaignStore) -> Self {
        Self { session, store }
    }

    pub fn store(&self) -> &CampaignStore {
        &self.store
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskOutcome> {
        self.session.ask(&request.question, request.mode_flags).await
    }

    /// Fetch the flat record set for a pivot session, narrowed by upstream
    /// filters. A single projected dimension takes the pre-aggregated
    /// shortcut; anything richer ships records for the pivot engine.
    pub fn aggregate_data(&self, request: &AggregateDataRequest) -> Result<AggregateDataResponse> {
        let narrowed = self.store.filtered(
            PLATFORM_COLUMN,
            &request.platforms,
            request.date_range.as_ref(),
        )?;
        info!(
            "aggregate-data: {} of {} records after upstream filters",
            narrowed.len(),
            self.store.len()
        );

        if request.dimensions.len() == 1 {
            let config = PivotConfiguration::new(
                request.dimensions.clone(),
                request.metrics.clone(),
                request.aggregation,
            );
            let tree = PivotTree::build(narrowed.records(), config, &narrowed.catalog())?;
            let columns = tree.value_columns();
            let dimension = &request.dimensions[0];

            let mut rows = Vec::new();
            for node_id in tree.leaves() {
                let node = tree.node(node_id);
                let mut row = Record::new();
                row.insert(dimension.clone(), serde_json::json!(node.key));
                for vc in &columns {
                    let value = tree.node_cell(node_id, &vc.metric, vc.column_key.as_deref());
                    row.insert(vc.label.clone(), serde_json::json!(value));
                }
                rows.push(row);
            }
            let row_count = rows.len();
            return Ok(AggregateDataResponse::Aggregated { rows, row_count });
        }

        let projection: Vec<String> = request
            .dimensions
            .iter()
            .chain(request.metrics.iter())
            .cloned()
            .collect();
        let rows: Vec<Record> = narrowed
            .records()
            .iter()
            .map(|record| {
                projection
                    .iter()
                    .map(|column| {
                        (
                            column.clone(),
                            record.get(column).cloned().unwrap_or(serde_json::Value::Null),
                        )
                    })
                    .collect()
            })
            .collect();
        let row_count = rows.len();
        Ok(AggregateDataResponse::Records { rows, row_count })
    }

    /// Build and export a pivot over the current store.
    pub fn export_pivot(
        &self,
        config: PivotConfiguration,
        options: &ExportOptions,
    ) -> Result<String> {
        let tree = PivotTree::build(self.store.records(), config, &self.store.catalog())?;
        Ok(export_delimited(&tree, options))
    }
}
