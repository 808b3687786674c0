//! Pivot tree
//!
//! Hierarchical aggregation over a flat record set. The tree is an arena of
//! nodes indexed by group-key path, built in one pass per nesting level, so
//! reorder-and-rebuild stays O(records) with no self-referential ownership.
//!
//! Aggregates are computed on demand from each node's own member list, never
//! by summing children, which keeps the reconciliation invariant (a node's
//! aggregate equals the aggregation over the union of its leaf descendants'
//! members) independently checkable. The Grand Total is computed over the
//! entire unpartitioned record set, independent of the tree.
//!
//! Records with a missing or null value for a grouped dimension collapse
//! into a literal `"Unknown"` bucket so totals stay reconcilable.

use crate::error::Result;
use crate::pivot::config::{Aggregation, LayoutMode, PivotConfiguration};
use crate::catalog::SchemaCatalog;
use crate::query::Record;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const UNKNOWN_BUCKET: &str = "Unknown";

#[derive(Debug)]
pub struct PivotNode {
    /// Group key at this nesting level; empty for the root.
    pub key: String,
    /// Group-key values from the root down to this node.
    pub path: Vec<String>,
    /// 0 for the root, 1 for the first row dimension, and so on.
    pub depth: usize,
    /// Child node ids, in first-seen member order.
    pub children: Vec<usize>,
    /// Indices into the flat record set.
    members: Vec<usize>,
}

impl PivotNode {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// One value column of the materialized table.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueColumn {
    pub metric: String,
    pub column_key: Option<String>,
    pub label: String,
}

/// One materialized display row. `keys` holds the node path (nested) or one
/// key per row dimension (tabular); the grand-total row has empty keys.
#[derive(Debug, Clone)]
pub struct PivotRow {
    pub keys: Vec<String>,
    pub depth: usize,
    pub is_leaf: bool,
    pub is_grand_total: bool,
    pub cells: Vec<f64>,
}

#[derive(Debug)]
pub struct PivotTree {
    nodes: Vec<PivotNode>,
    index: HashMap<Vec<String>, usize>,
    records: Arc<Vec<Record>>,
    config: PivotConfiguration,
    /// Distinct column-dimension values, first-seen order.
    column_keys: Vec<String>,
}

impl PivotTree {
    /// Build the tree for a configuration. Validates the configuration
    /// against the catalog before touching any record.
    pub fn build(
        records: Arc<Vec<Record>>,
        config: PivotConfiguration,
        catalog: &SchemaCatalog,
    ) -> Result<Self> {
        config.validate(catalog)?;

        let root = PivotNode {
            key: String::new(),
            path: Vec::new(),
            depth: 0,
            children: Vec::new(),
            members: (0..records.len()).collect(),
        };
        let mut nodes = vec![root];
        let mut index = HashMap::new();
        index.insert(Vec::new(), 0);

        let mut level_ids = vec![0usize];
        for (level, dimension) in config.rows.iter().enumerate() {
            let mut next_level = Vec::new();
            for node_id in level_ids {
                let mut child_of_key: HashMap<String, usize> = HashMap::new();
                let members = std::mem::take(&mut nodes[node_id].members);
                for record_idx in &members {
                    let key = group_key(&records[*record_idx], dimension);
                    let child_id = match child_of_key.get(&key) {
                        Some(id) => *id,
                        None => {
                            let mut path = nodes[node_id].path.clone();
                            path.push(key.clone());
                            let id = nodes.len();
                            nodes.push(PivotNode {
                                key: key.clone(),
                                path: path.clone(),
                                depth: level + 1,
                                children: Vec::new(),
                                members: Vec::new(),
                            });
                            nodes[node_id].children.push(id);
                            index.insert(path, id);
                            child_of_key.insert(key, id);
                            next_level.push(id);
                            id
                        }
                    };
                    nodes[child_id].members.push(*record_idx);
                }
                nodes[node_id].members = members;
            }
            level_ids = next_level;
        }

        let column_keys = match &config.column {
            Some(dimension) => records
                .iter()
                .map(|record| group_key(record, dimension))
                .unique()
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            nodes,
            index,
            records,
            config,
            column_keys,
        })
    }

    pub fn config(&self) -> &PivotConfiguration {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: usize) -> &PivotNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &PivotNode {
        &self.nodes[0]
    }

    /// Look up a node by its group-key path.
    pub fn node_by_path(&self, path: &[String]) -> Option<&PivotNode> {
        self.index.get(path).map(|id| &self.nodes[*id])
    }

    /// Leaf node ids in depth-first display order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(0, &mut out);
        out
    }

    fn collect_leaves(&self, node_id: usize, out: &mut Vec<usize>) {
        let node = &self.nodes[node_id];
        if node.depth == self.config.rows.len() {
            if node_id != 0 || self.config.rows.is_empty() {
                out.push(node_id);
            }
            return;
        }
        for child in &node.children {
            self.collect_leaves(*child, out);
        }
    }

    /// Aggregate one metric over a node's own member records.
    pub fn node_value(&self, node_id: usize, metric: &str) -> f64 {
        self.aggregate(&self.nodes[node_id].members, metric, None)
    }

    /// Aggregate one metric over a node's members restricted to one
    /// column-dimension value.
    pub fn node_cell(&self, node_id: usize, metric: &str, column_key: Option<&str>) -> f64 {
        self.aggregate(&self.nodes[node_id].members, metric, column_key)
    }

    /// The configured aggregation applied to the entire original flat record
    /// set, independent of the tree. Used as a correctness cross-check.
    pub fn grand_total(&self, metric: &str) -> f64 {
        let all: Vec<usize> = (0..self.records.len()).collect();
        self.aggregate(&all, metric, None)
    }

    pub fn grand_cell(&self, metric: &str, column_key: Option<&str>) -> f64 {
        let all: Vec<usize> = (0..self.records.len()).collect();
        self.aggregate(&all, metric, column_key)
    }

    fn aggregate(&self, members: &[usize], metric: &str, column_key: Option<&str>) -> f64 {
        let column_dim = self.config.column.as_deref();
        let selected: Vec<usize> = match (column_key, column_dim) {
            (Some(key), Some(dimension)) => members
                .iter()
                .copied()
                .filter(|idx| group_key(&self.records[*idx], dimension) == key)
                .collect(),
            _ => members.to_vec(),
        };

        match self.config.aggregation {
            Aggregation::Count => selected.len() as f64,
            Aggregation::Sum => self.sum(&selected, metric),
            Aggregation::Avg => {
                if selected.is_empty() {
                    0.0
                } else {
                    self.sum(&selected, metric) / selected.len() as f64
                }
            }
        }
    }

    fn sum(&self, members: &[usize], metric: &str) -> f64 {
        members
            .iter()
            .filter_map(|idx| self.records[*idx].get(metric))
            .filter_map(|value| value.as_f64())
            .sum()
    }

    /// Value columns in display order: metrics, fanned out per distinct
    /// column-dimension value when a column dimension is configured.
    pub fn value_columns(&self) -> Vec<ValueColumn> {
        let agg = self.config.aggregation.as_str();
        if self.column_keys.is_empty() {
            return self
                .config
                .values
                .iter()
                .map(|metric| ValueColumn {
                    metric: metric.clone(),
                    column_key: None,
                    label: format!("{} of {}", agg, metric),
                })
                .collect();
        }
        self.config
            .values
            .iter()
            .flat_map(|metric| {
                self.column_keys.iter().map(move |key| ValueColumn {
                    metric: metric.clone(),
                    column_key: Some(key.clone()),
                    label: format!("{} of {} ({})", agg, metric, key),
                })
            })
            .collect()
    }

    fn cells_for(&self, node_id: usize) -> Vec<f64> {
        self.value_columns()
            .iter()
            .map(|vc| self.node_cell(node_id, &vc.metric, vc.column_key.as_deref()))
            .collect()
    }

    fn grand_total_cells(&self) -> Vec<f64> {
        self.value_columns()
            .iter()
            .map(|vc| self.grand_cell(&vc.metric, vc.column_key.as_deref()))
            .collect()
    }

    /// Materialize display rows for the configured layout. `collapsed` is
    /// view state keyed by node path, held by the caller; it prunes nested
    /// rows only and never changes any aggregate. The final row is always
    /// the Grand Total.
    pub fn rows(&self, collapsed: &HashSet<Vec<String>>) -> Vec<PivotRow> {
        let mut out = Vec::new();
        match self.config.layout {
            LayoutMode::Nested => self.nested_rows(0, collapsed, &mut out),
            LayoutMode::Tabular => {
                for leaf_id in self.leaves() {
                    let node = &self.nodes[leaf_id];
                    out.push(PivotRow {
                        keys: node.path.clone(),
                        depth: node.depth,
                        is_leaf: true,
                        is_grand_total: false,
                        cells: self.cells_for(leaf_id),
                    });
                }
            }
        }
        out.push(PivotRow {
            keys: Vec::new(),
            depth: 0,
            is_leaf: false,
            is_grand_total: true,
            cells: self.grand_total_cells(),
        });
        out
    }

    fn nested_rows(
        &self,
        node_id: usize,
        collapsed: &HashSet<Vec<String>>,
        out: &mut Vec<PivotRow>,
    ) {
        let node = &self.nodes[node_id];
        if node.depth > 0 {
            out.push(PivotRow {
                keys: node.path.clone(),
                depth: node.depth,
                is_leaf: node.is_leaf(),
                is_grand_total: false,
                cells: self.cells_for(node_id),
            });
            if collapsed.contains(&node.path) {
                return;
            }
        }
        for child in &node.children {
            self.nested_rows(*child, collapsed, out);
        }
    }
}

fn group_key(record: &Record, dimension: &str) -> String {
    match record.get(dimension) {
        None | Some(serde_json::Value::Null) => UNKNOWN_BUCKET.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}
