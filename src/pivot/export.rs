//! Pivot export
//!
//! Serializes the current tree, in whichever layout is active, to a flat
//! delimited artifact. The first row is the header (dimension labels
//! followed by one "{aggregation} of {metric}" label per value column); the
//! last row is always the Grand Total. Export is computed fully expanded:
//! collapse flags are screen state, not data.

use crate::pivot::config::LayoutMode;
use crate::pivot::tree::PivotTree;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub delimiter: char,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";

pub fn export_delimited(tree: &PivotTree, options: &ExportOptions) -> String {
    let config = tree.config();
    let delimiter = options.delimiter;

    let mut dimension_headers: Vec<String> = match config.layout {
        LayoutMode::Nested => vec![config.rows.join(" / ")],
        LayoutMode::Tabular => config.rows.clone(),
    };
    if dimension_headers.is_empty() {
        dimension_headers.push(String::new());
    }
    let dimension_width = dimension_headers.len();

    let mut lines = Vec::new();
    let header: Vec<String> = dimension_headers
        .into_iter()
        .chain(tree.value_columns().into_iter().map(|vc| vc.label))
        .collect();
    lines.push(join_fields(&header, delimiter));

    for row in tree.rows(&HashSet::new()) {
        let mut fields: Vec<String> = Vec::new();
        if row.is_grand_total {
            fields.push(GRAND_TOTAL_LABEL.to_string());
            fields.resize(dimension_width, String::new());
        } else {
            match config.layout {
                LayoutMode::Nested => {
                    let label = row.keys.last().cloned().unwrap_or_default();
                    fields.push(format!("{}{}", "  ".repeat(row.depth - 1), label));
                }
                LayoutMode::Tabular => {
                    fields.extend(row.keys.iter().cloned());
                    fields.resize(dimension_width, String::new());
                }
            }
        }
        fields.extend(row.cells.iter().map(|cell| format_cell(*cell)));
        lines.push(join_fields(&fields, delimiter));
    }

    lines.join("\n")
}

fn format_cell(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn join_fields(fields: &[String], delimiter: char) -> String {
    fields
        .iter()
        .map(|field| escape_field(field, delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

fn escape_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::pivot::config::{Aggregation, LayoutMode, PivotConfiguration};
    use crate::query::Record;
    use polars::prelude::*;
    use std::sync::Arc;

    fn records() -> Arc<Vec<Record>> {
        let rows = [("A", 100.0), ("B", 50.0), ("A", 25.0)];
        Arc::new(
            rows.iter()
                .map(|(platform, spend)| {
                    Record::from([
                        ("platform".to_string(), serde_json::json!(platform)),
                        ("spend".to_string(), serde_json::json!(spend)),
                    ])
                })
                .collect(),
        )
    }

    fn catalog() -> SchemaCatalog {
        let df = df!["platform" => ["A"], "spend" => [1.0]].unwrap();
        SchemaCatalog::from_frame(&df).unwrap()
    }

    #[test]
    fn nested_export_has_header_and_grand_total() {
        let config = PivotConfiguration::new(
            vec!["platform".to_string()],
            vec!["spend".to_string()],
            Aggregation::Sum,
        );
        let tree = crate::pivot::tree::PivotTree::build(records(), config, &catalog()).unwrap();
        let exported = export_delimited(&tree, &ExportOptions::default());
        let lines: Vec<&str> = exported.lines().collect();

        assert_eq!(lines[0], "platform,sum of spend");
        assert_eq!(lines[1], "A,125");
        assert_eq!(lines[2], "B,50");
        assert_eq!(lines.last().unwrap(), &"Grand Total,175");
    }

    #[test]
    fn tabular_export_uses_one_column_per_dimension() {
        let config = PivotConfiguration::new(
            vec!["platform".to_string()],
            vec!["spend".to_string()],
            Aggregation::Sum,
        )
        .with_layout(LayoutMode::Tabular);
        let tree = crate::pivot::tree::PivotTree::build(records(), config, &catalog()).unwrap();
        let exported = export_delimited(&tree, &ExportOptions::default());
        let lines: Vec<&str> = exported.lines().collect();

        assert_eq!(lines[0], "platform,sum of spend");
        assert_eq!(lines.last().unwrap(), &"Grand Total,175");
    }

    #[test]
    fn fields_with_delimiters_are_quoted() {
        assert_eq!(escape_field("a,b", ','), "\"a,b\"");
        assert_eq!(escape_field("plain", ','), "plain");
    }
}
