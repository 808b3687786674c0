//! Answer Composer
//!
//! Converts a structured result set plus the original question back into a
//! natural-language explanation. Every quantitative claim must be grounded
//! in the result set: the prompt forbids numbers outside the returned rows,
//! and an empty result short-circuits to an explicit no-data answer without
//! touching a language model at all.

use crate::error::Result;
use crate::knowledge::Passage;
use crate::llm::LlmRouter;
use crate::query::ResultSet;
use tracing::info;

/// Rows included verbatim in the grounding prompt for multi-row results.
const MAX_PROMPT_ROWS: usize = 20;

pub struct AnswerComposer {
    router: LlmRouter,
}

impl AnswerComposer {
    pub fn new(router: LlmRouter) -> Self {
        Self { router }
    }

    pub async fn compose(
        &self,
        question: &str,
        result: &ResultSet,
        context: &[&Passage],
    ) -> Result<String> {
        if result.is_empty() {
            info!("empty result set, returning explicit no-data answer");
            return Ok(
                "No matching data was found for this question. The query ran successfully \
                 but returned zero rows; try widening the filters or the date range."
                    .to_string(),
            );
        }

        let results_summary = self.format_results(result);
        let context_block = self.format_context(context);

        let prompt = format!(
            r#"You are a careful advertising-campaign data analyst. Answer the user's
question from the query results below.

USER QUESTION: "{question}"

QUERY RESULTS ({row_count} rows):
{results_summary}
{context_block}
GROUNDING RULES:
1. Every number in your answer must come from the query results above. Do
   not invent, estimate, or extrapolate values.
2. If background context is present, you may cite it by [id] for
   qualitative color, but when it disagrees with the query results the
   query results always win.
3. Answer directly and conversationally; format large numbers readably.

ANSWER:"#,
            row_count = result.row_count(),
        );

        let answer = self.router.complete(&prompt).await?;
        Ok(answer.trim().trim_start_matches("ANSWER:").trim().to_string())
    }

    fn format_results(&self, result: &ResultSet) -> String {
        if result.rows.len() == 1 {
            let row = &result.rows[0];
            let parts: Vec<String> = result
                .columns
                .iter()
                .map(|column| {
                    let value = row.get(column).cloned().unwrap_or(serde_json::Value::Null);
                    format!("{}: {}", column, format_value(&value))
                })
                .collect();
            return parts.join(", ");
        }

        let mut lines = vec![result.columns.join(" | ")];
        for row in result.rows.iter().take(MAX_PROMPT_ROWS) {
            let cells: Vec<String> = result
                .columns
                .iter()
                .map(|column| {
                    let value = row.get(column).cloned().unwrap_or(serde_json::Value::Null);
                    format_value(&value)
                })
                .collect();
            lines.push(cells.join(" | "));
        }
        if result.rows.len() > MAX_PROMPT_ROWS {
            lines.push(format!(
                "... {} more rows not shown",
                result.rows.len() - MAX_PROMPT_ROWS
            ));
        }
        lines.join("\n")
    }

    fn format_context(&self, context: &[&Passage]) -> String {
        if context.is_empty() {
            return String::new();
        }
        let mut block = String::from("\nBACKGROUND CONTEXT (qualitative only):\n");
        for passage in context {
            block.push_str(&format!(
                "[{}] {}: {}\n",
                passage.id, passage.title, passage.text
            ));
        }
        block
    }
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::guard::QueryGuard;
    use crate::llm::{LlmBackend, LlmRouter, ScriptedBackend};
    use crate::query::CandidateQuery;
    use polars::prelude::*;
    use std::sync::Arc;

    fn empty_result() -> ResultSet {
        let df = df!["platform" => ["google"], "spend" => [1.0]].unwrap();
        let catalog = SchemaCatalog::from_frame(&df).unwrap();
        let validated = QueryGuard::new()
            .validate(&CandidateQuery::default(), &catalog)
            .unwrap();
        ResultSet {
            columns: vec!["platform".to_string(), "spend".to_string()],
            rows: vec![],
            query: validated,
            execution_time_ms: 1,
        }
    }

    fn scripted_composer(responses: Vec<&str>) -> AnswerComposer {
        let backend: Arc<dyn LlmBackend> = Arc::new(ScriptedBackend::new(
            "scripted",
            responses.into_iter().map(String::from).collect(),
        ));
        AnswerComposer::new(LlmRouter::new(vec![backend]))
    }

    #[tokio::test]
    async fn empty_result_never_calls_llm() {
        // An exhausted backend would error if called at all.
        let composer = scripted_composer(vec![]);
        let answer = composer
            .compose("total spend on bing", &empty_result(), &[])
            .await
            .unwrap();
        assert!(answer.contains("No matching data"));
    }

    #[tokio::test]
    async fn grounded_answer_comes_from_backend() {
        let composer = scripted_composer(vec!["Total spend was 175."]);
        let mut result = empty_result();
        result.rows = vec![std::collections::HashMap::from([
            ("platform".to_string(), serde_json::json!("google")),
            ("spend".to_string(), serde_json::json!(175.0)),
        ])];
        let answer = composer
            .compose("total spend", &result, &[])
            .await
            .unwrap();
        assert_eq!(answer, "Total spend was 175.");
    }
}
