//! Query Translator
//!
//! Turns a natural-language question plus the schema catalog into a tagged
//! structured outcome: a Candidate Query, or a clarification request when the
//! question cannot be shaped into one. The translator consults language-model
//! backends in a fixed priority order and uses the first response that parses
//! into a syntactically valid outcome; it never emits free-form executable
//! text, so the guard always has a structure to inspect.

use crate::catalog::SchemaCatalog;
use crate::error::{InsightError, Result};
use crate::llm::{strip_code_fences, LlmRouter};
use crate::query::{ConversationTurn, TranslationOutcome};
use tracing::{info, warn};

pub struct QueryTranslator {
    router: LlmRouter,
}

impl QueryTranslator {
    pub fn new(router: LlmRouter) -> Self {
        Self { router }
    }

    /// Translate a question against a catalog snapshot. History is passed
    /// explicitly so follow-ups ("now break that down by device") resolve
    /// against the prior turn's structured query, not hidden session state.
    pub async fn translate(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        history: &[ConversationTurn],
    ) -> Result<TranslationOutcome> {
        let prompt = self.build_prompt(question, catalog, history);

        let mut failures = Vec::new();
        for backend in self.router.backends() {
            let raw = match self.router.complete_one(backend, &prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("translator backend '{}' failed: {}", backend.name(), e);
                    failures.push(format!("{}: {}", backend.name(), e));
                    continue;
                }
            };

            match serde_json::from_str::<TranslationOutcome>(strip_code_fences(&raw)) {
                Ok(outcome) => {
                    info!("translation parsed from backend '{}'", backend.name());
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(
                        "backend '{}' returned unparseable structure: {}",
                        backend.name(),
                        e
                    );
                    failures.push(format!("{}: parse failure ({})", backend.name(), e));
                }
            }
        }

        Err(InsightError::TranslationUnavailable(format!(
            "no backend produced a parseable query ({})",
            failures.join("; ")
        )))
    }

    fn build_prompt(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
        history: &[ConversationTurn],
    ) -> String {
        let description = catalog.describe();

        let mut schema_info = String::new();
        schema_info.push_str("DIMENSIONS (categorical, usable for grouping/filtering):\n");
        for name in &description.dimensions {
            if let Some(spec) = catalog.column(name) {
                schema_info.push_str(&format!("  - {} ({})\n", name, spec.data_type.as_str()));
            }
        }
        schema_info.push_str("METRICS (numeric, usable for aggregation):\n");
        for name in &description.metrics {
            schema_info.push_str(&format!("  - {}\n", name));
        }
        if !description.derived.is_empty() {
            schema_info.push_str("DERIVED METRICS:\n");
            for (name, formula) in &description.derived {
                schema_info.push_str(&format!("  - {} = {}\n", name, formula));
            }
        }

        let mut history_info = String::new();
        if !history.is_empty() {
            history_info.push_str("PRIOR TURNS (resolve pronouns and follow-ups against these):\n");
            for turn in history {
                history_info.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
                if let Some(ref query) = turn.query {
                    if let Ok(json) = serde_json::to_string(query) {
                        history_info.push_str(&format!("Prior structured query: {}\n", json));
                    }
                }
            }
        }

        format!(
            r#"You are a query translator for an advertising-campaign analytics system.
Convert the user's question into a JSON specification. You never write SQL.

USER QUESTION: "{question}"

SCHEMA:
{schema_info}
{history_info}
OUTPUT FORMAT (return ONLY valid JSON, no markdown, no explanations):

Either a query:
{{
  "type": "query",
  "query": {{
    "operation": "select",
    "dimensions": ["dimension_name"],
    "metrics": ["metric_name"],
    "filters": [{{"column": "name", "operator": "=|!=|>|<|>=|<=|in", "value": "value_or_array"}}],
    "group_by": ["dimension_name"],
    "aggregations": [{{"function": "sum|avg|count|min|max", "metric": "metric_name", "alias": "optional"}}],
    "sort": {{"column": "output_column", "direction": "asc|desc"}},
    "limit": number_or_null
  }}
}}

Or, when the question is ambiguous between two metrics or cannot be shaped
into a single query, a clarification:
{{
  "type": "clarification",
  "prompts": ["Did you mean spend or clicks?"]
}}

RULES:
- "operation" is always "select"; this system is read-only.
- Use column names exactly as the question states them, even if they are not
  in the schema above; a separate validator decides whether they exist.
- "total X" means {{"function": "sum", "metric": "X"}}; "average X" means avg.
- For a follow-up question, start from the prior structured query and apply
  only the requested change.
- Filter values must match the column's type (dates as YYYY-MM-DD strings).

JSON:"#
        )
    }
}
