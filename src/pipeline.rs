//! Ask pipeline
//!
//! The request-scoped question pipeline: Translator, Guard, Executor,
//! Composer, strictly sequential; no step starts before the prior step
//! returns. One question produces at most one translation, one execution,
//! and one composition. `ExecutionTimeout` is retried exactly once with the
//! same validated query; guard rejections are never retried. If a newer
//! question arrives while one is in flight, the older result is discarded on
//! arrival (last-question-wins).

use crate::composer::AnswerComposer;
use crate::error::{InsightError, RejectionReason, Result};
use crate::executor::QueryExecutor;
use crate::guard::QueryGuard;
use crate::knowledge::KnowledgeCorpus;
use crate::query::{CandidateQuery, ConversationTurn, TranslationOutcome};
use crate::translator::QueryTranslator;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Passages attached to an answer when external knowledge is requested.
const RAG_PASSAGES: usize = 3;

#[derive(Debug, Clone, Copy, Default, Serialize, serde::Deserialize)]
pub struct ModeFlags {
    #[serde(default)]
    pub use_external_knowledge: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub supporting_query: Option<CandidateQuery>,
    pub execution_time_ms: u64,
    /// Ordered step log accumulated while answering.
    pub reasoning: Vec<String>,
}

/// Outcome of one question turn. Rejections and clarifications are data, not
/// errors: callers render them as specific remediation messages.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AskOutcome {
    Answered(AskResponse),
    NeedsClarification {
        prompts: Vec<String>,
    },
    Rejected {
        reason: RejectionReason,
        /// Nearest-column suggestion when the rejection names an unknown
        /// column.
        hint: Option<String>,
    },
    /// A newer question superseded this one while it was in flight.
    Superseded,
}

pub struct AskPipeline {
    translator: QueryTranslator,
    guard: QueryGuard,
    executor: QueryExecutor,
    composer: AnswerComposer,
    corpus: Option<KnowledgeCorpus>,
}

impl AskPipeline {
    pub fn new(
        translator: QueryTranslator,
        executor: QueryExecutor,
        composer: AnswerComposer,
    ) -> Self {
        Self {
            translator,
            guard: QueryGuard::new(),
            executor,
            composer,
            corpus: None,
        }
    }

    pub fn with_corpus(mut self, corpus: KnowledgeCorpus) -> Self {
        self.corpus = Some(corpus);
        self
    }

    async fn run(
        &self,
        question: &str,
        flags: ModeFlags,
        history: &[ConversationTurn],
        reasoning: &mut Vec<String>,
    ) -> Result<AskOutcome> {
        let catalog = self.executor.store().catalog();

        // Step 1: translate
        let outcome = self
            .translator
            .translate(question, &catalog, history)
            .await?;
        let candidate = match outcome {
            TranslationOutcome::Clarification(request) => {
                reasoning.push("translator requested clarification".to_string());
                return Ok(AskOutcome::NeedsClarification {
                    prompts: request.prompts,
                });
            }
            TranslationOutcome::Query { query } => query,
        };
        reasoning.push(format!(
            "translated to candidate query: {}",
            serde_json::to_string(&candidate)?
        ));

        // Step 2: guard. Rejections surface verbatim and are never retried.
        let validated = match self.guard.validate(&candidate, &catalog) {
            Ok(validated) => validated,
            Err(reason) => {
                warn!("guard rejected candidate: {}", reason);
                reasoning.push(format!("guard rejected: {}", reason));
                let hint = match &reason {
                    RejectionReason::UnknownColumn { name } => catalog.closest_column(name),
                    _ => None,
                };
                return Ok(AskOutcome::Rejected { reason, hint });
            }
        };
        reasoning.push("candidate passed guard validation".to_string());

        // Step 3: execute, retrying a timeout exactly once.
        let result = match self.executor.execute(&validated).await {
            Ok(result) => result,
            Err(InsightError::ExecutionTimeout(timeout)) => {
                warn!("execution timed out after {:?}, retrying once", timeout);
                reasoning.push("execution timed out, retrying once".to_string());
                self.executor.execute(&validated).await?
            }
            Err(e) => return Err(e),
        };
        reasoning.push(format!(
            "executed in {}ms, {} rows",
            result.execution_time_ms,
            result.row_count()
        ));

        // Step 4: compose, optionally with supporting passages.
        let passages = match (&self.corpus, flags.use_external_knowledge) {
            (Some(corpus), true) => corpus.retrieve(question, RAG_PASSAGES),
            _ => Vec::new(),
        };
        if !passages.is_empty() {
            reasoning.push(format!("retrieved {} knowledge passages", passages.len()));
        }
        let answer = self.composer.compose(question, &result, &passages).await?;

        Ok(AskOutcome::Answered(AskResponse {
            answer,
            supporting_query: Some(candidate),
            execution_time_ms: result.execution_time_ms,
            reasoning: Vec::new(),
        }))
    }
}

/// A conversation-scoped wrapper around the pipeline. Holds the explicit
/// conversation history and the generation counter behind last-question-wins.
pub struct AskSession {
    pipeline: AskPipeline,
    generation: AtomicU64,
    history: Mutex<Vec<ConversationTurn>>,
}

impl AskSession {
    pub fn new(pipeline: AskPipeline) -> Self {
        Self {
            pipeline,
            generation: AtomicU64::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Answer one question. A question issued after this one supersedes it:
    /// the stale result is discarded on arrival and never recorded in
    /// history.
    pub async fn ask(&self, question: &str, flags: ModeFlags) -> Result<AskOutcome> {
        let turn_id = Uuid::new_v4();
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("[{}] processing question: {}", turn_id, question);

        let history = self.history();
        let mut reasoning = vec![format!("analyzing question: {}", question)];

        let outcome = self
            .pipeline
            .run(question, flags, &history, &mut reasoning)
            .await?;

        if self.generation.load(Ordering::SeqCst) != my_generation {
            info!("[{}] superseded by a newer question, discarding", turn_id);
            return Ok(AskOutcome::Superseded);
        }

        match outcome {
            AskOutcome::Answered(mut response) => {
                response.reasoning = reasoning;
                if let Ok(mut history) = self.history.lock() {
                    history.push(ConversationTurn {
                        question: question.to_string(),
                        answer: response.answer.clone(),
                        query: response.supporting_query.clone(),
                    });
                }
                Ok(AskOutcome::Answered(response))
            }
            other => Ok(other),
        }
    }
}
