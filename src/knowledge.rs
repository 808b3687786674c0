//! Knowledge corpus
//!
//! Keyword-scored retrieval over a small set of supporting passages
//! (campaign briefs, channel notes, benchmark digests). The composer cites
//! retrieved passages when external knowledge is requested; they provide
//! color only and never override result-set values.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeCorpus {
    passages: Vec<Passage>,
}

impl KnowledgeCorpus {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    /// Load passages from a JSON array file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let passages: Vec<Passage> = serde_json::from_str(&content)?;
        Ok(Self { passages })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Top-k passages by query-token overlap. Zero-overlap passages are
    /// never returned.
    pub fn retrieve(&self, question: &str, k: usize) -> Vec<&Passage> {
        let query_tokens = tokenize(question);
        let mut scored: Vec<(usize, &Passage)> = self
            .passages
            .iter()
            .map(|p| {
                let text_tokens = tokenize(&format!("{} {}", p.title, p.text));
                let overlap = query_tokens
                    .iter()
                    .filter(|t| text_tokens.contains(*t))
                    .count();
                (overlap, p)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(
            "retrieved {} of {} passages for question",
            scored.len().min(k),
            self.passages.len()
        );
        scored.into_iter().take(k).map(|(_, p)| p).collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}
