//! Reduction of compaction batches into long-term memory.

use crate::llm::{generate_within, GenerationRequest, Generator, Purpose};
use crate::store::{
    EmbeddingStore, FragmentKind, MemoryFragment, RetrievalError, TAG_CATEGORY,
    TAG_MESSAGE_COUNT, TAG_TIMESTAMP,
};
use crate::turn::{transcript, Turn};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SUMMARY_PROMPT: &str = include_str!("../prompts/summary.txt");
const SUMMARY_HEADER: &str = "Summary of recent interactions:";

/// Committed batch ids remembered for duplicate detection. A batch leaves
/// the compaction stack once committed, so only recent ids can recur.
const RECENT_COMMITS: usize = 64;

/// How a batch is turned into narrative text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryStyle {
    /// Deterministic "Actor: text" transcript.
    #[default]
    Transcript,
    /// Generator-written summary, falling back to the transcript.
    Generated,
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("Failed to store summary: {0}")]
    Store(#[from] RetrievalError),
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A fragment with this id was written.
    Committed(String),
    /// The batch was committed earlier; nothing was written.
    AlreadyCommitted(String),
}

impl CommitOutcome {
    pub fn fragment_id(&self) -> &str {
        match self {
            CommitOutcome::Committed(id) | CommitOutcome::AlreadyCommitted(id) => id,
        }
    }
}

/// Content-derived id of a batch.
///
/// The same turns always hash to the same id, so a retried write replaces
/// rather than duplicates the fragment.
pub fn batch_id(turns: &[Turn]) -> String {
    let mut hasher = Sha256::new();
    for turn in turns {
        hasher.update(turn.actor().label().as_bytes());
        hasher.update([0x1f]);
        hasher.update(turn.created_at().to_rfc3339().as_bytes());
        hasher.update([0x1f]);
        hasher.update(turn.text().as_bytes());
        hasher.update([0x1e]);
    }
    format!(
        "{}_{}",
        FragmentKind::InteractionSummary.as_str(),
        hex::encode(&hasher.finalize()[..16])
    )
}

/// Writes one `interaction_summary` fragment per batch, at most once.
pub struct Summarizer {
    store: Arc<dyn EmbeddingStore>,
    generator: Option<Arc<dyn Generator>>,
    style: SummaryStyle,
    timeout: Duration,
    committed: VecDeque<String>,
}

impl Summarizer {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            store,
            generator: None,
            style: SummaryStyle::Transcript,
            timeout: Duration::from_secs(60),
            committed: VecDeque::with_capacity(RECENT_COMMITS),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        self.generator = Some(generator);
        self.timeout = timeout;
        self
    }

    pub fn with_style(mut self, style: SummaryStyle) -> Self {
        self.style = style;
        self
    }

    pub fn style(&self) -> SummaryStyle {
        self.style
    }

    /// Whether this batch has already been written.
    pub fn is_committed(&self, turns: &[Turn]) -> bool {
        self.remembers(&batch_id(turns))
    }

    fn remembers(&self, id: &str) -> bool {
        self.committed.iter().any(|c| c == id)
    }

    fn remember(&mut self, id: String) {
        if self.committed.len() == RECENT_COMMITS {
            self.committed.pop_front();
        }
        self.committed.push_back(id);
    }

    /// Narrative text for a batch.
    pub async fn narrate(&self, turns: &[Turn]) -> String {
        let fallback = || format!("{SUMMARY_HEADER}\n{}", transcript(turns));

        let generator = match (self.style, &self.generator) {
            (SummaryStyle::Generated, Some(generator)) => generator,
            _ => return fallback(),
        };

        let request = GenerationRequest::new(
            Purpose::Summary,
            format!("Summarize these interactions:\n{}", transcript(turns)),
        )
        .with_system(SUMMARY_PROMPT)
        .with_temperature(0.3);

        match generate_within(generator.as_ref(), request, self.timeout).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed, using transcript");
                fallback()
            }
        }
    }

    /// Summarize `turns` and write the fragment.
    ///
    /// A batch that was already committed is not written again. A failed
    /// write leaves no record, so the caller may retry the same batch.
    pub async fn commit(&mut self, turns: &[Turn]) -> Result<CommitOutcome, SummarizeError> {
        let id = batch_id(turns);
        if self.remembers(&id) {
            tracing::debug!(%id, "batch already committed");
            return Ok(CommitOutcome::AlreadyCommitted(id));
        }

        let text = self.narrate(turns).await;
        let fragment = MemoryFragment::new(&id, text, FragmentKind::InteractionSummary)
            .with_tag(TAG_MESSAGE_COUNT, turns.len())
            .with_tag(TAG_TIMESTAMP, Utc::now().to_rfc3339())
            .with_tag(TAG_CATEGORY, "player_interactions");

        self.store.add(fragment).await?;
        self.remember(id.clone());

        tracing::info!(%id, message_count = turns.len(), "interaction summary committed");
        Ok(CommitOutcome::Committed(id))
    }
}
