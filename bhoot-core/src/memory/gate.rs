//! Threshold-gated episodic memory.

use crate::store::{
    EmbeddingStore, FragmentKind, MemoryFragment, TAG_INTERACTION_COUNT, TAG_MESSAGE_COUNT,
    TAG_TIMESTAMP,
};
use crate::turn::Turn;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Render turns as a single " | " separated narrative line.
pub fn narrative(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(Turn::to_line)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Result of [`EpisodicMemoryGate::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Below threshold; nothing written.
    Counted { interaction_count: usize },
    /// Threshold reached and a `conversation` fragment written.
    Committed { fragment_id: String },
    /// Threshold reached but the write failed. The count is kept so the
    /// next record tries again.
    Failed { interaction_count: usize },
    /// Nothing to record.
    Ignored,
}

/// Commits a conversation memory once every `threshold` interactions.
///
/// Only the turns handed to the call that crosses the threshold are
/// committed; earlier calls in the cycle only count.
pub struct EpisodicMemoryGate {
    store: Arc<dyn EmbeddingStore>,
    threshold: usize,
    interaction_count: usize,
}

impl EpisodicMemoryGate {
    pub fn new(store: Arc<dyn EmbeddingStore>, threshold: usize) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            interaction_count: 0,
        }
    }

    pub fn interaction_count(&self) -> usize {
        self.interaction_count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.interaction_count = 0;
    }

    pub async fn record(&mut self, turns: &[Turn]) -> GateOutcome {
        if turns.is_empty() {
            return GateOutcome::Ignored;
        }

        self.interaction_count += 1;
        if self.interaction_count < self.threshold {
            return GateOutcome::Counted {
                interaction_count: self.interaction_count,
            };
        }

        let fragment_id = format!("{}_{}", FragmentKind::Conversation.as_str(), Uuid::new_v4());
        let fragment =
            MemoryFragment::new(&fragment_id, narrative(turns), FragmentKind::Conversation)
                .with_tag(TAG_MESSAGE_COUNT, turns.len())
                .with_tag(TAG_INTERACTION_COUNT, self.interaction_count)
                .with_tag(TAG_TIMESTAMP, Utc::now().to_rfc3339());

        match self.store.add(fragment).await {
            Ok(()) => {
                tracing::info!(
                    %fragment_id,
                    interactions = self.interaction_count,
                    "episodic memory committed"
                );
                self.interaction_count = 0;
                GateOutcome::Committed { fragment_id }
            }
            Err(e) => {
                tracing::warn!(error = %e, "episodic memory write failed");
                GateOutcome::Failed {
                    interaction_count: self.interaction_count,
                }
            }
        }
    }
}
