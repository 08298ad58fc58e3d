//! Sliding window of recent turns with overflow compaction.

use super::summarizer::Summarizer;
use crate::turn::Turn;
use std::collections::VecDeque;

/// Turns evicted from the short-term buffer, waiting to be summarized.
///
/// Holds at most one full batch in normal operation. When a commit fails the
/// batch stays put and later evictions queue behind it.
#[derive(Debug, Clone, Default)]
pub struct CompactionStack {
    turns: Vec<Turn>,
}

impl CompactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns in eviction order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The oldest `size` turns, if that many are waiting.
    fn batch(&self, size: usize) -> Option<&[Turn]> {
        (size > 0 && self.turns.len() >= size).then(|| &self.turns[..size])
    }

    fn drop_batch(&mut self, size: usize) {
        self.turns.drain(..size);
    }
}

/// What an append did beyond buffering the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The buffer had room.
    Buffered,
    /// The oldest turn moved onto the compaction stack.
    Evicted { stack_len: usize },
    /// One or more full batches were summarized and the stack drained.
    Compacted { fragment_ids: Vec<String> },
    /// A full batch could not be committed; it stays on the stack.
    CompactionFailed { pending: usize },
}

/// Fixed-capacity window of recent turns.
///
/// Appending to a full buffer evicts the oldest turn onto the
/// [`CompactionStack`]. When the stack holds `capacity` turns they are
/// summarized and removed within the same append.
pub struct ShortTermBuffer {
    capacity: usize,
    window: VecDeque<Turn>,
    stack: CompactionStack,
    summarizer: Summarizer,
}

impl ShortTermBuffer {
    pub fn new(capacity: usize, summarizer: Summarizer) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: VecDeque::with_capacity(capacity),
            stack: CompactionStack::new(),
            summarizer,
        }
    }

    /// Refill the window from history without compacting anything.
    ///
    /// Only the newest `capacity` turns are kept.
    pub fn restore(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.window.clear();
        for turn in turns {
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(turn);
        }
    }

    pub async fn append(&mut self, turn: Turn) -> AppendOutcome {
        let evicted = if self.window.len() >= self.capacity {
            self.window.pop_front()
        } else {
            None
        };
        self.window.push_back(turn);

        let Some(evicted) = evicted else {
            return AppendOutcome::Buffered;
        };
        self.stack.push(evicted);

        if self.stack.len() < self.capacity {
            return AppendOutcome::Evicted {
                stack_len: self.stack.len(),
            };
        }
        self.compact().await
    }

    /// Commit every full batch waiting on the stack.
    pub async fn compact(&mut self) -> AppendOutcome {
        let mut fragment_ids = Vec::new();

        while let Some(batch) = self.stack.batch(self.capacity) {
            match self.summarizer.commit(batch).await {
                Ok(outcome) => {
                    fragment_ids.push(outcome.fragment_id().to_string());
                    self.stack.drop_batch(self.capacity);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        pending = self.stack.len(),
                        "compaction failed, batch kept for retry"
                    );
                    return AppendOutcome::CompactionFailed {
                        pending: self.stack.len(),
                    };
                }
            }
        }

        if fragment_ids.is_empty() {
            AppendOutcome::Evicted {
                stack_len: self.stack.len(),
            }
        } else {
            AppendOutcome::Compacted { fragment_ids }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Buffered turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.window.iter()
    }

    /// Owned copies of the buffered turns for a generation request.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.window.iter().cloned().collect()
    }

    pub fn stack(&self) -> &CompactionStack {
        &self.stack
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Forget everything held in memory (session reset).
    pub fn clear(&mut self) {
        self.window.clear();
        self.stack = CompactionStack::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FragmentKind, InMemoryEmbeddingStore};
    use crate::testing::FlakyEmbeddingStore;
    use std::sync::Arc;

    fn numbered(i: usize) -> Turn {
        if i % 2 == 0 {
            Turn::player(format!("player turn {i}"))
        } else {
            Turn::narrator(format!("narrator turn {i}"))
        }
    }

    fn buffer(capacity: usize) -> (ShortTermBuffer, Arc<InMemoryEmbeddingStore>) {
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let buffer = ShortTermBuffer::new(capacity, Summarizer::new(store.clone()));
        (buffer, store)
    }

    #[tokio::test]
    async fn test_buffer_never_exceeds_capacity() {
        let (mut buffer, _) = buffer(10);
        for i in 0..35 {
            buffer.append(numbered(i)).await;
            assert!(buffer.len() <= 10);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.turns().next().unwrap().text(), "narrator turn 25");
    }

    #[tokio::test]
    async fn test_evictions_move_one_turn_in_order() {
        let (mut buffer, _) = buffer(10);
        for i in 0..10 {
            assert_eq!(buffer.append(numbered(i)).await, AppendOutcome::Buffered);
        }

        for n in 1..10 {
            let outcome = buffer.append(numbered(9 + n)).await;
            assert_eq!(outcome, AppendOutcome::Evicted { stack_len: n });
            assert_eq!(buffer.stack().turns()[n - 1].text(), numbered(n - 1).text());
        }
    }

    #[tokio::test]
    async fn test_full_stack_compacts_into_one_fragment() {
        let (mut buffer, store) = buffer(10);
        let mut last = AppendOutcome::Buffered;
        for i in 0..20 {
            last = buffer.append(numbered(i)).await;
        }

        assert!(matches!(last, AppendOutcome::Compacted { ref fragment_ids } if fragment_ids.len() == 1));
        assert!(buffer.stack().is_empty());

        let summaries = store.fragments_of(FragmentKind::InteractionSummary).await;
        assert_eq!(summaries.len(), 1);
        for i in 0..10 {
            assert!(summaries[0].text.contains(numbered(i).text()));
        }
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_batch_and_retries() {
        let store = Arc::new(FlakyEmbeddingStore::new().fail_next_writes(1));
        let mut buffer = ShortTermBuffer::new(3, Summarizer::new(store.clone()));

        for i in 0..6 {
            buffer.append(numbered(i)).await;
        }
        assert_eq!(buffer.stack().len(), 3);
        assert!(store.inner().fragments().await.is_empty());

        let outcome = buffer.append(numbered(6)).await;
        assert!(matches!(outcome, AppendOutcome::Compacted { .. }));
        assert_eq!(buffer.stack().len(), 1);

        let fragments = store.inner().fragments().await;
        assert_eq!(fragments.len(), 1);
        for i in 0..3 {
            assert!(fragments[0].text.contains(numbered(i).text()));
        }
        assert!(!fragments[0].text.contains(numbered(3).text()));
    }

    #[tokio::test]
    async fn test_restore_keeps_newest_without_compacting() {
        let (mut buffer, store) = buffer(3);
        buffer.restore((0..5).map(numbered));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot()[0].text(), numbered(2).text());
        assert!(buffer.stack().is_empty());
        assert!(store.fragments().await.is_empty());
    }
}
