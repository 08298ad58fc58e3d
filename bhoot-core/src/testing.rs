//! Testing utilities for the narrative engine.
//!
//! This module provides deterministic stand-ins for the external services:
//! - `ScriptedGenerator` returns queued replies per request purpose
//! - `FlakyEmbeddingStore` and `FlakyConversationLog` fail on demand
//! - `TestHarness` wires a `Narrator` to all of them in memory

use crate::config::EngineConfig;
use crate::llm::{GenerationError, GenerationRequest, Generator, Purpose};
use crate::narrator::{Narrator, NarratorError, NarratorResponse};
use crate::store::{
    ConversationLog, EmbeddingStore, InMemoryConversationLog, InMemoryEmbeddingStore,
    InMemoryStateStore, LogEntry, MemoryFragment, PersistenceError, QueryResult, RetrievalError,
    Stores, TagFilter,
};
use crate::turn::Actor;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A generator that replays scripted replies.
///
/// Replies are queued per [`Purpose`] and handed out in order. The last
/// reply for a purpose repeats once the queue is down to it. A purpose with
/// nothing queued, or one marked with [`ScriptedGenerator::fail`], returns a
/// provider error.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<Purpose, VecDeque<String>>>,
    failing: Mutex<HashSet<Purpose>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `purpose`.
    pub fn reply(self, purpose: Purpose, text: impl Into<String>) -> Self {
        self.push_reply(purpose, text);
        self
    }

    /// Make every request for `purpose` fail.
    pub fn fail(self, purpose: Purpose) -> Self {
        self.set_failing(purpose, true);
        self
    }

    /// Queue a reply on a generator that is already shared.
    pub fn push_reply(&self, purpose: Purpose, text: impl Into<String>) {
        lock(&self.replies)
            .entry(purpose)
            .or_default()
            .push_back(text.into());
    }

    pub fn set_failing(&self, purpose: Purpose, failing: bool) {
        let mut set = lock(&self.failing);
        if failing {
            set.insert(purpose);
        } else {
            set.remove(&purpose);
        }
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self, purpose: Purpose) -> Option<GenerationRequest> {
        lock(&self.requests)
            .iter()
            .rev()
            .find(|r| r.purpose == purpose)
            .cloned()
    }

    pub fn calls_for(&self, purpose: Purpose) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let purpose = request.purpose;
        lock(&self.requests).push(request);

        if lock(&self.failing).contains(&purpose) {
            return Err(GenerationError::Provider(format!("scripted {purpose} failure")));
        }

        let mut replies = lock(&self.replies);
        let queue = replies
            .get_mut(&purpose)
            .ok_or_else(|| GenerationError::Provider(format!("no scripted {purpose} reply")))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.ok_or_else(|| GenerationError::Provider(format!("no scripted {purpose} reply")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// An in-memory embedding store that can be told to fail.
#[derive(Default)]
pub struct FlakyEmbeddingStore {
    inner: InMemoryEmbeddingStore,
    failing_writes: AtomicUsize,
    failing_queries: AtomicBool,
    query_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl FlakyEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes, then recover.
    pub fn fail_next_writes(self, n: usize) -> Self {
        self.failing_writes.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every query.
    pub fn fail_queries(self) -> Self {
        self.set_failing_queries(true);
        self
    }

    pub fn set_failing_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_failing_queries(&self, failing: bool) {
        self.failing_queries.store(failing, Ordering::SeqCst);
    }

    /// The wrapped store, for inspecting what was written.
    pub fn inner(&self) -> &InMemoryEmbeddingStore {
        &self.inner
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingStore for FlakyEmbeddingStore {
    async fn add(&self, fragment: MemoryFragment) -> Result<(), RetrievalError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(RetrievalError::Write(format!(
                "scripted write failure for {}",
                fragment.id
            )));
        }
        self.inner.add(fragment).await
    }

    async fn query(
        &self,
        query: &str,
        top_n: usize,
        filter: Option<&TagFilter>,
    ) -> Result<QueryResult, RetrievalError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_queries.load(Ordering::SeqCst) {
            return Err(RetrievalError::Unavailable("scripted query failure".into()));
        }
        self.inner.query(query, top_n, filter).await
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.inner.count().await
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        self.inner.clear().await
    }
}

/// An in-memory conversation log whose appends can be made to fail.
#[derive(Default)]
pub struct FlakyConversationLog {
    inner: InMemoryConversationLog,
    failing: AtomicBool,
}

impl FlakyConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryConversationLog {
        &self.inner
    }
}

#[async_trait]
impl ConversationLog for FlakyConversationLog {
    async fn append(&self, entry: LogEntry) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("scripted log failure".into()));
        }
        self.inner.append(entry).await
    }

    async fn recent(
        &self,
        limit: usize,
        actor: Option<Actor>,
    ) -> Result<Vec<LogEntry>, PersistenceError> {
        self.inner.recent(limit, actor).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.inner.clear().await
    }
}

/// Test harness for running scripted sessions.
pub struct TestHarness {
    /// The narrator under test.
    pub narrator: Narrator,
    /// The scripted generator shared with the narrator.
    pub generator: Arc<ScriptedGenerator>,
    /// The embedding store shared with the narrator.
    pub embeddings: Arc<FlakyEmbeddingStore>,
    /// The conversation log shared with the narrator.
    pub log: Arc<FlakyConversationLog>,
    /// The game state store shared with the narrator.
    pub state: Arc<InMemoryStateStore>,
}

impl TestHarness {
    /// Start a fresh in-memory session with default configuration.
    pub async fn new() -> Result<Self, PersistenceError> {
        Self::with_config(EngineConfig::default(), ScriptedGenerator::new()).await
    }

    /// Start a fresh in-memory session.
    pub async fn with_config(
        config: EngineConfig,
        generator: ScriptedGenerator,
    ) -> Result<Self, PersistenceError> {
        Self::with_lore(config, generator, "").await
    }

    /// Start a fresh in-memory session grounded in `lore`.
    ///
    /// The lore is handed to the narrator but not ingested into the
    /// embedding store.
    pub async fn with_lore(
        config: EngineConfig,
        generator: ScriptedGenerator,
        lore: &str,
    ) -> Result<Self, PersistenceError> {
        let generator = Arc::new(generator);
        let embeddings = Arc::new(FlakyEmbeddingStore::new());
        let log = Arc::new(FlakyConversationLog::new());
        let state = Arc::new(InMemoryStateStore::new());
        let stores = Stores::new(embeddings.clone(), state.clone(), log.clone());
        let narrator = Narrator::start(config, generator.clone(), stores, lore).await?;

        Ok(Self {
            narrator,
            generator,
            embeddings,
            log,
            state,
        })
    }

    /// Queue a narration reply.
    pub fn expect_narration(&self, text: impl Into<String>) -> &Self {
        self.generator.push_reply(Purpose::Narration, text);
        self
    }

    /// Queue plot points for the next extension.
    pub fn expect_plot_points(&self, points: &[&str]) -> &Self {
        self.generator
            .push_reply(Purpose::PlotExtension, points.join("\n"));
        self
    }

    /// Send player input through the narrator.
    pub async fn input(&mut self, text: &str) -> Result<NarratorResponse, NarratorError> {
        self.narrator.respond_to_player(text).await
    }

    /// Fragments written so far.
    pub async fn fragments(&self) -> Vec<MemoryFragment> {
        self.embeddings.inner().fragments().await
    }

    /// Log entries written so far, oldest first.
    pub async fn log_entries(&self) -> Vec<LogEntry> {
        let mut entries = self
            .log
            .recent(usize::MAX, None)
            .await
            .unwrap_or_default();
        entries.reverse();
        entries
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order_then_repeat() {
        let generator = ScriptedGenerator::new()
            .reply(Purpose::Narration, "first")
            .reply(Purpose::Narration, "second");
        let request = || GenerationRequest::new(Purpose::Narration, "x");

        assert_eq!(generator.generate(request()).await.unwrap(), "first");
        assert_eq!(generator.generate(request()).await.unwrap(), "second");
        assert_eq!(generator.generate(request()).await.unwrap(), "second");
        assert_eq!(generator.calls_for(Purpose::Narration), 3);
    }

    #[tokio::test]
    async fn test_unscripted_purpose_fails() {
        let generator = ScriptedGenerator::new().reply(Purpose::Narration, "ok");
        let result = generator
            .generate(GenerationRequest::new(Purpose::Summary, "x"))
            .await;
        assert!(matches!(result, Err(GenerationError::Provider(_))));
    }

    #[tokio::test]
    async fn test_flaky_store_recovers_after_failures() {
        let store = FlakyEmbeddingStore::new().fail_next_writes(1);
        let fragment = MemoryFragment::new("a", "text", crate::store::FragmentKind::Conversation);

        assert!(store.add(fragment.clone()).await.is_err());
        assert!(store.add(fragment).await.is_ok());
        assert_eq!(store.write_calls(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_harness_starts_with_initial_plot() {
        let harness = TestHarness::new().await.unwrap();
        assert_eq!(harness.narrator.plot_status().total_points, 5);
        assert!(harness.log_entries().await.is_empty());
    }
}
