//! Semantic memory store.
//!
//! Memory fragments are written once and ranked by similarity to a query.
//! [`InMemoryEmbeddingStore`] ranks with a pluggable [`Embedder`]; the
//! default is a feature-hashing bag of words with cosine similarity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Fragment metadata: string keys to string values.
pub type Tags = BTreeMap<String, String>;

/// Tag key naming the fragment's category.
pub const TAG_TYPE: &str = "type";
pub const TAG_SOURCE: &str = "source";
pub const TAG_CHUNK_INDEX: &str = "chunk_index";
pub const TAG_TOTAL_CHUNKS: &str = "total_chunks";
pub const TAG_MESSAGE_COUNT: &str = "message_count";
pub const TAG_INTERACTION_COUNT: &str = "interaction_count";
pub const TAG_TIMESTAMP: &str = "timestamp";
pub const TAG_CATEGORY: &str = "category";

/// Errors from the embedding store.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Embedding store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Write failed: {0}")]
    Write(String),
}

/// Categories of stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    WorldContext,
    InteractionSummary,
    Conversation,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::WorldContext => "world_context",
            FragmentKind::InteractionSummary => "interaction_summary",
            FragmentKind::Conversation => "conversation",
        }
    }

    /// Kinds produced by play rather than by lore ingestion.
    pub const EPISODIC: [FragmentKind; 2] =
        [FragmentKind::Conversation, FragmentKind::InteractionSummary];
}

/// An immutable piece of retrievable memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: String,
    pub text: String,
    pub tags: Tags,
}

impl MemoryFragment {
    pub fn new(id: impl Into<String>, text: impl Into<String>, kind: FragmentKind) -> Self {
        let mut tags = Tags::new();
        tags.insert(TAG_TYPE.to_string(), kind.as_str().to_string());
        Self {
            id: id.into(),
            text: text.into(),
            tags,
        }
    }

    pub fn with_tag(mut self, key: &str, value: impl ToString) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Restrict a query to fragments whose tag `key` is one of `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub values: Vec<String>,
}

impl TagFilter {
    pub fn kinds(kinds: &[FragmentKind]) -> Self {
        Self {
            key: TAG_TYPE.to_string(),
            values: kinds.iter().map(|k| k.as_str().to_string()).collect(),
        }
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        tags.get(&self.key)
            .is_some_and(|v| self.values.iter().any(|wanted| wanted == v))
    }
}

/// Ranked query results, most similar first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<Tags>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

/// Content-addressable semantic store.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Store a fragment. Adding an id that already exists replaces it.
    async fn add(&self, fragment: MemoryFragment) -> Result<(), RetrievalError>;

    /// Up to `top_n` fragments ranked by similarity. An empty store yields
    /// empty results.
    async fn query(
        &self,
        query: &str,
        top_n: usize,
        filter: Option<&TagFilter>,
    ) -> Result<QueryResult, RetrievalError>;

    /// Number of stored fragments.
    async fn count(&self) -> Result<usize, RetrievalError>;

    /// Remove every fragment (full session reset).
    async fn clear(&self) -> Result<(), RetrievalError>;
}

/// Maps text to a fixed-length vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

struct Entry {
    fragment: MemoryFragment,
    vector: Vec<f32>,
}

/// Process-local embedding store.
pub struct InMemoryEmbeddingStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::with_embedder(Arc::new(HashingEmbedder::default()))
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of stored fragments in insertion order.
    pub async fn fragments(&self) -> Vec<MemoryFragment> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.fragment.clone())
            .collect()
    }

    /// Stored fragments of one kind, in insertion order.
    pub async fn fragments_of(&self, kind: FragmentKind) -> Vec<MemoryFragment> {
        self.fragments()
            .await
            .into_iter()
            .filter(|f| f.tag(TAG_TYPE) == Some(kind.as_str()))
            .collect()
    }
}

impl Default for InMemoryEmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn add(&self, fragment: MemoryFragment) -> Result<(), RetrievalError> {
        let vector = self.embedder.embed(&fragment.text);
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.fragment.id == fragment.id) {
            Some(existing) => {
                tracing::debug!(id = %fragment.id, "replacing existing fragment");
                existing.fragment = fragment;
                existing.vector = vector;
            }
            None => entries.push(Entry { fragment, vector }),
        }
        Ok(())
    }

    async fn query(
        &self,
        query: &str,
        top_n: usize,
        filter: Option<&TagFilter>,
    ) -> Result<QueryResult, RetrievalError> {
        let query_vector = self.embedder.embed(query);
        let entries = self.entries.read().await;

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.is_none_or(|f| f.matches(&e.fragment.tags)))
            .map(|(i, e)| (i, cosine(&query_vector, &e.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_n);

        let mut result = QueryResult::default();
        for (index, _) in scored {
            let fragment = &entries[index].fragment;
            result.documents.push(fragment.text.clone());
            result.metadatas.push(fragment.tags.clone());
        }
        Ok(result)
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: &str, text: &str, kind: FragmentKind) -> MemoryFragment {
        MemoryFragment::new(id, text, kind)
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_results() {
        let store = InMemoryEmbeddingStore::new();
        let result = store.query("anything", 5, None).await.unwrap();
        assert!(result.is_empty());
        assert!(result.metadatas.is_empty());
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = InMemoryEmbeddingStore::new();
        store
            .add(fragment("a", "the chapel bells toll at midnight", FragmentKind::WorldContext))
            .await
            .unwrap();
        store
            .add(fragment("b", "wolves howl beyond the castle walls", FragmentKind::WorldContext))
            .await
            .unwrap();

        let result = store.query("why do the wolves howl", 2, None).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.documents[0], "wolves howl beyond the castle walls");
    }

    #[tokio::test]
    async fn test_add_same_id_replaces() {
        let store = InMemoryEmbeddingStore::new();
        store.add(fragment("x", "first", FragmentKind::Conversation)).await.unwrap();
        store.add(fragment("x", "second", FragmentKind::Conversation)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.fragments().await[0].text, "second");
    }

    #[tokio::test]
    async fn test_filter_by_kind() {
        let store = InMemoryEmbeddingStore::new();
        store.add(fragment("w", "crypt lore", FragmentKind::WorldContext)).await.unwrap();
        store.add(fragment("c", "crypt memory", FragmentKind::Conversation)).await.unwrap();

        let filter = TagFilter::kinds(&FragmentKind::EPISODIC);
        let result = store.query("crypt", 5, Some(&filter)).await.unwrap();
        assert_eq!(result.documents, vec!["crypt memory".to_string()]);
        assert_eq!(result.metadatas[0].get(TAG_TYPE).unwrap(), "conversation");
    }

    #[tokio::test]
    async fn test_top_n_truncates() {
        let store = InMemoryEmbeddingStore::new();
        for i in 0..8 {
            store
                .add(fragment(&format!("f{i}"), &format!("fragment {i}"), FragmentKind::WorldContext))
                .await
                .unwrap();
        }
        assert_eq!(store.query("fragment", 5, None).await.unwrap().len(), 5);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_hashing_embedder_is_normalized() {
        let v = HashingEmbedder::new(64).embed("blood moon blood");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(HashingEmbedder::new(64).embed("").iter().all(|x| *x == 0.0));
    }
}
