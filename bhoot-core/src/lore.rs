//! Initial world lore ingestion.

use crate::store::{
    EmbeddingStore, FragmentKind, MemoryFragment, RetrievalError, TAG_CHUNK_INDEX, TAG_SOURCE,
    TAG_TOTAL_CHUNKS,
};

/// Split `text` into overlapping windows of `window` words.
///
/// Windows start every `window - overlap` words. The last window always ends
/// on the final word, so it may overlap its predecessor by more than
/// `overlap`. Text no longer than one window yields a single chunk.
pub fn chunk_words(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let window = window.max(1);
    if words.len() <= window {
        return vec![words.join(" ")];
    }

    let step = window.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start + window < words.len() {
        chunks.push(words[start..start + window].join(" "));
        start += step;
    }
    chunks.push(words[words.len() - window..].join(" "));
    chunks
}

/// Chunk and store lore as `world_context` fragments.
///
/// Fragment ids are derived from the chunk index, so ingesting the same
/// lore twice replaces rather than duplicates it. Returns the chunk count.
pub async fn ingest_lore(
    store: &dyn EmbeddingStore,
    lore: &str,
    window: usize,
    overlap: usize,
) -> Result<usize, RetrievalError> {
    let chunks = chunk_words(lore, window, overlap);
    let total = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let fragment = MemoryFragment::new(
            format!("{}_{index}", FragmentKind::WorldContext.as_str()),
            chunk,
            FragmentKind::WorldContext,
        )
        .with_tag(TAG_CHUNK_INDEX, index)
        .with_tag(TAG_TOTAL_CHUNKS, total)
        .with_tag(TAG_SOURCE, "initial_context");
        store.add(fragment).await?;
    }

    tracing::info!(chunks = total, "world lore ingested");
    Ok(total)
}
