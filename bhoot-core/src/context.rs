//! Grounding context for generation requests.

use crate::store::{
    EmbeddingStore, FragmentKind, GameState, LocationCatalog, RetrievalError, TagFilter,
};
use std::sync::Arc;

/// Returned when the embedding store cannot be reached.
pub const NO_CONTEXT: &str = "no context available";

/// Returned when every context part is empty.
pub const NO_SPECIFIC_CONTEXT: &str = "No specific context available";

/// Stand-in for episodic context in prompts when nothing matched.
pub const NO_EPISODIC_MEMORY: &str = "No relevant episodic memory found";

pub const SEPARATOR: &str = " | ";

/// Builds a single grounding string from retrieval, location and plot state.
pub struct ContextAssembler {
    store: Arc<dyn EmbeddingStore>,
    catalog: Option<Arc<dyn LocationCatalog>>,
    world_results: usize,
    episodic_results: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        world_results: usize,
        episodic_results: usize,
    ) -> Self {
        Self {
            store,
            catalog: None,
            world_results,
            episodic_results,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn LocationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Context for `query`, in order: semantic matches, episodic memories,
    /// the active location, the plot progress label.
    ///
    /// Never fails. A store error yields [`NO_CONTEXT`].
    pub async fn assemble(&self, query: &str, state: Option<&GameState>) -> String {
        match self.try_assemble(query, state).await {
            Ok(parts) if parts.is_empty() => NO_SPECIFIC_CONTEXT.to_string(),
            Ok(parts) => parts.join(SEPARATOR),
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval failed");
                NO_CONTEXT.to_string()
            }
        }
    }

    async fn try_assemble(
        &self,
        query: &str,
        state: Option<&GameState>,
    ) -> Result<Vec<String>, RetrievalError> {
        let mut parts = Vec::new();

        if self.world_results > 0 {
            let world = self.store.query(query, self.world_results, None).await?;
            parts.extend(world.documents.into_iter().filter(|d| !d.trim().is_empty()));
        }

        parts.extend(self.episodic_memories(query, self.episodic_results).await?);

        if let Some(state) = state {
            if let Some(location) = self.location_line(state).await {
                parts.push(location);
            }
            if !state.plot_progress.trim().is_empty() {
                parts.push(format!("Plot progress: {}", state.plot_progress));
            }
        }

        Ok(parts)
    }

    /// Episodic matches rendered as `Memory k: text`, best first.
    pub async fn episodic_memories(
        &self,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        if top_n == 0 {
            return Ok(Vec::new());
        }
        let filter = TagFilter::kinds(&FragmentKind::EPISODIC);
        let result = self.store.query(query, top_n, Some(&filter)).await?;
        Ok(result
            .documents
            .into_iter()
            .enumerate()
            .map(|(i, doc)| format!("Memory {}: {doc}", i + 1))
            .collect())
    }

    /// Episodic matches as one string, falling back to
    /// [`NO_EPISODIC_MEMORY`] when nothing matches or retrieval fails.
    pub async fn episodic_context(&self, query: &str, top_n: usize) -> String {
        match self.episodic_memories(query, top_n).await {
            Ok(memories) if !memories.is_empty() => memories.join(SEPARATOR),
            Ok(_) => NO_EPISODIC_MEMORY.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "episodic retrieval failed");
                NO_EPISODIC_MEMORY.to_string()
            }
        }
    }

    async fn location_line(&self, state: &GameState) -> Option<String> {
        let catalog = self.catalog.as_ref()?;
        let location_id = state.current_location_id()?;

        let location = match catalog.get_location(location_id).await {
            Ok(Some(location)) => location,
            Ok(None) => {
                tracing::debug!(location_id, "active location not in catalog");
                return None;
            }
            Err(e) => {
                tracing::warn!(location_id, error = %e, "location lookup failed");
                return None;
            }
        };

        let mut line = format!(
            "Current location: {} - {}",
            location.name, location.description
        );
        match catalog.entities_at(location_id).await {
            Ok(entities) if !entities.is_empty() => {
                let names: Vec<_> = entities.iter().map(|e| e.name.as_str()).collect();
                line.push_str(&format!(" (present: {})", names.join(", ")));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(location_id, error = %e, "entity lookup failed"),
        }
        Some(line)
    }
}
