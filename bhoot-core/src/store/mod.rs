//! Storage interfaces consumed by the engine, with in-memory and file-backed
//! implementations.

mod catalog;
mod embedding;
mod file;
mod log;
mod state;

pub use catalog::{Entity, EntityKind, Location, LocationCatalog, WorldCatalog};
pub use embedding::{
    Embedder, EmbeddingStore, FragmentKind, HashingEmbedder, InMemoryEmbeddingStore,
    MemoryFragment, QueryResult, RetrievalError, TagFilter, Tags, TAG_CATEGORY, TAG_CHUNK_INDEX,
    TAG_INTERACTION_COUNT, TAG_MESSAGE_COUNT, TAG_SOURCE, TAG_TIMESTAMP, TAG_TOTAL_CHUNKS,
    TAG_TYPE,
};
pub use file::{FileConversationLog, FileEmbeddingStore, FileStateStore, SessionLock};
pub use log::{ConversationLog, InMemoryConversationLog, LogEntry};
pub use state::{
    GameState, GameStateStore, GameStateUpdate, InMemoryStateStore, StateId, StateRecord,
    KEY_COMPLETED_PLOTS, KEY_CURRENT_LOCATION, KEY_CURRENT_PLOT_INDEX, KEY_LAST_ACTION,
    KEY_PLOT_POINTS,
};

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from the game state store, the conversation log or the catalog.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store is locked by another session: {0}")]
    Locked(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<RetrievalError> for PersistenceError {
    fn from(e: RetrievalError) -> Self {
        PersistenceError::Backend(e.to_string())
    }
}

/// The storage collaborators a session runs against.
#[derive(Clone)]
pub struct Stores {
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub state: Arc<dyn GameStateStore>,
    pub log: Arc<dyn ConversationLog>,
    pub catalog: Option<Arc<dyn LocationCatalog>>,
}

impl Stores {
    pub fn new(
        embeddings: Arc<dyn EmbeddingStore>,
        state: Arc<dyn GameStateStore>,
        log: Arc<dyn ConversationLog>,
    ) -> Self {
        Self {
            embeddings,
            state,
            log,
            catalog: None,
        }
    }

    /// Fresh process-local stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEmbeddingStore::new()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryConversationLog::new()),
        )
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn LocationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Empty every store (full session reset). The catalog is left alone.
    pub async fn purge(&self) -> Result<(), PersistenceError> {
        self.embeddings.clear().await?;
        self.state.clear().await?;
        self.log.clear().await?;
        tracing::info!("session stores purged");
        Ok(())
    }
}
