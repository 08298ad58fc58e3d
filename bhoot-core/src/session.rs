//! GameSession - the primary public API for a BhootAI game.
//!
//! This module wires configuration, file-backed stores, provider selection
//! and lore ingestion into a single [`Narrator`]-driven session.

use crate::config::{ConfigError, EngineConfig};
use crate::llm::{select_generator, GenerationError, Generator, LlmConfig};
use crate::lore::ingest_lore;
use crate::narrator::{Narrator, NarratorError, NarratorResponse};
use crate::plot::PlotStatus;
use crate::store::{
    FileConversationLog, FileEmbeddingStore, FileStateStore, LocationCatalog,
    PersistenceError, RetrievalError, Stores, WorldCatalog,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

/// File name of the conversation log inside the data directory.
pub const CONVERSATION_LOG_FILE: &str = "conversation.jsonl";

/// File name of the embedding journal inside the data directory.
pub const EMBEDDINGS_FILE: &str = "embeddings.jsonl";

/// Errors from GameSession startup.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

impl From<NarratorError> for SessionError {
    fn from(e: NarratorError) -> Self {
        match e {
            NarratorError::Generation(e) => SessionError::Generation(e),
        }
    }
}

/// Configuration for starting a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the game state and conversation log.
    pub data_dir: PathBuf,

    /// Plain text world lore, ingested at startup.
    pub lore_path: Option<PathBuf>,

    /// JSON location and entity catalog.
    pub catalog_path: Option<PathBuf>,

    /// Empty every store before play begins.
    pub purge_on_start: bool,

    pub engine: EngineConfig,

    pub llm: LlmConfig,
}

impl SessionConfig {
    /// Create a session config storing its data under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lore_path: None,
            catalog_path: None,
            purge_on_start: false,
            engine: EngineConfig::default(),
            llm: LlmConfig::default(),
        }
    }

    /// Read `BHOOT_DATA_DIR`, `BHOOT_LORE_PATH`, `BHOOT_CATALOG_PATH` and
    /// `BHOOT_PURGE_ON_START`, plus the engine and generator settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("BHOOT_DATA_DIR").unwrap_or_else(|_| "bhoot_data".into());
        let purge_on_start = match std::env::var("BHOOT_PURGE_ON_START") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BHOOT_PURGE_ON_START".to_string(),
                value: raw.clone(),
            })?,
            Err(_) => false,
        };

        Ok(Self {
            data_dir: data_dir.into(),
            lore_path: std::env::var("BHOOT_LORE_PATH").ok().map(PathBuf::from),
            catalog_path: std::env::var("BHOOT_CATALOG_PATH").ok().map(PathBuf::from),
            purge_on_start,
            engine: EngineConfig::from_env()?,
            llm: LlmConfig::from_env()?,
        })
    }

    pub fn with_lore_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lore_path = Some(path.into());
        self
    }

    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn with_purge_on_start(mut self, purge: bool) -> Self {
        self.purge_on_start = purge;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }
}

/// A BhootAI game session.
///
/// Holds the session lock on its data directory for as long as it lives.
pub struct GameSession {
    narrator: Narrator,
    chunks: usize,
}

impl GameSession {
    /// Start a session with the generator chosen from `config.llm`.
    pub async fn start(config: SessionConfig) -> Result<Self, SessionError> {
        config.engine.validate()?;
        let generator = select_generator(&config.llm, config.engine.generation_timeout)?;
        Self::start_with_generator(config, generator).await
    }

    /// Start a session with an explicit generator.
    pub async fn start_with_generator(
        config: SessionConfig,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, SessionError> {
        config.engine.validate()?;
        tracing::info!(
            data_dir = %config.data_dir.display(),
            generator = generator.name(),
            "starting session"
        );

        let state = FileStateStore::open(&config.data_dir).await?;
        let log = FileConversationLog::new(config.data_dir.join(CONVERSATION_LOG_FILE));
        let embeddings = FileEmbeddingStore::open(config.data_dir.join(EMBEDDINGS_FILE)).await?;
        let mut stores = Stores::new(
            Arc::new(embeddings),
            Arc::new(state),
            Arc::new(log),
        );
        if let Some(ref path) = config.catalog_path {
            let catalog: Arc<dyn LocationCatalog> = Arc::new(WorldCatalog::load_json(path).await?);
            stores = stores.with_catalog(catalog);
        }

        if config.purge_on_start {
            stores.purge().await?;
        }

        let lore = read_lore(config.lore_path.as_ref()).await?;
        let chunks = ingest_lore(
            stores.embeddings.as_ref(),
            &lore,
            config.engine.chunk_window,
            config.engine.chunk_overlap,
        )
        .await?;

        let narrator = Narrator::start(config.engine, generator, stores, lore).await?;
        Ok(Self { narrator, chunks })
    }

    /// Process a player action and get the narrator's response.
    pub async fn player_action(&mut self, input: &str) -> Result<NarratorResponse, NarratorError> {
        self.narrator.respond_to_player(input).await
    }

    pub async fn welcome(&self) -> String {
        self.narrator.welcome().await
    }

    pub async fn opening_scene(&self) -> Result<String, NarratorError> {
        self.narrator.opening_scene().await
    }

    pub async fn enter_location(&mut self, location_id: &str) -> Result<(), PersistenceError> {
        self.narrator.enter_location(location_id).await
    }

    /// End the session, optionally purging every store.
    pub async fn end(mut self, purge: bool) -> Result<(), PersistenceError> {
        self.narrator.end_session(purge).await
    }

    pub fn plot_status(&self) -> PlotStatus {
        self.narrator.plot_status()
    }

    pub fn plot_summary(&self) -> String {
        self.narrator.plot_summary()
    }

    /// Lore chunks ingested at startup.
    pub fn lore_chunks(&self) -> usize {
        self.chunks
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    pub fn narrator_mut(&mut self) -> &mut Narrator {
        &mut self.narrator
    }
}

async fn read_lore(path: Option<&PathBuf>) -> Result<String, PersistenceError> {
    let Some(path) = path else {
        return Ok(String::new());
    };
    match fs::read_to_string(path).await {
        Ok(lore) => Ok(lore),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "lore file not found, starting without lore");
            Ok(String::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Purpose;
    use crate::store::EmbeddingStore;
    use crate::testing::ScriptedGenerator;
    use tempfile::TempDir;

    fn scripted() -> Arc<ScriptedGenerator> {
        Arc::new(
            ScriptedGenerator::new()
                .reply(Purpose::Narration, r#"{"response_text": "A door slams."}"#)
                .reply(Purpose::PlotExtension, "Follow the footsteps"),
        )
    }

    #[tokio::test]
    async fn test_start_ingests_lore() {
        let dir = TempDir::new().unwrap();
        let lore_path = dir.path().join("lore.txt");
        let lore: Vec<String> = (0..120).map(|i| format!("word{i}")).collect();
        std::fs::write(&lore_path, lore.join(" ")).unwrap();

        let config = SessionConfig::new(dir.path().join("data")).with_lore_path(&lore_path);
        let session = GameSession::start_with_generator(config, scripted())
            .await
            .unwrap();
        assert_eq!(session.lore_chunks(), 3);
        assert_eq!(session.narrator().stores().embeddings.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_lore_file_is_empty_lore() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::new(dir.path()).with_lore_path(dir.path().join("nope.txt"));
        let session = GameSession::start_with_generator(config, scripted())
            .await
            .unwrap();
        assert_eq!(session.lore_chunks(), 0);
    }

    #[tokio::test]
    async fn test_second_session_on_same_dir_is_locked() {
        let dir = TempDir::new().unwrap();
        let _first = GameSession::start_with_generator(SessionConfig::new(dir.path()), scripted())
            .await
            .unwrap();
        let second =
            GameSession::start_with_generator(SessionConfig::new(dir.path()), scripted()).await;
        assert!(matches!(
            second,
            Err(SessionError::Persistence(PersistenceError::Locked(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_engine_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::new(dir.path())
            .with_engine(EngineConfig::default().with_buffer_capacity(0));
        let result = GameSession::start_with_generator(config, scripted()).await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn test_player_action_goes_through_narrator() {
        let dir = TempDir::new().unwrap();
        let mut session =
            GameSession::start_with_generator(SessionConfig::new(dir.path()), scripted())
                .await
                .unwrap();
        let response = session.player_action("I listen").await.unwrap();
        assert_eq!(response.text, "A door slams.");
        assert!(dir.path().join(CONVERSATION_LOG_FILE).exists());
    }
}
