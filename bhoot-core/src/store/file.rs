//! File-backed stores.
//!
//! Game state is a single pretty-printed JSON document rewritten on every
//! change. The conversation log and the embedding store are JSON lines,
//! opened in append mode per write. A [`SessionLock`] enforces one writer per
//! data directory.

use super::embedding::{Embedder, HashingEmbedder, InMemoryEmbeddingStore};
use super::log::select_recent;
use super::state::Rows;
use super::{
    ConversationLog, EmbeddingStore, FragmentKind, GameState, GameStateStore, GameStateUpdate,
    LogEntry, MemoryFragment, PersistenceError, QueryResult, RetrievalError, StateId,
    StateRecord, TagFilter,
};
use crate::turn::Actor;
use async_trait::async_trait;
use fs2::FileExt;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STATE_FILE: &str = "game_state.json";
const LOCK_FILE: &str = "session.lock";

/// Exclusive claim on a data directory.
///
/// Backed by an OS advisory lock on `session.lock`, so the claim ends with
/// the owning process even if it never gets to drop the lock. The file
/// itself stays behind and names the last owner.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    file: std::fs::File,
}

impl SessionLock {
    /// Take the lock, failing with [`PersistenceError::Locked`] when another
    /// live session holds it. A file left behind by a dead owner is reclaimed.
    pub async fn acquire(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = dir.as_ref().join(LOCK_FILE);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(PersistenceError::Locked(path));
            }
            return Err(e.into());
        }

        let mut previous = String::new();
        file.read_to_string(&mut previous)?;
        if !previous.trim().is_empty() {
            tracing::info!(path = %path.display(), previous = previous.trim(), "reclaiming stale session lock");
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let owner = format!(
            "pid {} at {}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        file.write_all(owner.as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %path.display(), "session lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            tracing::debug!(path = %self.path.display(), error = %e, "could not clear session lock owner");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release session lock");
        }
    }
}

/// Game state persisted as JSON in a data directory.
pub struct FileStateStore {
    path: PathBuf,
    rows: Mutex<Rows>,
    _lock: SessionLock,
}

impl FileStateStore {
    /// Open (or initialize) the store in `dir`, taking the session lock.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let lock = SessionLock::acquire(dir).await?;

        let path = dir.join(STATE_FILE);
        let rows = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Rows::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            rows: Mutex::new(rows),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Written to a temporary file, then renamed over the document.
    async fn save(&self, rows: &Rows) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl GameStateStore for FileStateStore {
    async fn get_latest(&self) -> Result<Option<StateRecord>, PersistenceError> {
        Ok(self.rows.lock().await.latest())
    }

    async fn create(&self, state: GameState) -> Result<StateId, PersistenceError> {
        let mut rows = self.rows.lock().await;
        let id = rows.create(state);
        self.save(&rows).await?;
        Ok(id)
    }

    async fn update(&self, id: StateId, update: GameStateUpdate) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock().await;
        rows.update(id, update)?;
        self.save(&rows).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock().await;
        rows.clear();
        self.save(&rows).await
    }
}

/// Conversation log stored as JSON lines.
#[derive(Debug, Clone)]
pub struct FileConversationLog {
    path: PathBuf,
}

impl FileConversationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<LogEntry>, PersistenceError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "skipping corrupt log line");
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl ConversationLog for FileConversationLog {
    async fn append(&self, entry: LogEntry) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(
        &self,
        limit: usize,
        actor: Option<Actor>,
    ) -> Result<Vec<LogEntry>, PersistenceError> {
        let entries = self.read_all().await?;
        Ok(select_recent(&entries, limit, actor))
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Embedding store journaled as JSON lines.
///
/// Fragments are held in an [`InMemoryEmbeddingStore`] and every write is
/// appended to the journal first. Reopening replays the journal with
/// upsert-by-id semantics and rewrites it without superseded lines.
pub struct FileEmbeddingStore {
    path: PathBuf,
    inner: InMemoryEmbeddingStore,
    journal: Mutex<()>,
}

impl FileEmbeddingStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        Self::open_with_embedder(path, Arc::new(HashingEmbedder::default())).await
    }

    pub async fn open_with_embedder(
        path: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, PersistenceError> {
        let path = path.into();
        let inner = InMemoryEmbeddingStore::with_embedder(embedder);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut lines = 0;
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match serde_json::from_str::<MemoryFragment>(line) {
                Ok(fragment) => inner.add(fragment).await?,
                Err(e) => {
                    tracing::warn!(line = number + 1, error = %e, "skipping corrupt fragment line");
                }
            }
        }

        let store = Self {
            path,
            inner,
            journal: Mutex::new(()),
        };
        if lines > store.inner.count().await? {
            store.compact().await?;
        }
        let fragments = store.inner.count().await?;
        tracing::debug!(path = %store.path.display(), fragments, "embedding store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored fragments in first-insertion order.
    pub async fn fragments(&self) -> Vec<MemoryFragment> {
        self.inner.fragments().await
    }

    pub async fn fragments_of(&self, kind: FragmentKind) -> Vec<MemoryFragment> {
        self.inner.fragments_of(kind).await
    }

    async fn compact(&self) -> Result<(), PersistenceError> {
        let _journal = self.journal.lock().await;
        let mut content = String::new();
        for fragment in self.inner.fragments().await {
            content.push_str(&serde_json::to_string(&fragment)?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn append(&self, fragment: &MemoryFragment) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(fragment)?;
        line.push('\n');

        let _journal = self.journal.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for FileEmbeddingStore {
    async fn add(&self, fragment: MemoryFragment) -> Result<(), RetrievalError> {
        self.append(&fragment)
            .await
            .map_err(|e| RetrievalError::Write(format!("{}: {e}", fragment.id)))?;
        self.inner.add(fragment).await
    }

    async fn query(
        &self,
        query: &str,
        top_n: usize,
        filter: Option<&TagFilter>,
    ) -> Result<QueryResult, RetrievalError> {
        self.inner.query(query, top_n, filter).await
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        self.inner.count().await
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        let _journal = self.journal.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(RetrievalError::Write(e.to_string())),
        }
        self.inner.clear().await
    }
}
