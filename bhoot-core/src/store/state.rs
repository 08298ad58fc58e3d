//! The per-session game state row.

use super::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::RwLock;

pub const KEY_PLOT_POINTS: &str = "plot_points";
pub const KEY_CURRENT_PLOT_INDEX: &str = "current_plot_index";
pub const KEY_LAST_ACTION: &str = "last_action";
pub const KEY_COMPLETED_PLOTS: &str = "completed_plots";
pub const KEY_CURRENT_LOCATION: &str = "current_location_id";

/// Identifier of a stored game state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub u64);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative session state.
///
/// `world_state` embeds the plot list and its current index under
/// `plot_points` and `current_plot_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub plot_progress: String,
    #[serde(default)]
    pub session_data: Map<String, Value>,
    #[serde(default)]
    pub world_state: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl GameState {
    pub fn new(plot_progress: impl Into<String>) -> Self {
        Self {
            plot_progress: plot_progress.into(),
            session_data: Map::new(),
            world_state: Map::new(),
            updated_at: Utc::now(),
        }
    }

    /// Plot points stored in the world state, empty when absent.
    pub fn plot_points(&self) -> Vec<String> {
        self.world_state
            .get(KEY_PLOT_POINTS)
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn current_plot_index(&self) -> Option<usize> {
        self.world_state
            .get(KEY_CURRENT_PLOT_INDEX)
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    /// The active location, if the session has entered one.
    pub fn current_location_id(&self) -> Option<&str> {
        self.session_data
            .get(KEY_CURRENT_LOCATION)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn set_current_location(&mut self, location_id: impl Into<String>) {
        self.session_data.insert(
            KEY_CURRENT_LOCATION.to_string(),
            Value::String(location_id.into()),
        );
    }

    /// Apply the fields present in `update`.
    pub fn apply(&mut self, update: GameStateUpdate) {
        if let Some(label) = update.plot_progress {
            self.plot_progress = label;
        }
        if let Some(session_data) = update.session_data {
            self.session_data = session_data;
        }
        if let Some(world_state) = update.world_state {
            self.world_state = world_state;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial overwrite of a [`GameState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameStateUpdate {
    pub plot_progress: Option<String>,
    pub session_data: Option<Map<String, Value>>,
    pub world_state: Option<Map<String, Value>>,
}

impl GameStateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plot_progress(mut self, label: impl Into<String>) -> Self {
        self.plot_progress = Some(label.into());
        self
    }

    pub fn session_data(mut self, data: Map<String, Value>) -> Self {
        self.session_data = Some(data);
        self
    }

    pub fn world_state(mut self, state: Map<String, Value>) -> Self {
        self.world_state = Some(state);
        self
    }
}

/// A stored state row and its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: StateId,
    pub state: GameState,
}

/// Single-row game state persistence.
///
/// Reads return the latest row; updates overwrite it in place.
#[async_trait]
pub trait GameStateStore: Send + Sync {
    async fn get_latest(&self) -> Result<Option<StateRecord>, PersistenceError>;

    async fn create(&self, state: GameState) -> Result<StateId, PersistenceError>;

    async fn update(&self, id: StateId, update: GameStateUpdate) -> Result<(), PersistenceError>;

    /// Drop every row (full session reset).
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// Row set shared by the in-memory and file stores.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct Rows {
    next_id: u64,
    rows: Vec<StateRecord>,
}

impl Rows {
    pub(super) fn create(&mut self, state: GameState) -> StateId {
        self.next_id += 1;
        let id = StateId(self.next_id);
        self.rows.push(StateRecord { id, state });
        id
    }

    pub(super) fn update(
        &mut self,
        id: StateId,
        update: GameStateUpdate,
    ) -> Result<(), PersistenceError> {
        let record = self
            .rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| PersistenceError::NotFound(format!("game state {id}")))?;
        record.state.apply(update);
        Ok(())
    }

    pub(super) fn latest(&self) -> Option<StateRecord> {
        self.rows
            .iter()
            .max_by_key(|r| (r.state.updated_at, r.id.0))
            .cloned()
    }

    pub(super) fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Process-local game state store.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Rows>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStateStore for InMemoryStateStore {
    async fn get_latest(&self) -> Result<Option<StateRecord>, PersistenceError> {
        Ok(self.inner.read().await.latest())
    }

    async fn create(&self, state: GameState) -> Result<StateId, PersistenceError> {
        Ok(self.inner.write().await.create(state))
    }

    async fn update(&self, id: StateId, update: GameStateUpdate) -> Result<(), PersistenceError> {
        self.inner.write().await.update(id, update)
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.inner.write().await.clear();
        Ok(())
    }
}
