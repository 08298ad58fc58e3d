//! Plot progression.
//!
//! The plot is an ordered list of short goals with one active index. Every
//! player action completes the active point, asks the generator for a few
//! follow-ups, splices them in where the completed point was and moves the
//! index forward by one slot. An index equal to the list length means the
//! plot is complete; that state is absorbing.

use crate::context::ContextAssembler;
use crate::llm::{generate_within, GenerationRequest, Generator, Purpose};
use crate::reply::fenced_block;
use crate::store::{
    GameState, GameStateStore, GameStateUpdate, PersistenceError, KEY_COMPLETED_PLOTS,
    KEY_CURRENT_PLOT_INDEX, KEY_LAST_ACTION, KEY_PLOT_POINTS,
};
use crate::turn::Turn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const PLOT_GENERATOR_PROMPT: &str = include_str!("prompts/plot_generator.txt");

/// Label reported for the current point once the plot is complete.
pub const COMPLETE_LABEL: &str = "Complete";

/// Ordered plot points and the active index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotList {
    points: Vec<String>,
    current_index: usize,
}

impl PlotList {
    pub fn new<I, S>(points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            points: points.into_iter().map(Into::into).collect(),
            current_index: 0,
        }
    }

    /// Restore from a stored game state, clamping a stale index.
    ///
    /// `None` when no plot was ever stored. A stored empty plot is a
    /// completed one and restores as such.
    pub fn from_state(state: &GameState) -> Option<Self> {
        if !state.world_state.contains_key(KEY_PLOT_POINTS) {
            return None;
        }
        let points = state.plot_points();
        let current_index = state.current_plot_index().unwrap_or(0).min(points.len());
        Some(Self {
            points,
            current_index,
        })
    }

    pub fn points(&self) -> &[String] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&str> {
        self.points.get(self.current_index).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.points.len()
    }

    /// Up to `n` points after the active one.
    pub fn upcoming(&self, n: usize) -> &[String] {
        let start = (self.current_index + 1).min(self.points.len());
        let end = (start + n).min(self.points.len());
        &self.points[start..end]
    }

    fn remove_current(&mut self) -> Option<String> {
        (!self.is_complete()).then(|| self.points.remove(self.current_index))
    }

    fn insert_at_current(&mut self, new_points: &[String]) {
        let at = self.current_index.min(self.points.len());
        self.points.splice(at..at, new_points.iter().cloned());
    }
}

/// A completed plot point and the action that completed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub completed_plot: String,
    pub player_action: String,
}

impl CompletionRecord {
    /// Archive form: a system note, the player action and a narrator note.
    pub fn to_turns(&self) -> Vec<Turn> {
        vec![
            Turn::system(format!("Completed plot point: {}", self.completed_plot)),
            Turn::player(self.player_action.clone()),
            Turn::narrator(format!(
                "Plot point '{}' completed through action: {}",
                self.completed_plot, self.player_action
            )),
        ]
    }
}

/// What one call to [`PlotEngine::advance`] did.
#[derive(Debug)]
pub struct PlotAdvance {
    /// `None` when the plot was already complete.
    pub completion: Option<CompletionRecord>,
    pub new_points: Vec<String>,
    pub current_index: usize,
    /// Set when the new plot could not be written to the game state.
    pub persistence_error: Option<PersistenceError>,
}

impl PlotAdvance {
    fn terminal(current_index: usize) -> Self {
        Self {
            completion: None,
            new_points: Vec::new(),
            current_index,
            persistence_error: None,
        }
    }
}

/// Snapshot for display and prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlotStatus {
    pub current_index: usize,
    pub current_point: String,
    pub upcoming_points: Vec<String>,
    pub total_points: usize,
    pub completed_points: usize,
    pub progress: String,
}

impl PlotStatus {
    pub fn of(plot: &PlotList) -> Self {
        Self {
            current_index: plot.current_index(),
            current_point: plot.current().unwrap_or(COMPLETE_LABEL).to_string(),
            upcoming_points: plot.upcoming(3).to_vec(),
            total_points: plot.len(),
            completed_points: plot.current_index(),
            progress: format!("{}/{}", plot.current_index(), plot.len()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.total_points
    }

    pub fn summary(&self) -> String {
        format!(
            "Plot Progress: {} points completed\nCurrent: {}\nUpcoming: {}",
            self.progress,
            self.current_point,
            self.upcoming_points.join(", ")
        )
    }
}

/// Split generator output into at most `max` plot points.
///
/// A JSON array of strings is taken as-is; otherwise each non-empty line is a
/// point, with list markers stripped. An array that does not parse becomes a
/// single point.
pub fn parse_plot_points(raw: &str, max: usize) -> Vec<String> {
    let text = raw.trim();
    let body = fenced_block(text).unwrap_or(text);

    let mut points: Vec<String> = if body.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(body) {
            Ok(items) => items
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "plot list is not a JSON array of strings");
                vec![body.split_whitespace().collect::<Vec<_>>().join(" ")]
            }
        }
    } else {
        body.lines()
            .map(strip_list_marker)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    points.truncate(max);
    points
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

/// Owner of the plot list; persists every change to the game state store.
pub struct PlotEngine {
    plot: PlotList,
    generator: Arc<dyn Generator>,
    assembler: Arc<ContextAssembler>,
    state_store: Arc<dyn GameStateStore>,
    max_new_points: usize,
    context_results: usize,
    temperature: f32,
    max_tokens: Option<usize>,
    timeout: Duration,
}

impl PlotEngine {
    pub fn new(
        generator: Arc<dyn Generator>,
        assembler: Arc<ContextAssembler>,
        state_store: Arc<dyn GameStateStore>,
    ) -> Self {
        Self {
            plot: PlotList::default(),
            generator,
            assembler,
            state_store,
            max_new_points: 3,
            context_results: 3,
            temperature: 0.8,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_limits(mut self, max_new_points: usize, context_results: usize) -> Self {
        self.max_new_points = max_new_points;
        self.context_results = context_results;
        self
    }

    pub fn with_generation(
        mut self,
        temperature: f32,
        max_tokens: Option<usize>,
        timeout: Duration,
    ) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self.timeout = timeout;
        self
    }

    pub fn plot(&self) -> &PlotList {
        &self.plot
    }

    pub fn status(&self) -> PlotStatus {
        PlotStatus::of(&self.plot)
    }

    /// Replace the in-memory plot without touching storage.
    pub fn restore(&mut self, plot: PlotList) {
        self.plot = plot;
    }

    /// Install a fresh plot and record it as `initial_setup`.
    pub async fn install(&mut self, plot: PlotList) -> Result<(), PersistenceError> {
        self.plot = plot;
        self.persist("initial_setup".to_string(), None).await
    }

    /// Complete the active point in response to `action`.
    pub async fn advance(&mut self, action: &str) -> PlotAdvance {
        let index = self.plot.current_index();
        let Some(completed) = self.plot.remove_current() else {
            tracing::debug!(index, "plot complete, advance ignored");
            return PlotAdvance::terminal(index);
        };

        let situation = format!("Plot point {}: {}", index + 1, completed);
        let new_points = self.extend(&situation, action).await;

        self.plot.insert_at_current(&new_points);
        if !new_points.is_empty() {
            self.plot.current_index += 1;
        }

        let current_index = self.plot.current_index();
        tracing::info!(
            completed = %completed,
            added = new_points.len(),
            current_index,
            total = self.plot.len(),
            "plot advanced"
        );

        let persistence_error = self
            .persist(format!("plot_point_{current_index}"), Some(action))
            .await
            .err();

        PlotAdvance {
            completion: Some(CompletionRecord {
                completed_plot: completed,
                player_action: action.to_string(),
            }),
            new_points,
            current_index,
            persistence_error,
        }
    }

    async fn extend(&self, situation: &str, action: &str) -> Vec<String> {
        let episodic = self
            .assembler
            .episodic_context(&format!("{situation} {action}"), self.context_results)
            .await;

        let world_state = match self.state_store.get_latest().await {
            Ok(Some(record)) => Value::Object(record.state.world_state),
            Ok(None) => json!({}),
            Err(e) => {
                tracing::warn!(error = %e, "could not read world state for plot prompt");
                json!({})
            }
        };

        let prompt = format!(
            "Current situation: {situation}\n\
             Player action: {action}\n\
             Current plot points: {points:?}\n\
             World state: {world_state}\n\n\
             Episodic memory context: {episodic}\n\n\
             Based on the player's action and current situation, generate 2-3 new plot points that are:\n\
             1. Relevant to what just happened\n\
             2. Build upon the current story\n\
             3. Provide clear direction for the horror narrative\n\n\
             Generate as a simple list, one per line:",
            points = self.plot.points(),
        );

        let request = GenerationRequest::new(Purpose::PlotExtension, prompt)
            .with_system(PLOT_GENERATOR_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        match generate_within(self.generator.as_ref(), request, self.timeout).await {
            Ok(raw) => parse_plot_points(&raw, self.max_new_points),
            Err(e) => {
                tracing::warn!(error = %e, "plot extension failed, no new points");
                Vec::new()
            }
        }
    }

    /// Write the plot into the latest game state, creating it if needed.
    async fn persist(&self, label: String, action: Option<&str>) -> Result<(), PersistenceError> {
        let latest = self.state_store.get_latest().await?;
        let mut world_state = latest
            .as_ref()
            .map(|r| r.state.world_state.clone())
            .unwrap_or_default();

        world_state.insert(KEY_PLOT_POINTS.to_string(), json!(self.plot.points()));
        world_state.insert(
            KEY_CURRENT_PLOT_INDEX.to_string(),
            json!(self.plot.current_index()),
        );
        world_state.insert(
            KEY_COMPLETED_PLOTS.to_string(),
            json!(format!("Completed {} plot points", self.plot.current_index())),
        );
        if let Some(action) = action {
            world_state.insert(KEY_LAST_ACTION.to_string(), json!(action));
        }

        let result = match latest {
            Some(record) => {
                self.state_store
                    .update(
                        record.id,
                        GameStateUpdate::new()
                            .plot_progress(label)
                            .world_state(world_state),
                    )
                    .await
            }
            None => {
                let mut state = GameState::new(label);
                state.world_state = world_state;
                self.state_store.create(state).await.map(|_| ())
            }
        };

        if let Err(ref e) = result {
            tracing::warn!(error = %e, "failed to persist plot");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryEmbeddingStore, InMemoryStateStore};
    use crate::testing::ScriptedGenerator;

    fn engine(
        generator: ScriptedGenerator,
        plot: PlotList,
    ) -> (PlotEngine, Arc<ScriptedGenerator>, Arc<InMemoryStateStore>) {
        let generator = Arc::new(generator);
        let store = Arc::new(InMemoryEmbeddingStore::new());
        let assembler = Arc::new(ContextAssembler::new(store, 5, 2));
        let states = Arc::new(InMemoryStateStore::new());
        let mut engine = PlotEngine::new(generator.clone(), assembler, states.clone());
        engine.restore(plot);
        (engine, generator, states)
    }

    #[tokio::test]
    async fn test_single_point_with_no_new_points_becomes_terminal() {
        let (mut engine, generator, _) = engine(
            ScriptedGenerator::new().reply(Purpose::PlotExtension, "\n"),
            PlotList::new(["Escape the crypt"]),
        );

        let advance = engine.advance("I climb out").await;
        assert!(advance.new_points.is_empty());
        assert_eq!(advance.completion.unwrap().completed_plot, "Escape the crypt");
        assert!(engine.plot().is_complete());
        assert_eq!(engine.plot().current_index(), engine.plot().len());
        assert_eq!(engine.status().current_point, COMPLETE_LABEL);

        let calls = generator.calls_for(Purpose::PlotExtension);
        for _ in 0..3 {
            let again = engine.advance("I look around").await;
            assert!(again.completion.is_none());
            assert!(engine.status().is_complete());
        }
        assert_eq!(generator.calls_for(Purpose::PlotExtension), calls);
        assert_eq!(engine.plot(), &PlotList { points: vec![], current_index: 0 });
    }

    #[tokio::test]
    async fn test_two_new_points_insert_in_order_and_advance_once() {
        let (mut engine, _, _) = engine(
            ScriptedGenerator::new().reply(Purpose::PlotExtension, "Find the lantern\nLight the altar"),
            PlotList::new(["Enter the chapel", "Meet the priest", "Flee"]),
        );

        let advance = engine.advance("I push the chapel door").await;
        assert_eq!(advance.new_points, vec!["Find the lantern", "Light the altar"]);
        assert_eq!(advance.current_index, 1);
        assert_eq!(
            engine.plot().points(),
            &["Find the lantern", "Light the altar", "Meet the priest", "Flee"]
        );
        assert_eq!(engine.status().current_point, "Light the altar");
        assert_eq!(engine.status().upcoming_points, vec!["Meet the priest", "Flee"]);
    }

    #[tokio::test]
    async fn test_generator_failure_counts_as_no_new_points() {
        let (mut engine, _, _) = engine(
            ScriptedGenerator::new().fail(Purpose::PlotExtension),
            PlotList::new(["Enter the chapel", "Meet the priest"]),
        );

        let advance = engine.advance("I wait").await;
        assert!(advance.new_points.is_empty());
        assert_eq!(engine.plot().current_index(), 0);
        assert_eq!(engine.plot().current(), Some("Meet the priest"));
    }

    #[tokio::test]
    async fn test_new_points_are_truncated_to_three() {
        let (mut engine, _, _) = engine(
            ScriptedGenerator::new().reply(Purpose::PlotExtension, "a\nb\nc\nd\ne"),
            PlotList::new(["start"]),
        );
        let advance = engine.advance("go").await;
        assert_eq!(advance.new_points, vec!["a", "b", "c"]);
        assert_eq!(engine.plot().len(), 3);
    }

    #[tokio::test]
    async fn test_advance_persists_plot() {
        let (mut engine, _, states) = engine(
            ScriptedGenerator::new().reply(Purpose::PlotExtension, "Hide from the hound"),
            PlotList::new(["Cross the moor"]),
        );

        let advance = engine.advance("I run").await;
        assert!(advance.persistence_error.is_none());

        let state = states.get_latest().await.unwrap().unwrap().state;
        assert_eq!(state.plot_progress, "plot_point_1");
        assert_eq!(state.plot_points(), vec!["Hide from the hound".to_string()]);
        assert_eq!(state.current_plot_index(), Some(1));
        assert_eq!(state.world_state[KEY_LAST_ACTION], json!("I run"));
    }

    #[test]
    fn test_parse_plot_points() {
        assert_eq!(
            parse_plot_points("1. Find the key\n\n- Open the vault\n* Escape", 3),
            vec!["Find the key", "Open the vault", "Escape"]
        );
        assert_eq!(
            parse_plot_points(r#"```json
["One", " ", "Two"]
```"#, 3),
            vec!["One", "Two"]
        );
        assert_eq!(parse_plot_points("[broken", 3), vec!["[broken"]);
        assert!(parse_plot_points("   ", 3).is_empty());
    }

    #[test]
    fn test_status_and_summary() {
        let mut plot = PlotList::new(["a", "b", "c", "d", "e"]);
        plot.current_index = 1;
        let status = PlotStatus::of(&plot);
        assert_eq!(status.current_point, "b");
        assert_eq!(status.upcoming_points, vec!["c", "d", "e"]);
        assert_eq!(status.progress, "1/5");
        assert_eq!(
            status.summary(),
            "Plot Progress: 1/5 points completed\nCurrent: b\nUpcoming: c, d, e"
        );
    }

    #[test]
    fn test_restore_clamps_index() {
        let mut state = GameState::new("plot_point_9");
        state.world_state.insert(KEY_PLOT_POINTS.into(), json!(["x", "y"]));
        state.world_state.insert(KEY_CURRENT_PLOT_INDEX.into(), json!(9));
        let plot = PlotList::from_state(&state).unwrap();
        assert!(plot.is_complete());
        assert_eq!(plot.current_index(), 2);
    }

    #[test]
    fn test_from_state_distinguishes_missing_and_finished_plot() {
        let mut state = GameState::new("initial");
        assert!(PlotList::from_state(&state).is_none());

        state.world_state.insert(KEY_PLOT_POINTS.into(), json!([]));
        let finished = PlotList::from_state(&state).unwrap();
        assert!(finished.is_complete());
    }

    #[test]
    fn test_completion_record_turns() {
        let record = CompletionRecord {
            completed_plot: "Open the gate".into(),
            player_action: "I pull the lever".into(),
        };
        let turns = record.to_turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].to_line(), "System: Completed plot point: Open the gate");
        assert_eq!(
            turns[2].text(),
            "Plot point 'Open the gate' completed through action: I pull the lever"
        );
    }
}
