//! The narrator: one player interaction end to end.
//!
//! [`Narrator::respond_to_player`] runs the full cycle: assemble context,
//! generate, record both turns in short-term and episodic memory, then
//! advance the plot. A generation failure aborts the cycle before any memory
//! or plot state is touched, so the player can simply retry.

use crate::config::EngineConfig;
use crate::context::{ContextAssembler, NO_SPECIFIC_CONTEXT};
use crate::llm::{generate_within, GenerationError, GenerationRequest, Generator, Purpose};
use crate::memory::{AppendOutcome, EpisodicMemoryGate, GateOutcome, ShortTermBuffer, Summarizer};
use crate::plot::{PlotAdvance, PlotEngine, PlotList, PlotStatus};
use crate::reply::parse_reply_or_raw;
use crate::store::{
    ConversationLog, GameState, GameStateStore, GameStateUpdate, LogEntry, PersistenceError, Stores,
    KEY_CURRENT_LOCATION,
};
use crate::turn::{transcript, Actor, Turn};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const NARRATOR_PROMPT: &str = include_str!("prompts/narrator_system.txt");
const OPENING_SCENE_PROMPT: &str = include_str!("prompts/opening_scene.txt");
const WELCOME_PROMPT: &str = include_str!("prompts/welcome.txt");
const RECALL_QUERY_PROMPT: &str = include_str!("prompts/recall_query.txt");

/// Retrieval query used to ground the opening scene.
pub const OPENING_SCENE_QUERY: &str = "castle entrance horror awakening";

/// Shown when the welcome message cannot be generated.
pub const FALLBACK_WELCOME: &str = "The darkness welcomes you, foolish mortal. You have stumbled into a realm where nightmares take form and sanity is a distant memory. The air itself seems to pulse with malevolent energy, and you can feel the weight of countless eyes watching your every move from the shadows.\n\nDo you investigate the ominous sounds to your left, or approach the flickering light to your right?";

const FIRST_VISIT: &str = "Welcome to a mysterious world. This is your first interaction here.";

#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("The narrator could not respond: {0}")]
    Generation(#[from] GenerationError),
}

/// Result of a successful interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarratorResponse {
    /// Text to show the player, verbatim.
    pub text: String,
    /// One-line description of what happened.
    pub interaction: String,
    /// Present while storage has been failing repeatedly.
    pub warning: Option<String>,
}

/// Counts consecutive interactions with at least one storage failure.
#[derive(Debug, Clone)]
struct PersistenceHealth {
    consecutive_failures: u32,
    limit: u32,
    failed_this_round: bool,
}

impl PersistenceHealth {
    fn new(limit: u32) -> Self {
        Self {
            consecutive_failures: 0,
            limit: limit.max(1),
            failed_this_round: false,
        }
    }

    fn note<E: std::fmt::Display>(&mut self, operation: &str, result: Result<(), E>) {
        if let Err(e) = result {
            self.failed_this_round = true;
            tracing::warn!(operation, error = %e, "persistence failure");
        }
    }

    /// Close out one interaction.
    fn settle(&mut self) {
        if self.failed_this_round {
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        self.failed_this_round = false;
    }

    fn warning(&self) -> Option<String> {
        (self.consecutive_failures >= self.limit).then(|| {
            format!(
                "Game progress is not being saved ({} storage failures in a row).",
                self.consecutive_failures
            )
        })
    }
}

/// Session-scoped orchestrator of memory, retrieval and plot.
pub struct Narrator {
    config: EngineConfig,
    generator: Arc<dyn Generator>,
    stores: Stores,
    assembler: Arc<ContextAssembler>,
    buffer: ShortTermBuffer,
    gate: EpisodicMemoryGate,
    plot: PlotEngine,
    lore: String,
    session_id: String,
    health: PersistenceHealth,
}

impl Narrator {
    /// Open a session against `stores`.
    ///
    /// Creates the default game state and installs the initial plot when the
    /// store is empty, otherwise restores the saved plot. The short-term
    /// buffer is refilled from the newest conversation log entries.
    pub async fn start(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        stores: Stores,
        lore: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let mut assembler = ContextAssembler::new(
            stores.embeddings.clone(),
            config.world_results,
            config.episodic_results,
        );
        if let Some(ref catalog) = stores.catalog {
            assembler = assembler.with_catalog(catalog.clone());
        }
        let assembler = Arc::new(assembler);

        let summarizer = Summarizer::new(stores.embeddings.clone())
            .with_generator(generator.clone(), config.generation_timeout)
            .with_style(config.summary_style);
        let mut buffer = ShortTermBuffer::new(config.buffer_capacity, summarizer);
        let gate = EpisodicMemoryGate::new(stores.embeddings.clone(), config.episodic_threshold);
        let mut plot = PlotEngine::new(generator.clone(), assembler.clone(), stores.state.clone())
            .with_limits(config.max_new_plot_points, config.plot_context_results)
            .with_generation(config.temperature, config.max_tokens, config.generation_timeout);

        let existing = stores.state.get_latest().await?;
        let session_id = match existing {
            Some(ref record) => record
                .state
                .session_data
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| record.id.to_string()),
            None => {
                let session_id = Uuid::new_v4().to_string();
                stores.state.create(default_state(&session_id)).await?;
                tracing::info!(%session_id, "new game state created");
                session_id
            }
        };

        match existing.as_ref().and_then(|r| PlotList::from_state(&r.state)) {
            Some(saved) => {
                tracing::info!(
                    current_index = saved.current_index(),
                    total = saved.len(),
                    "plot restored"
                );
                plot.restore(saved);
            }
            None => plot.install(PlotList::new(config.initial_plot.clone())).await?,
        }

        let recent = stores.log.recent(config.buffer_capacity, None).await?;
        buffer.restore(recent.iter().rev().map(LogEntry::to_turn));

        let health = PersistenceHealth::new(config.persistence_failure_limit);
        Ok(Self {
            config,
            generator,
            stores,
            assembler,
            buffer,
            gate,
            plot,
            lore: lore.into(),
            session_id,
            health,
        })
    }

    /// Respond to one line of player input.
    pub async fn respond_to_player(
        &mut self,
        input: &str,
    ) -> Result<NarratorResponse, NarratorError> {
        let state = self.current_state().await;
        let context = self.assembler.assemble(input, state.as_ref()).await;

        let plot_point = self.plot.plot().current().unwrap_or("Plot complete");
        let prompt = format!(
            "Context: {context}\n\nCurrent plot point: {plot_point}\n\nPlayer says: {input}"
        );
        let request = GenerationRequest::new(Purpose::Narration, prompt)
            .with_system(NARRATOR_PROMPT)
            .with_prior_turns(self.buffer.snapshot())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let raw = generate_within(
            self.generator.as_ref(),
            request,
            self.config.generation_timeout,
        )
        .await?;
        let reply = parse_reply_or_raw(&raw);

        let player = Turn::player(input);
        let narrator = Turn::narrator(reply.response_text.clone());
        self.log_turns(&[&player, &narrator]).await;
        let exchange = [player.clone(), narrator.clone()];

        for turn in [player, narrator] {
            if let AppendOutcome::CompactionFailed { pending } = self.buffer.append(turn).await {
                tracing::debug!(pending, "compaction deferred");
            }
        }

        if let GateOutcome::Committed { fragment_id } = self.gate.record(&exchange).await {
            tracing::debug!(%fragment_id, "interaction archived");
        }

        let advance = self.plot.advance(input).await;
        self.archive_completion(advance).await;
        self.health.settle();

        Ok(NarratorResponse {
            text: reply.response_text,
            interaction: reply.interaction_description,
            warning: self.health.warning(),
        })
    }

    /// Welcome shown when a session opens.
    ///
    /// A fresh session is grounded in the raw lore text; a resumed one in
    /// context retrieved for a summary of the latest log entries.
    pub async fn welcome(&self) -> String {
        let recent = match self.stores.log.recent(self.config.buffer_capacity, None).await {
            Ok(recent) => recent,
            Err(e) => {
                tracing::warn!(error = %e, "could not read conversation log for welcome");
                Vec::new()
            }
        };

        let grounding = if recent.is_empty() {
            self.lore_grounding()
        } else {
            let query = self.recall_query(&recent).await;
            let state = self.current_state().await;
            self.assembler.assemble(&query, state.as_ref()).await
        };

        let request = GenerationRequest::new(
            Purpose::Welcome,
            format!(
                "World Context:\n{grounding}\n\nGenerate an opening message that welcomes the player to this horror realm and immediately presents them with their first terrifying choice."
            ),
        )
        .with_system(WELCOME_PROMPT)
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        match generate_within(self.generator.as_ref(), request, self.config.generation_timeout)
            .await
        {
            Ok(raw) => parse_reply_or_raw(&raw).response_text,
            Err(e) => {
                tracing::warn!(error = %e, "welcome generation failed, using fallback");
                FALLBACK_WELCOME.to_string()
            }
        }
    }

    /// A short atmospheric opening scene.
    pub async fn opening_scene(&self) -> Result<String, NarratorError> {
        let state = self.current_state().await;
        let context = self.assembler.assemble(OPENING_SCENE_QUERY, state.as_ref()).await;

        let prompt = format!(
            "Context: {context}\n\n\
             Create a brief, atmospheric opening scene for a horror RPG set in Dracula's castle. \
             Keep it concise (2-3 sentences maximum).\n\n\
             Focus on the immediate surroundings and the player's disorientation. \
             End with: Say 'start' to begin your nightmare."
        );
        let request = GenerationRequest::new(Purpose::OpeningScene, prompt)
            .with_system(OPENING_SCENE_PROMPT)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let text =
            generate_within(self.generator.as_ref(), request, self.config.generation_timeout)
                .await?;
        Ok(text.trim().to_string())
    }

    /// Move the player to `location_id`; later context includes it.
    pub async fn enter_location(&mut self, location_id: &str) -> Result<(), PersistenceError> {
        let result = self.write_location(location_id).await;
        self.health.note("enter_location", result.as_ref().map(|_| ()));
        self.health.settle();
        result
    }

    async fn write_location(&self, location_id: &str) -> Result<(), PersistenceError> {
        let record = self
            .stores
            .state
            .get_latest()
            .await?
            .ok_or_else(|| PersistenceError::NotFound("game state".to_string()))?;
        let mut session_data = record.state.session_data;
        session_data.insert(KEY_CURRENT_LOCATION.to_string(), json!(location_id));
        self.stores
            .state
            .update(record.id, GameStateUpdate::new().session_data(session_data))
            .await
    }

    /// Close the session, optionally emptying every store.
    pub async fn end_session(&mut self, purge: bool) -> Result<(), PersistenceError> {
        if purge {
            self.stores.purge().await?;
        }
        self.buffer.clear();
        self.gate.reset();
        tracing::info!(session_id = %self.session_id, purge, "session ended");
        Ok(())
    }

    pub fn plot_status(&self) -> PlotStatus {
        self.plot.status()
    }

    pub fn plot_summary(&self) -> String {
        self.plot.status().summary()
    }

    pub fn is_plot_complete(&self) -> bool {
        self.plot.plot().is_complete()
    }

    pub fn buffer(&self) -> &ShortTermBuffer {
        &self.buffer
    }

    pub fn gate(&self) -> &EpisodicMemoryGate {
        &self.gate
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Consecutive storage failures so far.
    pub fn persistence_failures(&self) -> u32 {
        self.health.consecutive_failures
    }

    async fn current_state(&self) -> Option<GameState> {
        match self.stores.state.get_latest().await {
            Ok(record) => record.map(|r| r.state),
            Err(e) => {
                tracing::warn!(error = %e, "could not read game state");
                None
            }
        }
    }

    async fn log_turns(&mut self, turns: &[&Turn]) {
        let log: &dyn ConversationLog = self.stores.log.as_ref();
        let mut result = Ok(());
        for turn in turns {
            if let Err(e) = log.append(LogEntry::from(*turn)).await {
                result = Err(e);
                break;
            }
        }
        self.health.note("conversation_log", result);
    }

    async fn archive_completion(&mut self, advance: PlotAdvance) {
        if let Some(error) = advance.persistence_error {
            self.health.note("plot", Err(error));
        }

        if let Some(completion) = advance.completion {
            self.gate.record(&completion.to_turns()).await;
        }
    }

    fn lore_grounding(&self) -> String {
        let lore = self.lore.trim();
        if lore.is_empty() {
            return FIRST_VISIT.to_string();
        }
        format!(
            "Initial World Context:\n\n{lore}\n\nThis is your first interaction with this world. Use this context to establish the setting and atmosphere."
        )
    }

    /// Summarize recent log entries into a retrieval query.
    async fn recall_query(&self, recent: &[LogEntry]) -> String {
        let turns: Vec<Turn> = recent.iter().rev().map(LogEntry::to_turn).collect();
        let fallback = recent
            .iter()
            .find(|e| e.actor == Actor::Player)
            .or_else(|| recent.first())
            .map(|e| e.text.clone())
            .unwrap_or_else(|| NO_SPECIFIC_CONTEXT.to_string());

        let request = GenerationRequest::new(
            Purpose::RecallQuery,
            format!("Summarize this conversation context:\n{}", transcript(&turns)),
        )
        .with_system(RECALL_QUERY_PROMPT)
        .with_temperature(0.3);

        match generate_within(self.generator.as_ref(), request, self.config.generation_timeout)
            .await
        {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "recall summary failed, using latest player input");
                fallback
            }
        }
    }
}

fn default_state(session_id: &str) -> GameState {
    let mut state = GameState::new("initial");
    state.session_data.insert("session_id".into(), json!(session_id));
    state.session_data.insert("started".into(), json!(Utc::now().to_rfc3339()));
    state.session_data.insert("interaction_count".into(), json!(0));
    state.world_state.insert("initialized".into(), json!(true));
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_persistence_health_warns_at_limit() {
        let mut health = PersistenceHealth::new(2);
        let down = || Err(PersistenceError::Backend("down".into()));

        health.note("log", down());
        health.note("plot", down());
        health.settle();
        assert!(health.warning().is_none());

        health.note("log", down());
        health.note::<PersistenceError>("plot", Ok(()));
        health.settle();
        assert!(health.warning().unwrap().contains("2 storage failures"));

        health.settle();
        assert!(health.warning().is_none());
    }

    #[test]
    fn test_default_state_shape() {
        let state = default_state("s1");
        assert_eq!(state.plot_progress, "initial");
        assert_eq!(state.session_data["session_id"], json!("s1"));
        assert_eq!(state.session_data["interaction_count"], json!(0));
        assert_eq!(state.world_state["initialized"], json!(true));
    }

    #[tokio::test]
    async fn test_start_installs_initial_plot() {
        let stores = Stores::in_memory();
        let narrator = Narrator::start(
            EngineConfig::default(),
            Arc::new(ScriptedGenerator::new()),
            stores.clone(),
            "",
        )
        .await
        .unwrap();

        assert_eq!(narrator.plot_status().total_points, 5);
        let state = stores.state.get_latest().await.unwrap().unwrap().state;
        assert_eq!(state.plot_progress, "initial_setup");
        assert_eq!(state.plot_points().len(), 5);
        assert_eq!(state.world_state["initialized"], json!(true));
        assert!(!narrator.session_id().is_empty());
    }

    #[tokio::test]
    async fn test_opening_scene_uses_fixed_query() {
        let generator = Arc::new(
            ScriptedGenerator::new().reply(Purpose::OpeningScene, "  Mist coils around you.  "),
        );
        let narrator = Narrator::start(
            EngineConfig::default(),
            generator.clone(),
            Stores::in_memory(),
            "",
        )
        .await
        .unwrap();

        assert_eq!(narrator.opening_scene().await.unwrap(), "Mist coils around you.");
        let request = generator.last_request(Purpose::OpeningScene).unwrap();
        assert!(request.prompt.contains("Say 'start' to begin your nightmare."));
    }
}
