//! Narrative memory and context engine for an AI horror Dungeon Master.
//!
//! This crate provides:
//! - Short-term conversation memory with batched long-term compaction
//! - Threshold-gated episodic memory
//! - Retrieval-grounded context assembly over an embedding store
//! - A self-extending plot state machine
//! - File-backed game state and conversation log persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use bhoot_core::{GameSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_env()?.with_lore_path("lore.txt");
//!     let mut session = GameSession::start(config).await?;
//!
//!     println!("{}", session.welcome().await);
//!     let response = session.player_action("I light the candle").await?;
//!     println!("{}", response.text);
//!
//!     session.end(false).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod llm;
pub mod lore;
pub mod memory;
pub mod narrator;
pub mod plot;
pub mod reply;
pub mod session;
pub mod store;
pub mod testing;
pub mod turn;

// Primary public API
pub use config::{ConfigError, EngineConfig};
pub use context::ContextAssembler;
pub use llm::{GenerationError, GenerationRequest, Generator, LlmConfig, Provider, Purpose};
pub use memory::{EpisodicMemoryGate, ShortTermBuffer, Summarizer, SummaryStyle};
pub use narrator::{Narrator, NarratorError, NarratorResponse};
pub use plot::{PlotEngine, PlotList, PlotStatus};
pub use session::{GameSession, SessionConfig, SessionError};
pub use store::{PersistenceError, RetrievalError, Stores};
pub use testing::{FlakyEmbeddingStore, ScriptedGenerator, TestHarness};
pub use turn::{Actor, Turn};
