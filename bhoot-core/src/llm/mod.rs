//! Text generation capability.
//!
//! The engine talks to language models only through the [`Generator`] trait.
//! Which provider backs it is decided once at startup by [`select_generator`].

mod anthropic;
mod gemini;
mod openai;
mod select;

pub use anthropic::AnthropicGenerator;
pub use gemini::GeminiGenerator;
pub use openai::OpenAiGenerator;
pub use select::{select_generator, LlmConfig, Provider};

use crate::turn::{Actor, Turn};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors from a generator call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("No generator credentials configured")]
    NoCredentials,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generator returned an empty response")]
    EmptyResponse,

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl From<claude::Error> for GenerationError {
    fn from(e: claude::Error) -> Self {
        match e {
            claude::Error::NoApiKey => GenerationError::NoCredentials,
            claude::Error::Network(msg) => GenerationError::Network(msg),
            claude::Error::Timeout => GenerationError::Provider("request timed out".to_string()),
            claude::Error::Api { status, message } => {
                GenerationError::Provider(format!("status {status}: {message}"))
            }
            claude::Error::Parse(msg) => GenerationError::Malformed(msg),
            claude::Error::Config(msg) => GenerationError::Provider(msg),
        }
    }
}

/// What a generation request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Narration,
    PlotExtension,
    Summary,
    OpeningScene,
    Welcome,
    RecallQuery,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Purpose::Narration => "narration",
            Purpose::PlotExtension => "plot_extension",
            Purpose::Summary => "summary",
            Purpose::OpeningScene => "opening_scene",
            Purpose::Welcome => "welcome",
            Purpose::RecallQuery => "recall_query",
        };
        f.write_str(name)
    }
}

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub purpose: Purpose,
    pub system: Option<String>,
    pub prior_turns: Vec<Turn>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl GenerationRequest {
    pub fn new(purpose: Purpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            system: None,
            prior_turns: Vec::new(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = (!system.trim().is_empty()).then_some(system);
        self
    }

    pub fn with_prior_turns(mut self, turns: Vec<Turn>) -> Self {
        self.prior_turns = turns;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Call `generator`, bounded by `timeout`, rejecting blank output.
pub async fn generate_within(
    generator: &dyn Generator,
    request: GenerationRequest,
    timeout: Duration,
) -> Result<String, GenerationError> {
    let purpose = request.purpose;
    tracing::debug!(generator = generator.name(), %purpose, "generation request");

    let text = tokio::time::timeout(timeout, generator.generate(request))
        .await
        .map_err(|_| GenerationError::Timeout(timeout))??;

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

/// Speaker in a two-party chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChatRole {
    User,
    Model,
}

/// Fold history plus the prompt into messages that open with the user and
/// strictly alternate.
///
/// System notes become user text. Consecutive messages from the same side
/// are joined with a blank line and leading model messages are dropped.
pub(crate) fn alternating(turns: &[Turn], prompt: &str) -> Vec<(ChatRole, String)> {
    let history = turns.iter().map(|turn| match turn.actor() {
        Actor::Narrator => (ChatRole::Model, turn.text().to_string()),
        Actor::Player => (ChatRole::User, turn.text().to_string()),
        Actor::System => (ChatRole::User, format!("[{}] {}", Actor::System, turn.text())),
    });

    let mut messages: Vec<(ChatRole, String)> = Vec::new();
    for (role, text) in history.chain(std::iter::once((ChatRole::User, prompt.to_string()))) {
        if messages.is_empty() && role == ChatRole::Model {
            continue;
        }
        match messages.last_mut() {
            Some((last, existing)) if *last == role => {
                existing.push_str("\n\n");
                existing.push_str(&text);
            }
            _ => messages.push((role, text)),
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    struct Stalled;

    #[async_trait]
    impl Generator for Stalled {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_generation_error() {
        let request = GenerationRequest::new(Purpose::Narration, "hello");
        let result = generate_within(&Stalled, request, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_blank_output_is_empty_response() {
        let generator = ScriptedGenerator::new().reply(Purpose::Narration, "   ");
        let request = GenerationRequest::new(Purpose::Narration, "hello");
        let result = generate_within(&generator, request, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GenerationError::EmptyResponse)));
    }

    #[test]
    fn test_alternating_merges_runs_and_drops_leading_model() {
        let turns = vec![
            Turn::narrator("The gate swings open"),
            Turn::player("I enter"),
            Turn::narrator("Fog swallows you"),
            Turn::system("Completed plot point: enter the grounds"),
            Turn::player("I keep walking"),
        ];
        let messages = alternating(&turns, "What do I see?");

        let roles: Vec<_> = messages.iter().map(|(role, _)| *role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model, ChatRole::User]);
        assert_eq!(messages[0].1, "I enter");
        assert_eq!(
            messages[2].1,
            "[System] Completed plot point: enter the grounds\n\nI keep walking\n\nWhat do I see?"
        );
    }

    #[test]
    fn test_alternating_without_history_is_the_prompt() {
        let messages = alternating(&[Turn::narrator("Welcome back.")], "hello");
        assert_eq!(messages, vec![(ChatRole::User, "hello".to_string())]);
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let request = GenerationRequest::new(Purpose::Summary, "x").with_system("  ");
        assert!(request.system.is_none());
    }
}
