//! Startup-time provider selection.

use super::{AnthropicGenerator, GeminiGenerator, GenerationError, Generator, OpenAiGenerator};
use crate::config::ConfigError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Supported generator providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            other => Err(ConfigError::Invalid {
                key: "LLM_PROVIDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Credentials and model choices for the generator.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Provider to prefer when its credentials are present.
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_model: Option<String>,
    pub gemini_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
}

impl LlmConfig {
    /// Read `LLM_PROVIDER` (default `openai`), the `*_API_KEY` and `*_MODEL`
    /// variables of each provider, `OPENAI_BASE_URL` and `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match non_empty_env("LLM_PROVIDER") {
            Some(value) => value.parse()?,
            None => Provider::default(),
        };

        Ok(Self {
            provider,
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            gemini_api_key: non_empty_env("GEMINI_API_KEY"),
            openai_model: non_empty_env("OPENAI_MODEL"),
            anthropic_model: non_empty_env("ANTHROPIC_MODEL"),
            gemini_model: non_empty_env("GEMINI_MODEL"),
            openai_base_url: non_empty_env("OPENAI_BASE_URL"),
            anthropic_base_url: non_empty_env("ANTHROPIC_BASE_URL"),
        })
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_anthropic_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    pub fn with_gemini_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    /// The provider that will actually be used: the preferred one if it has
    /// credentials, otherwise the first of OpenAI, Anthropic and Gemini that
    /// does.
    pub fn resolve_provider(&self) -> Option<Provider> {
        let available = |p: Provider| match p {
            Provider::OpenAi => self.openai_api_key.is_some(),
            Provider::Anthropic => self.anthropic_api_key.is_some(),
            Provider::Gemini => self.gemini_api_key.is_some(),
        };

        [
            self.provider,
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::Gemini,
        ]
        .into_iter()
        .find(|p| available(*p))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Build the session's single generator.
pub fn select_generator(
    config: &LlmConfig,
    timeout: Duration,
) -> Result<Arc<dyn Generator>, ConfigError> {
    let provider = config.resolve_provider().ok_or(ConfigError::NoCredentials)?;
    if provider != config.provider {
        tracing::warn!(
            preferred = ?config.provider,
            selected = ?provider,
            "preferred provider has no credentials, falling back"
        );
    }

    let generator: Arc<dyn Generator> = match provider {
        Provider::Anthropic => {
            let key = config.anthropic_api_key.clone().ok_or(ConfigError::NoCredentials)?;
            let mut generator =
                AnthropicGenerator::new(key, config.anthropic_model.clone(), timeout)
                    .map_err(generator_setup)?;
            if let Some(ref base_url) = config.anthropic_base_url {
                generator = generator.with_base_url(base_url);
            }
            Arc::new(generator)
        }
        Provider::OpenAi => {
            let key = config.openai_api_key.clone().ok_or(ConfigError::NoCredentials)?;
            let mut generator = OpenAiGenerator::new(key, config.openai_model.clone(), timeout)
                .map_err(generator_setup)?;
            if let Some(ref base_url) = config.openai_base_url {
                generator = generator.with_base_url(base_url);
            }
            Arc::new(generator)
        }
        Provider::Gemini => {
            let key = config.gemini_api_key.clone().ok_or(ConfigError::NoCredentials)?;
            Arc::new(
                GeminiGenerator::new(key, config.gemini_model.clone(), timeout)
                    .map_err(generator_setup)?,
            )
        }
    };

    tracing::info!(provider = generator.name(), "generator selected");
    Ok(generator)
}

fn generator_setup(e: GenerationError) -> ConfigError {
    ConfigError::Generator(e.to_string())
}
