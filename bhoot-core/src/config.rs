//! Engine configuration.

use crate::memory::SummaryStyle;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. These are fatal and reported before play begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("No API keys found for any generator provider")]
    NoCredentials,

    #[error("Generator setup failed: {0}")]
    Generator(String),
}

/// The opening plot of a fresh session.
pub const INITIAL_PLOT: [&str; 5] = [
    "Player awakens in a mysterious, cursed location",
    "Discover the nature of the horror realm",
    "Encounter first supernatural entity or phenomenon",
    "Find a way to navigate the dangerous environment",
    "Uncover clues about the curse or dark forces at work",
];

/// Tunables for the narrative engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the short-term buffer and of the compaction stack.
    pub buffer_capacity: usize,

    /// Interactions recorded before the episodic gate commits a memory.
    pub episodic_threshold: usize,

    /// Semantic matches included in the grounding context.
    pub world_results: usize,

    /// Episodic matches included in the grounding context.
    pub episodic_results: usize,

    /// Episodic matches included in plot extension prompts.
    pub plot_context_results: usize,

    /// Upper bound on plot points accepted per advance.
    pub max_new_plot_points: usize,

    /// Word window for lore chunking.
    pub chunk_window: usize,

    /// Words shared between consecutive lore chunks.
    pub chunk_overlap: usize,

    /// Temperature for narration and plot generation.
    pub temperature: f32,

    /// Maximum tokens per generation, provider default when unset.
    pub max_tokens: Option<usize>,

    /// Deadline for any single generator call.
    pub generation_timeout: Duration,

    /// Consecutive persistence failures tolerated before responses carry a warning.
    pub persistence_failure_limit: u32,

    /// How compaction batches are summarized.
    pub summary_style: SummaryStyle,

    /// Plot points installed at the start of a fresh session.
    pub initial_plot: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10,
            episodic_threshold: 20,
            world_results: 5,
            episodic_results: 2,
            plot_context_results: 3,
            max_new_plot_points: 3,
            chunk_window: 50,
            chunk_overlap: 10,
            temperature: 0.8,
            max_tokens: None,
            generation_timeout: Duration::from_secs(60),
            persistence_failure_limit: 3,
            summary_style: SummaryStyle::Transcript,
            initial_plot: INITIAL_PLOT.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `BHOOT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `BHOOT_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = Overrides(lookup);
        let mut config = Self::default();
        overrides.apply("BHOOT_BUFFER_CAPACITY", &mut config.buffer_capacity)?;
        overrides.apply("BHOOT_EPISODIC_THRESHOLD", &mut config.episodic_threshold)?;
        overrides.apply("BHOOT_WORLD_RESULTS", &mut config.world_results)?;
        overrides.apply("BHOOT_EPISODIC_RESULTS", &mut config.episodic_results)?;
        overrides.apply("BHOOT_PLOT_CONTEXT_RESULTS", &mut config.plot_context_results)?;
        overrides.apply("BHOOT_MAX_NEW_PLOT_POINTS", &mut config.max_new_plot_points)?;
        overrides.apply("BHOOT_CHUNK_WINDOW", &mut config.chunk_window)?;
        overrides.apply("BHOOT_CHUNK_OVERLAP", &mut config.chunk_overlap)?;
        overrides.apply("BHOOT_TEMPERATURE", &mut config.temperature)?;
        overrides.apply(
            "BHOOT_PERSISTENCE_FAILURE_LIMIT",
            &mut config.persistence_failure_limit,
        )?;

        let mut timeout_secs = config.generation_timeout.as_secs();
        overrides.apply("BHOOT_GENERATION_TIMEOUT_SECS", &mut timeout_secs)?;
        config.generation_timeout = Duration::from_secs(timeout_secs);

        if overrides.get("BHOOT_MAX_TOKENS").is_some() {
            let mut max_tokens = 0usize;
            overrides.apply("BHOOT_MAX_TOKENS", &mut max_tokens)?;
            config.max_tokens = Some(max_tokens);
        }

        if let Some(style) = overrides.get("BHOOT_SUMMARY_STYLE") {
            config.summary_style = match style.to_lowercase().as_str() {
                "transcript" => SummaryStyle::Transcript,
                "generated" => SummaryStyle::Generated,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "BHOOT_SUMMARY_STYLE".to_string(),
                        value: style,
                    })
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", self.buffer_capacity));
        }
        if self.episodic_threshold == 0 {
            return Err(invalid("episodic_threshold", self.episodic_threshold));
        }
        if self.chunk_window == 0 || self.chunk_overlap >= self.chunk_window {
            return Err(invalid(
                "chunk_overlap",
                format!("{} (window {})", self.chunk_overlap, self.chunk_window),
            ));
        }
        Ok(())
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_episodic_threshold(mut self, threshold: usize) -> Self {
        self.episodic_threshold = threshold;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_persistence_failure_limit(mut self, limit: u32) -> Self {
        self.persistence_failure_limit = limit;
        self
    }

    pub fn with_summary_style(mut self, style: SummaryStyle) -> Self {
        self.summary_style = style;
        self
    }

    pub fn with_initial_plot<I, S>(mut self, plot: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_plot = plot.into_iter().map(Into::into).collect();
        self
    }
}

/// Blank values count as unset.
struct Overrides<F>(F);

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    }

    fn apply<T: FromStr>(&self, key: &str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = self.get(key) {
            *target = raw.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_capacity, 10);
        assert_eq!(config.episodic_threshold, 20);
        assert_eq!(config.world_results, 5);
        assert_eq!(config.chunk_window, 50);
        assert_eq!(config.chunk_overlap, 10);
        assert_eq!(config.initial_plot.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_buffer_capacity(3)
            .with_episodic_threshold(2)
            .with_initial_plot(["Find the key"]);
        assert_eq!(config.buffer_capacity, 3);
        assert_eq!(config.episodic_threshold, 2);
        assert_eq!(config.initial_plot, vec!["Find the key".to_string()]);
    }

    #[test]
    fn test_validate_rejects_overlap_wider_than_window() {
        let mut config = EngineConfig::default();
        config.chunk_overlap = 50;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig::default().with_buffer_capacity(0);
        assert!(config.validate().is_err());
    }

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_lookup_overrides_plot_and_token_knobs() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("BHOOT_MAX_NEW_PLOT_POINTS", "5"),
            ("BHOOT_PLOT_CONTEXT_RESULTS", " 1 "),
            ("BHOOT_MAX_TOKENS", "800"),
            ("BHOOT_SUMMARY_STYLE", "Generated"),
        ]))
        .unwrap();
        assert_eq!(config.max_new_plot_points, 5);
        assert_eq!(config.plot_context_results, 1);
        assert_eq!(config.max_tokens, Some(800));
        assert_eq!(config.summary_style, SummaryStyle::Generated);
        assert_eq!(config.buffer_capacity, 10);
    }

    #[test]
    fn test_blank_override_keeps_default() {
        let config = EngineConfig::from_lookup(lookup(&[("BHOOT_MAX_TOKENS", "  ")])).unwrap();
        assert_eq!(config.max_tokens, None);
    }

    #[test]
    fn test_unparsable_override_names_its_key() {
        let result = EngineConfig::from_lookup(lookup(&[("BHOOT_MAX_TOKENS", "lots")]));
        match result {
            Err(ConfigError::Invalid { key, value }) => {
                assert_eq!(key, "BHOOT_MAX_TOKENS");
                assert_eq!(value, "lots");
            }
            other => panic!("expected invalid config, got {other:?}"),
        }
    }
}
