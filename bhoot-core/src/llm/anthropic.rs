//! Claude-backed generator.

use super::{alternating, ChatRole, GenerationError, GenerationRequest, Generator};
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use std::time::Duration;

const DEFAULT_MAX_TOKENS: usize = 1000;

/// Generator backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: Claude,
    timeout: Duration,
}

impl AnthropicGenerator {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let mut client = Claude::with_timeout(api_key, timeout)?;
        if let Some(model) = model {
            client = client.with_model(model);
        }
        Ok(Self { client, timeout })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Claude, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Send requests to a proxy or compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(base_url);
        self
    }
}

/// The Messages API has no system role inside the conversation and rejects
/// histories that open with the assistant or repeat a role.
fn to_messages(request: &GenerationRequest) -> Vec<Message> {
    alternating(&request.prior_turns, &request.prompt)
        .into_iter()
        .map(|(role, text)| match role {
            ChatRole::User => Message::user(text),
            ChatRole::Model => Message::assistant(text),
        })
        .collect()
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let mut api_request = Request::new(to_messages(&request))
            .with_max_tokens(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .with_temperature(request.temperature);
        if let Some(system) = request.system {
            api_request = api_request.with_system(system);
        }

        let response = self.client.complete(api_request).await.map_err(|e| match e {
            claude::Error::Timeout => GenerationError::Timeout(self.timeout),
            other => other.into(),
        })?;

        if response.truncated {
            tracing::warn!(purpose = %request.purpose, model = %response.model, "reply cut off at max_tokens");
        }
        Ok(response.text())
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Purpose;
    use crate::turn::Turn;
    use claude::Role;

    #[test]
    fn test_to_messages_roles() {
        let request = GenerationRequest::new(Purpose::Narration, "What now?").with_prior_turns(vec![
            Turn::player("I open the crypt"),
            Turn::narrator("Dust rises"),
            Turn::system("Completed plot point: enter the crypt"),
        ]);
        let messages = to_messages(&request);
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert!(messages[2].text.starts_with("[System]"));
        assert!(messages[2].text.ends_with("What now?"));
    }

    #[test]
    fn test_restored_history_opening_with_narrator_is_accepted() {
        let request = GenerationRequest::new(Purpose::Narration, "I wait").with_prior_turns(vec![
            Turn::narrator("The bell tolls"),
            Turn::player("I listen"),
            Turn::player("I listen harder"),
        ]);
        let messages = to_messages(&request);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "I listen\n\nI listen harder\n\nI wait");
    }

    #[test]
    fn test_base_url_reaches_client() {
        let generator = AnthropicGenerator::new("k", None, Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:8080/");
        let debug = format!("{generator:?}");
        assert!(debug.contains("base_url: \"http://localhost:8080\""));
    }
}
