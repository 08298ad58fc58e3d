//! Parsing structured narrator output.
//!
//! The narrator is asked for `{"response_text": ..., "interaction_description": ...}`.
//! Models often wrap that in prose or code fences, so parsing is strict
//! first and lenient second; anything unparseable falls back to the raw text.

use serde::Deserialize;
use thiserror::Error;

/// Interaction description used when the model gives none.
pub const DEFAULT_INTERACTION: &str = "User interaction with the world";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON object found in response")]
    NoJson,

    #[error("Invalid reply JSON: {0}")]
    InvalidJson(String),
}

/// A narrator reply split into player-facing text and a memory note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarratorReply {
    pub response_text: String,
    pub interaction_description: String,
}

impl NarratorReply {
    /// Treat `raw` as the whole response.
    pub fn raw(raw: &str) -> Self {
        Self {
            response_text: raw.trim().to_string(),
            interaction_description: DEFAULT_INTERACTION.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ReplyJson {
    response_text: String,
    #[serde(default)]
    interaction_description: Option<String>,
}

impl ReplyJson {
    fn into_reply(self) -> Result<NarratorReply, ParseError> {
        let response_text = self.response_text.trim().to_string();
        if response_text.is_empty() {
            return Err(ParseError::InvalidJson("empty response_text".to_string()));
        }
        let interaction_description = self
            .interaction_description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_INTERACTION.to_string());
        Ok(NarratorReply {
            response_text,
            interaction_description,
        })
    }
}

/// Parse a reply: the whole text as JSON, then a fenced block, then the span
/// from the first `{` to the last `}`.
pub fn parse_reply(raw: &str) -> Result<NarratorReply, ParseError> {
    let text = raw.trim();

    if let Ok(parsed) = serde_json::from_str::<ReplyJson>(text) {
        return parsed.into_reply();
    }

    let mut last_error = ParseError::NoJson;
    for candidate in [fenced_block(text), brace_span(text)].into_iter().flatten() {
        match serde_json::from_str::<ReplyJson>(candidate) {
            Ok(parsed) => return parsed.into_reply(),
            Err(e) => last_error = ParseError::InvalidJson(e.to_string()),
        }
    }
    Err(last_error)
}

/// [`parse_reply`], falling back to the raw text.
pub fn parse_reply_or_raw(raw: &str) -> NarratorReply {
    parse_reply(raw).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "narrator reply not structured, using raw text");
        NarratorReply::raw(raw)
    })
}

/// Contents of the first ```` ``` ```` block, with or without a `json` tag.
pub(crate) fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json() {
        let reply = parse_reply(
            r#"{"response_text": "The door creaks.", "interaction_description": "Opened door"}"#,
        )
        .unwrap();
        assert_eq!(reply.response_text, "The door creaks.");
        assert_eq!(reply.interaction_description, "Opened door");
    }

    #[test]
    fn test_fenced_json() {
        let raw = "Here you go:\n```json\n{\"response_text\": \"Fog rolls in.\"}\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.response_text, "Fog rolls in.");
        assert_eq!(reply.interaction_description, DEFAULT_INTERACTION);
    }

    #[test]
    fn test_embedded_braces() {
        let raw = r#"Sure! {"response_text": "A bell tolls.", "interaction_description": "Listened"} Enjoy."#;
        assert_eq!(parse_reply(raw).unwrap().interaction_description, "Listened");
    }

    #[test]
    fn test_prose_is_no_json() {
        assert_eq!(parse_reply("The wind howls."), Err(ParseError::NoJson));
        let fallback = parse_reply_or_raw("The wind howls.");
        assert_eq!(fallback.response_text, "The wind howls.");
        assert_eq!(fallback.interaction_description, DEFAULT_INTERACTION);
    }

    #[test]
    fn test_broken_json_falls_back() {
        let raw = r#"{"response_text": "unterminated}"#;
        assert!(matches!(parse_reply(raw), Err(ParseError::InvalidJson(_))));
        assert_eq!(parse_reply_or_raw(raw).response_text, raw);
    }

    #[test]
    fn test_empty_response_text_is_invalid() {
        assert!(parse_reply(r#"{"response_text": "  "}"#).is_err());
    }
}
