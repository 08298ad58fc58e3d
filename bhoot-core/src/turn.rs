//! Conversation turns and their narrative rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Player,
    Narrator,
    /// Engine-authored notes, such as plot completion records.
    System,
}

impl Actor {
    /// Label used when turns are rendered into narrative text.
    pub fn label(self) -> &'static str {
        match self {
            Actor::Player => "Player",
            Actor::Narrator => "Dungeon Master",
            Actor::System => "System",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single immutable turn of conversation.
///
/// Turns move between containers by value; a buffer that hands a turn to the
/// compaction stack no longer holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    actor: Actor,
    text: String,
    created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(actor: Actor, text: impl Into<String>) -> Self {
        Self::at(actor, text, Utc::now())
    }

    /// Create a turn with an explicit timestamp (log replay, tests).
    pub fn at(actor: Actor, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            actor,
            text: text.into(),
            created_at,
        }
    }

    pub fn player(text: impl Into<String>) -> Self {
        Self::new(Actor::Player, text)
    }

    pub fn narrator(text: impl Into<String>) -> Self {
        Self::new(Actor::Narrator, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Actor::System, text)
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Render as a single `actor: text` line.
    pub fn to_line(&self) -> String {
        format!("{}: {}", self.actor.label(), self.text)
    }
}

/// Join turns into a deterministic `actor: text` transcript, one per line.
pub fn transcript<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> String {
    turns
        .into_iter()
        .map(Turn::to_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_line() {
        let turn = Turn::player("I light the candle");
        assert_eq!(turn.to_line(), "Player: I light the candle");
        assert_eq!(Turn::narrator("It flickers").to_line(), "Dungeon Master: It flickers");
    }

    #[test]
    fn test_transcript_preserves_order() {
        let turns = vec![
            Turn::player("one"),
            Turn::narrator("two"),
            Turn::system("three"),
        ];
        assert_eq!(
            transcript(&turns),
            "Player: one\nDungeon Master: two\nSystem: three"
        );
    }

    #[test]
    fn test_transcript_empty() {
        assert_eq!(transcript(&Vec::<Turn>::new()), "");
    }
}
