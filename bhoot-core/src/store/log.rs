//! Durable append-only conversation log.

use super::PersistenceError;
use crate::turn::{Actor, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One logged line of play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub actor: Actor,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(actor: Actor, text: impl Into<String>) -> Self {
        Self {
            actor,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_turn(&self) -> Turn {
        Turn::at(self.actor, self.text.clone(), self.timestamp)
    }
}

impl From<&Turn> for LogEntry {
    fn from(turn: &Turn) -> Self {
        Self {
            actor: turn.actor(),
            text: turn.text().to_string(),
            timestamp: turn.created_at(),
        }
    }
}

/// Append-only log of player inputs and narrator responses.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<(), PersistenceError>;

    /// Up to `limit` entries, newest first, optionally restricted to one actor.
    async fn recent(
        &self,
        limit: usize,
        actor: Option<Actor>,
    ) -> Result<Vec<LogEntry>, PersistenceError>;

    /// Drop every entry (full session reset).
    async fn clear(&self) -> Result<(), PersistenceError>;
}

/// Newest-first selection over entries stored oldest-first.
pub(super) fn select_recent(
    entries: &[LogEntry],
    limit: usize,
    actor: Option<Actor>,
) -> Vec<LogEntry> {
    entries
        .iter()
        .rev()
        .filter(|e| actor.is_none_or(|a| e.actor == a))
        .take(limit)
        .cloned()
        .collect()
}

/// Process-local conversation log.
#[derive(Default)]
pub struct InMemoryConversationLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn append(&self, entry: LogEntry) -> Result<(), PersistenceError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(
        &self,
        limit: usize,
        actor: Option<Actor>,
    ) -> Result<Vec<LogEntry>, PersistenceError> {
        Ok(select_recent(&self.entries.read().await, limit, actor))
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let log = InMemoryConversationLog::new();
        for text in ["one", "two", "three"] {
            log.append(LogEntry::new(Actor::Player, text)).await.unwrap();
        }

        let recent = log.recent(2, None).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_recent_filters_by_actor() {
        let log = InMemoryConversationLog::new();
        log.append(LogEntry::new(Actor::Player, "I listen")).await.unwrap();
        log.append(LogEntry::new(Actor::Narrator, "Silence")).await.unwrap();
        log.append(LogEntry::new(Actor::Player, "I knock")).await.unwrap();

        let players = log.recent(10, Some(Actor::Player)).await.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].text, "I knock");
        assert!(players.iter().all(|e| e.actor == Actor::Player));
    }

    #[test]
    fn test_entry_turn_conversion_keeps_timestamp() {
        let turn = Turn::narrator("The candle gutters");
        let entry = LogEntry::from(&turn);
        assert_eq!(entry.to_turn(), turn);
    }
}
