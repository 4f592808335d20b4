use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ConversationMessage, SessionId, SessionStatus};

/// Logical resources of the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Session,
    Exchange,
    Evaluation,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Exchange => "exchange",
            Self::Evaluation => "evaluation",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entities that dependent records point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Participant,
    Scenario,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Scenario => "scenario",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub participant_id: String,
    pub scenario_id: i32,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Numeric id assigned by the remote store, used as foreign key
    #[serde(default)]
    pub remote_id: Option<i64>,
}

/// One participant message and the actor's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub session_id: SessionId,
    pub turn_index: i32,
    pub messages: Vec<ConversationMessage>,
}

impl ExchangeRecord {
    pub fn key_for(session_id: &str, turn_index: i32) -> String {
        format!("{}#{}", session_id, turn_index)
    }

    /// Inverse of [`ExchangeRecord::key_for`]
    pub fn parse_key(key: &str) -> Option<(&str, i32)> {
        let (session_id, turn) = key.rsplit_once('#')?;
        if session_id.is_empty() {
            return None;
        }
        Some((session_id, turn.parse().ok()?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub session_id: SessionId,
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A record as held by the local mirror
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persisted<T> {
    pub record: T,
    /// False once confirmed by the remote store, true when only mirrored locally
    pub is_fallback: bool,
    pub written_at: DateTime<Utc>,
}

impl<T> Persisted<T> {
    pub fn confirmed(record: T) -> Self {
        Self {
            record,
            is_fallback: false,
            written_at: Utc::now(),
        }
    }

    pub fn fallback(record: T) -> Self {
        Self {
            record,
            is_fallback: true,
            written_at: Utc::now(),
        }
    }
}

/// Result of a gateway write. `committed == false` is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome<T> {
    pub committed: bool,
    pub record: Persisted<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_key_roundtrip() {
        let key = ExchangeRecord::key_for("abc#def", 7);
        assert_eq!(key, "abc#def#7");
        assert_eq!(ExchangeRecord::parse_key(&key), Some(("abc#def", 7)));
        assert_eq!(ExchangeRecord::parse_key("no-turn"), None);
        assert_eq!(ExchangeRecord::parse_key("#3"), None);
        assert_eq!(ExchangeRecord::parse_key("s#x"), None);
    }
}
