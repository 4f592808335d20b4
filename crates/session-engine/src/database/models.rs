use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

use crate::models::{ConversationMessage, MessageRole, SessionStatus};
use crate::services::persistence::{EvaluationRecord, SessionRecord, StoreError};

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub session_key: String,
    pub participant_id: String,
    pub scenario_id: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Decode(format!("session {} has status '{}'", row.session_key, row.status))
        })?;

        Ok(SessionRecord {
            session_id: row.session_key,
            participant_id: row.participant_id,
            scenario_id: row.scenario_id,
            status,
            started_at: row.started_at,
            ended_at: row.ended_at,
            remote_id: Some(row.id),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub role: String,
    pub content: String,
    pub tags: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ConversationMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = MessageRole::parse(&row.role)
            .ok_or_else(|| StoreError::Decode(format!("unknown message role '{}'", row.role)))?;

        Ok(ConversationMessage {
            role,
            content: row.content,
            timestamp: row.created_at,
            tags: row.tags.0,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EvaluationRow {
    pub session_key: String,
    pub scores: Json<BTreeMap<String, f64>>,
    pub overall_score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EvaluationRow> for EvaluationRecord {
    fn from(row: EvaluationRow) -> Self {
        EvaluationRecord {
            session_id: row.session_key,
            scores: row.scores.0,
            overall_score: row.overall_score,
            strengths: row.strengths,
            improvements: row.improvements,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_row_conversion() {
        let row = SessionRow {
            id: 11,
            session_key: "s-1".to_string(),
            participant_id: "p-1".to_string(),
            scenario_id: 3,
            status: "completed".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
        };
        let record = SessionRecord::try_from(row.clone()).unwrap();
        assert_eq!(record.remote_id, Some(11));
        assert_eq!(record.status, SessionStatus::Completed);

        let bad = SessionRow { status: "archived".to_string(), ..row };
        assert!(matches!(SessionRecord::try_from(bad), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_message_row_conversion() {
        let row = MessageRow {
            role: "actor".to_string(),
            content: "Laissez-moi tranquille".to_string(),
            tags: Json(vec!["voix".to_string()]),
            created_at: Utc::now(),
        };
        let message = ConversationMessage::try_from(row).unwrap();
        assert_eq!(message.role, MessageRole::Actor);
        assert_eq!(message.tags, vec!["voix"]);
    }
}
