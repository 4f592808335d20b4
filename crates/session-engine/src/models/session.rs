use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally generated, opaque session identifier
pub type SessionId = String;

/// Lifecycle of one simulated encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled sessions never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Speaker of one conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Participant,
    Actor,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Actor => "actor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "participant" => Some(Self::Participant),
            "actor" => Some(Self::Actor),
            _ => None,
        }
    }

    /// Speaker label used in transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Self::Participant => "Soignant",
            Self::Actor => "Patient",
        }
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tags,
        }
    }

    pub fn participant(content: impl Into<String>, tags: Vec<String>) -> Self {
        Self::new(MessageRole::Participant, content, tags)
    }

    pub fn actor(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Actor, content, Vec::new())
    }
}

/// Professional role the participant introduced themselves as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Doctor,
    Nurse,
    Psychologist,
    SocialWorker,
    Student,
    #[default]
    Unknown,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Nurse => "nurse",
            Self::Psychologist => "psychologist",
            Self::SocialWorker => "social_worker",
            Self::Student => "student",
            Self::Unknown => "unknown",
        }
    }

    /// How the simulated patient addresses the participant
    pub fn form_of_address(&self) -> &'static str {
        match self {
            Self::Doctor => "Docteur",
            Self::Nurse => "l'infirmier",
            Self::Psychologist => "le psychologue",
            Self::SocialWorker => "l'assistant social",
            Self::Student => "l'étudiant",
            Self::Unknown => "vous",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(SessionStatus::parse("Completed"), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::parse("canceled"), Some(SessionStatus::Cancelled));
        assert_eq!(SessionStatus::parse("paused"), None);
    }
}
