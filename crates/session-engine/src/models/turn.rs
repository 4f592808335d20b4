use serde::{Deserialize, Serialize};

use super::session::{ParticipantRole, SessionId};

/// One participant turn as received from the caller
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub participant_id: String,
    pub scenario_id: i32,
    pub message: String,
}

/// Who the actor is talking to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Addressing {
    pub role: ParticipantRole,
    pub form_of_address: String,
}

impl Addressing {
    pub fn for_role(role: ParticipantRole) -> Self {
        Self {
            role,
            form_of_address: role.form_of_address().to_string(),
        }
    }
}

impl Default for Addressing {
    fn default() -> Self {
        Self::for_role(ParticipantRole::Unknown)
    }
}

/// Result of one turn. Always well-formed, even when the turn degraded.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub reply: String,
    pub addressing: Addressing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_summary: Option<String>,
    /// True when the reply is the fixed fallback utterance
    pub degraded: bool,
}
