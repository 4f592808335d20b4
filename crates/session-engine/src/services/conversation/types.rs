use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::{ConversationMessage, ParticipantRole, SessionId, SessionStatus};
use crate::services::emotion::EmotionalState;

/// Complete conversation state stored in the cache
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: SessionId,
    pub participant_id: String,
    pub scenario_id: i32,
    pub status: SessionStatus,

    /// Most recent messages, oldest first, bounded by the cache history limit
    pub messages: VecDeque<ConversationMessage>,

    /// Role taken from the first introduction-like message
    pub detected_role: ParticipantRole,

    /// Present only for scenarios with emotional tracking
    pub emotional_state: Option<EmotionalState>,

    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Drives TTL eviction
    pub last_activity: Instant,

    pub metadata: ConversationMetadata,
}

impl SessionEntry {
    pub fn new(
        session_id: SessionId,
        participant_id: String,
        scenario_id: i32,
        emotional_state: Option<EmotionalState>,
        history_limit: usize,
    ) -> Self {
        Self {
            session_id,
            participant_id,
            scenario_id,
            status: SessionStatus::Active,
            messages: VecDeque::with_capacity(history_limit),
            detected_role: ParticipantRole::Unknown,
            emotional_state,
            started_at: Utc::now(),
            ended_at: None,
            last_activity: Instant::now(),
            metadata: ConversationMetadata::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Idle for strictly longer than `ttl` at `now`
    pub fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > ttl
    }

    /// New session with no message exchanged yet
    pub fn is_fresh(&self) -> bool {
        self.metadata.resumed_at_turn.is_none() && self.metadata.total_messages == 0
    }

    /// Index of the exchange the next participant message opens
    pub fn next_turn_index(&self) -> i32 {
        let base = self.metadata.resumed_at_turn.unwrap_or(0);
        let local = i32::try_from(self.metadata.total_messages / 2).unwrap_or(i32::MAX);
        base.saturating_add(local)
    }
}

/// Counters for one session
#[derive(Debug, Clone, Default)]
pub struct ConversationMetadata {
    /// Messages ever appended, including ones dropped from the window
    pub total_messages: usize,
    pub dropped_messages: usize,
    /// Set when the entry was rebuilt for a stored session: the first turn
    /// index this entry hands out
    pub resumed_at_turn: Option<i32>,
}

/// Context handed to the generation request
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationContext {
    /// Transcript of the most recent messages, one line per message
    pub recent_history: String,
    /// Same window as `recent_history`, as structured messages
    #[serde(skip)]
    pub recent_messages: Vec<ConversationMessage>,
    pub detected_role: ParticipantRole,
    pub topics: Vec<String>,
    pub topics_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_state: Option<EmotionalState>,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub active_sessions: usize,
    pub cached_messages: usize,
    pub tracked_sessions: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeError {
    #[error("Session {0} is not cached")]
    UnknownSession(SessionId),

    #[error("Session {session_id} is already {}", .status.as_str())]
    Terminal {
        session_id: SessionId,
        status: SessionStatus,
    },
}
