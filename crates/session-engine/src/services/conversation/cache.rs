use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::models::{ConversationMessage, MessageRole, ParticipantRole, SessionStatus};
use crate::services::emotion::EmotionalState;

use super::role_detector::RoleDetector;
use super::types::{CacheStats, ConversationContext, SessionEntry, StatusChangeError};

/// Thread-safe in-memory conversation cache keyed by session id.
/// Unknown keys never raise: lookups return empty values and mutations log
/// a warning.
#[derive(Clone)]
pub struct ConversationCache {
    storage: Arc<DashMap<String, SessionEntry>>,
    history_limit: usize,
    context_window: usize,
    ttl: Duration,
}

impl ConversationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let history_limit = config.history_limit.max(1);
        info!(
            "Initializing conversation cache: history_limit={}, context_window={}, ttl={}s",
            history_limit, config.context_window, config.ttl_seconds
        );
        Self {
            storage: Arc::new(DashMap::new()),
            history_limit,
            context_window: config.context_window.clamp(1, history_limit),
            ttl: config.ttl(),
        }
    }

    /// Get or create the entry for a session. An existing entry only has its
    /// activity timestamp refreshed; history and state are left untouched.
    pub fn initialize(
        &self,
        session_id: &str,
        participant_id: &str,
        scenario_id: i32,
        initial_state: Option<EmotionalState>,
    ) -> SessionEntry {
        let entry = self
            .storage
            .entry(session_id.to_string())
            .and_modify(|e| e.touch())
            .or_insert_with(|| {
                debug!("Creating cache entry for session {}", session_id);
                SessionEntry::new(
                    session_id.to_string(),
                    participant_id.to_string(),
                    scenario_id,
                    initial_state,
                    self.history_limit,
                )
            });
        entry.value().clone()
    }

    /// Insert a prebuilt entry unless the session is already cached.
    /// Returns the entry that ends up in the cache.
    pub fn restore(&self, entry: SessionEntry) -> SessionEntry {
        let session_id = entry.session_id.clone();
        let cached = self
            .storage
            .entry(session_id)
            .and_modify(|e| e.touch())
            .or_insert_with(|| {
                debug!("Restoring cache entry for session {}", entry.session_id);
                entry
            });
        cached.value().clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.storage.get(session_id).map(|e| e.value().clone())
    }

    /// Append one message, dropping the oldest ones beyond the history limit
    pub fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        text: &str,
        tags: Vec<String>,
    ) -> bool {
        self.push_message(session_id, ConversationMessage::new(role, text, tags))
    }

    /// Same as [`append_message`](Self::append_message) for a prebuilt message
    pub fn push_message(&self, session_id: &str, message: ConversationMessage) -> bool {
        let Some(mut entry) = self.storage.get_mut(session_id) else {
            warn!("append_message: session {} not in cache, message dropped", session_id);
            return false;
        };

        entry.messages.push_back(message);
        entry.metadata.total_messages += 1;
        while entry.messages.len() > self.history_limit {
            entry.messages.pop_front();
            entry.metadata.dropped_messages += 1;
        }
        entry.touch();
        true
    }

    /// Transcript of the most recent messages plus detected role, topics and
    /// emotional state. Empty defaults for unknown sessions.
    pub fn get_context(&self, session_id: &str) -> ConversationContext {
        let Some(entry) = self.storage.get(session_id) else {
            debug!("get_context: session {} not in cache", session_id);
            return ConversationContext::default();
        };

        let skip = entry.messages.len().saturating_sub(self.context_window);
        let recent_messages: Vec<ConversationMessage> =
            entry.messages.iter().skip(skip).cloned().collect();
        let recent_history = recent_messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut topics: Vec<String> = Vec::new();
        for tag in entry.messages.iter().flat_map(|m| m.tags.iter()) {
            if !topics.contains(tag) {
                topics.push(tag.clone());
            }
        }
        let topics_summary = if topics.is_empty() {
            String::new()
        } else {
            format!("Sujets déjà abordés : {}", topics.join(", "))
        };

        ConversationContext {
            recent_history,
            recent_messages,
            detected_role: entry.detected_role,
            topics,
            topics_summary,
            emotional_state: entry.emotional_state.clone(),
        }
    }

    /// Keyword role classifier, see [`RoleDetector::detect`]
    pub fn detect_role(text: &str) -> ParticipantRole {
        RoleDetector::detect(text)
    }

    /// Record the participant role once; later introductions do not override it
    pub fn set_detected_role(&self, session_id: &str, role: ParticipantRole) -> ParticipantRole {
        let Some(mut entry) = self.storage.get_mut(session_id) else {
            warn!("set_detected_role: session {} not in cache", session_id);
            return ParticipantRole::Unknown;
        };

        if !entry.detected_role.is_known() && role.is_known() {
            info!("Session {} participant identified as {:?}", session_id, role);
            entry.detected_role = role;
        }
        entry.detected_role
    }

    pub fn update_emotional_state(&self, session_id: &str, state: EmotionalState) -> bool {
        match self.storage.get_mut(session_id) {
            Some(mut entry) => {
                entry.emotional_state = Some(state);
                entry.touch();
                true
            }
            None => {
                warn!("update_emotional_state: session {} not in cache", session_id);
                false
            }
        }
    }

    pub fn get_emotional_state(&self, session_id: &str) -> Option<EmotionalState> {
        self.storage
            .get(session_id)
            .and_then(|e| e.emotional_state.clone())
    }

    /// Move an active session to `status`. Terminal statuses are final.
    pub fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<SessionEntry, StatusChangeError> {
        let mut entry = self
            .storage
            .get_mut(session_id)
            .ok_or_else(|| StatusChangeError::UnknownSession(session_id.to_string()))?;

        if entry.status.is_terminal() {
            return Err(StatusChangeError::Terminal {
                session_id: session_id.to_string(),
                status: entry.status,
            });
        }

        entry.status = status;
        if status.is_terminal() {
            entry.ended_at = Some(Utc::now());
        }
        entry.touch();
        Ok(entry.value().clone())
    }

    /// Evict entries idle for longer than the TTL. Returns number removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let start_len = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_expired_at(now, ttl));
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Evicted {} idle sessions", count);
        }
        count
    }

    /// Run `sweep_expired` on a fixed interval until the handle is aborted
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep_expired();
                debug!("Cache sweep removed {} entries, {} remain", removed, cache.len());
            }
        })
    }

    pub fn clear(&self, session_id: &str) -> bool {
        self.storage.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.storage.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn stats(&self) -> CacheStats {
        let mut cached_messages = 0;
        let mut tracked_sessions = 0;
        for entry in self.storage.iter() {
            cached_messages += entry.messages.len();
            if entry.emotional_state.as_ref().is_some_and(|s| s.enabled) {
                tracked_sessions += 1;
            }
        }

        CacheStats {
            active_sessions: self.storage.len(),
            cached_messages,
            tracked_sessions,
        }
    }
}
